//! Convergence of a workload's autoscaler with its annotations.
//!
//! Every reconciliation reads the current autoscaler, derives the desired one from scratch and
//! issues at most one mutating call. Nothing is cached between reconciliations.

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, DeleteParams, PostParams},
};

#[cfg(test)]
use mockall::automock;

use crate::{
    annotations::Rejection,
    error::Error,
    synthesizer::Synthesizer,
    workload::WorkloadRef,
};

/// Object store for autoscalers.
///
/// `create` and `update` report a conflicting existing object as [`Error::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AutoscalerStore: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>, Error>;

    async fn create(&self, hpa: &HorizontalPodAutoscaler) -> Result<(), Error>;

    async fn update(&self, hpa: &HorizontalPodAutoscaler) -> Result<(), Error>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// [`AutoscalerStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeAutoscalerStore {
    client: Client,
}

impl KubeAutoscalerStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(
        &self,
        hpa: &HorizontalPodAutoscaler,
    ) -> Result<Api<HorizontalPodAutoscaler>, Error> {
        let namespace = hpa
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        Ok(self.api(&namespace))
    }
}

fn already_exists(err: kube::Error, hpa: &HorizontalPodAutoscaler) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: HorizontalPodAutoscaler::kind(&()).into_owned(),
                namespace: hpa.namespace().unwrap_or_default(),
                name: hpa.name_any(),
            }
        }
        err => Error::KubeError(err),
    }
}

#[async_trait]
impl AutoscalerStore for KubeAutoscalerStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HorizontalPodAutoscaler>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, hpa: &HorizontalPodAutoscaler) -> Result<(), Error> {
        self.api_for(hpa)?
            .create(&PostParams::default(), hpa)
            .await
            .map_err(|err| already_exists(err, hpa))?;
        Ok(())
    }

    async fn update(&self, hpa: &HorizontalPodAutoscaler) -> Result<(), Error> {
        self.api_for(hpa)?
            .replace(&hpa.name_any(), &PostParams::default(), hpa)
            .await
            .map_err(|err| already_exists(err, hpa))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// Why a reconciliation left the store untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoopReason {
    NotConfigured,
    NotOwned,
    InvalidConfiguration,
}

/// The single store call a reconciliation decided on.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Noop(NoopReason),
    Create(HorizontalPodAutoscaler),
    Update(HorizontalPodAutoscaler),
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub decision: Decision,
    pub rejected: Vec<Rejection>,
}

impl Outcome {
    fn noop(reason: NoopReason) -> Self {
        Self {
            decision: Decision::Noop(reason),
            rejected: Vec::new(),
        }
    }
}

/// An autoscaler belongs to the workload when one of its owner references names the workload.
pub fn is_owned_by(hpa: &HorizontalPodAutoscaler, workload: &WorkloadRef) -> bool {
    hpa.owner_references()
        .iter()
        .any(|owner| owner.name == workload.name && owner.kind == workload.kind)
}

pub struct Reconciler<S> {
    store: S,
    synthesizer: Synthesizer,
}

impl<S: AutoscalerStore> Reconciler<S> {
    pub fn new(store: S, synthesizer: Synthesizer) -> Self {
        Self { store, synthesizer }
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    /// Decides what to do given the workload and the autoscaler currently in the store.
    pub fn decide(
        &self,
        workload: &WorkloadRef,
        current: Option<&HorizontalPodAutoscaler>,
    ) -> Outcome {
        let selected = self.synthesizer.select_annotations(workload);
        match &selected {
            Some((source, _)) => {
                info!(workload = workload.name, %source, "autoscale annotations found")
            }
            None => info!(workload = workload.name, "autoscale annotations not found"),
        }

        if let Some(current) = current
            && !is_owned_by(current, workload)
        {
            info!(workload = workload.name, "autoscaler is not created by us");
            return Outcome::noop(NoopReason::NotOwned);
        }

        let Some((_, annotations)) = selected else {
            return match current {
                Some(_) => Outcome {
                    decision: Decision::Delete,
                    rejected: Vec::new(),
                },
                None => Outcome::noop(NoopReason::NotConfigured),
            };
        };

        let parsed = self.synthesizer.synthesize(workload, &annotations);
        let decision = match (parsed.value, current) {
            (None, _) => Decision::Noop(NoopReason::InvalidConfiguration),
            (Some(desired), None) => Decision::Create(HorizontalPodAutoscaler::from(&desired)),
            (Some(desired), Some(current)) => {
                let mut hpa = HorizontalPodAutoscaler::from(&desired);
                hpa.metadata.resource_version = current.resource_version();
                Decision::Update(hpa)
            }
        };

        Outcome {
            decision,
            rejected: parsed.rejected,
        }
    }

    /// Reconciles the autoscaler of `workload`. Store errors other than "already exists" are
    /// returned so the caller can retry the whole reconciliation.
    #[instrument(
        skip_all,
        fields(workload = workload.name, namespace = workload.namespace, kind = workload.kind)
    )]
    pub async fn reconcile(&self, workload: &WorkloadRef) -> Result<Outcome, Error> {
        let current = self.store.get(&workload.namespace, &workload.name).await?;
        if current.is_none() {
            info!("autoscaler doesn't exist");
        }

        let outcome = self.decide(workload, current.as_ref());
        let result = match &outcome.decision {
            Decision::Noop(reason) => {
                debug!(?reason, "nothing to do");
                Ok(())
            }
            Decision::Create(hpa) => {
                info!("autoscaler doesn't exist, will be created");
                self.store.create(hpa).await
            }
            Decision::Update(hpa) => {
                info!("autoscaler found, will be updated");
                self.store.update(hpa).await
            }
            Decision::Delete => {
                info!("autoscaler found, will be deleted");
                self.store.delete(&workload.namespace, &workload.name).await
            }
        };

        match result {
            Err(err) if err.is_already_exists() => {
                debug!(error = %err, "autoscaler already exists");
                Ok(outcome)
            }
            Err(err) => {
                error!(error = %err, "failed to apply autoscaler");
                Err(err)
            }
            Ok(()) => Ok(outcome),
        }
    }
}
