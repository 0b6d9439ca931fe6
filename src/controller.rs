use std::{fmt::Debug, sync::Arc, time::Duration};

use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::{Deployment, StatefulSet},
        autoscaling::v2::HorizontalPodAutoscaler,
    },
};
use kube::{
    Api, Resource, ResourceExt,
    api::ListParams,
    client::Client,
    runtime::{Controller, controller::Action, watcher},
};
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;

use crate::{
    error::Error,
    reconciler::{KubeAutoscalerStore, Reconciler},
    synthesizer::Synthesizer,
    workload::Workload,
};

const REQUEUE_AFTER: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub reconciler: Arc<Reconciler<KubeAutoscalerStore>>,
    pub watch_namespace: Option<String>,
}

impl Context {
    pub fn new(client: Client, synthesizer: Synthesizer, watch_namespace: Option<String>) -> Self {
        let store = KubeAutoscalerStore::new(client.clone());

        Self {
            client,
            reconciler: Arc::new(Reconciler::new(store, synthesizer)),
            watch_namespace,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[tracing::instrument(skip_all)]
async fn reconcile<K: Workload>(workload: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!(
        name = workload.name_any(),
        namespace = ?workload.namespace(),
        kind = %K::kind(&()),
        "reconciling workload"
    );

    // The autoscaler goes away with the workload through its owner reference.
    if workload.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let workload = workload.workload_ref()?;
    ctx.reconciler.reconcile(&workload).await?;

    Ok(Action::await_change())
}

#[instrument(skip_all)]
fn error_policy<K: Workload>(_workload: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, "error occured on reconcile loop");
    Action::requeue(REQUEUE_AFTER)
}

async fn run_controller<K>(ctx: Arc<Context>) -> Result<(), Error>
where
    K: Workload<Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let workloads = ctx.api::<K>();
    let autoscalers = ctx.api::<HorizontalPodAutoscaler>();

    let stream = Controller::new(workloads, watcher::Config::default().any_semantic())
        .owns(autoscalers, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx);
    let mut stream = std::pin::pin!(stream);

    info!(kind = %K::kind(&()), "starting up controller loop process");
    while let Some(res) = stream.next().await {
        if let Err(e) = res {
            error!(error = ?e, "error occured on controller loop");
        }
    }

    Ok(())
}

#[instrument(skip_all)]
pub async fn run(ctx: Context) -> Result<(), Error> {
    let ctx = Arc::new(ctx);

    info!("checking access to HorizontalPodAutoscalers");
    let _ = ctx
        .api::<HorizontalPodAutoscaler>()
        .list(&ListParams::default().limit(1))
        .await?;
    info!("confirmed access to HorizontalPodAutoscalers");

    tokio::try_join!(
        run_controller::<Deployment>(ctx.clone()),
        run_controller::<StatefulSet>(ctx.clone()),
    )?;

    info!("controller has been terminated");

    Ok(())
}
