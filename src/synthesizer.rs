//! Turns recognized annotations into the desired autoscaler of a workload.

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::autoscaling::v2::{
        CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
        MetricSpec as K8sMetricSpec,
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::api::ObjectMeta;

use crate::{
    annotations::{AnnotationSchema, Annotations, Parsed},
    metrics::{MetricSpec, parse_replica_bound},
    workload::WorkloadRef,
};

/// Desired state of the autoscaler owned by a workload.
///
/// `min_replicas <= max_replicas` is not checked here, the autoscaling controller rejects
/// inverted bounds itself.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredAutoscaler {
    pub name: String,
    pub namespace: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub metrics: Vec<MetricSpec>,
    pub scale_target: CrossVersionObjectReference,
    pub owner: OwnerReference,
}

impl DesiredAutoscaler {
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.metrics
            .iter()
            .flat_map(MetricSpec::auxiliary_annotations)
            .collect()
    }
}

/// Controller owner reference that also blocks foreground deletion of the workload until the
/// autoscaler is gone.
pub fn controller_owner_ref(workload: &WorkloadRef) -> OwnerReference {
    OwnerReference {
        api_version: workload.api_version.clone(),
        kind: workload.kind.clone(),
        name: workload.name.clone(),
        uid: workload.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Where the recognized annotations of a workload were found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum AnnotationSource {
    #[strum(serialize = "workload")]
    Workload,

    #[strum(serialize = "pod template")]
    PodTemplate,
}

#[derive(Clone, Debug)]
pub struct Synthesizer {
    schema: Arc<dyn AnnotationSchema>,
}

impl Synthesizer {
    pub fn new(schema: Arc<dyn AnnotationSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &dyn AnnotationSchema {
        self.schema.as_ref()
    }

    /// Picks the workload's own recognized annotations, or the pod template's when the workload
    /// has none. The two sources are never merged.
    pub fn select_annotations(
        &self,
        workload: &WorkloadRef,
    ) -> Option<(AnnotationSource, Annotations)> {
        let filter = self.schema.filter();

        [
            (AnnotationSource::Workload, &workload.annotations),
            (AnnotationSource::PodTemplate, &workload.pod_annotations),
        ]
        .into_iter()
        .map(|(source, annotations)| (source, filter.filter(annotations)))
        .find(|(_, annotations)| !annotations.is_empty())
    }

    /// Produces the desired autoscaler, or `None` when the bounds are invalid or no metric is
    /// valid. Dropped entries are listed in the returned rejections.
    pub fn synthesize(
        &self,
        workload: &WorkloadRef,
        annotations: &Annotations,
    ) -> Parsed<Option<DesiredAutoscaler>> {
        let names = self.schema.names();
        let mut parsed = Parsed::new(None);

        let mut bound = |key: String| match parse_replica_bound(annotations, &key) {
            Ok(value) => Some(value),
            Err(reason) => {
                parsed.reject(&workload.name, key, reason);
                None
            }
        };
        let min_replicas = bound(names.min_replicas_key());
        let max_replicas = bound(names.max_replicas_key());
        let (Some(min_replicas), Some(max_replicas)) = (min_replicas, max_replicas) else {
            return parsed;
        };

        let metrics = self.schema.parse_metrics(annotations, &workload.name);
        parsed.rejected.extend(metrics.rejected);
        info!(
            workload = workload.name,
            count = metrics.value.len(),
            "parsed autoscaling metrics"
        );
        if metrics.value.is_empty() {
            error!(workload = workload.name, "no metrics configured");
            return parsed;
        }

        parsed.value = Some(DesiredAutoscaler {
            name: workload.name.clone(),
            namespace: workload.namespace.clone(),
            min_replicas,
            max_replicas,
            metrics: metrics.value,
            scale_target: CrossVersionObjectReference {
                api_version: Some(workload.api_version.clone()),
                kind: workload.kind.clone(),
                name: workload.name.clone(),
            },
            owner: controller_owner_ref(workload),
        });

        parsed
    }
}

impl From<&DesiredAutoscaler> for HorizontalPodAutoscaler {
    fn from(desired: &DesiredAutoscaler) -> Self {
        let annotations = desired.annotations();

        HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(desired.name.clone()),
                namespace: Some(desired.namespace.clone()),
                annotations: (!annotations.is_empty()).then_some(annotations),
                owner_references: Some(vec![desired.owner.clone()]),
                ..Default::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: desired.scale_target.clone(),
                min_replicas: Some(desired.min_replicas),
                max_replicas: desired.max_replicas,
                metrics: Some(desired.metrics.iter().map(K8sMetricSpec::from).collect()),
                behavior: None,
            }),
            status: None,
        }
    }
}
