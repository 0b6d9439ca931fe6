use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::{Resource, ResourceExt};

use crate::{annotations::Annotations, error::Error};

/// Uniform view of a scalable workload, independent of its concrete kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub api_version: String,
    pub uid: String,
    pub annotations: Annotations,
    /// Annotations of the pod template, consulted when the workload itself carries none.
    pub pod_annotations: Annotations,
}

/// Adapter from a concrete workload resource to a [`WorkloadRef`].
pub trait Workload: Resource<DynamicType = ()> {
    fn pod_template_annotations(&self) -> Option<&BTreeMap<String, String>>;

    fn workload_ref(&self) -> Result<WorkloadRef, Error>
    where
        Self: Sized,
    {
        Ok(WorkloadRef {
            name: self.name_any(),
            namespace: self
                .namespace()
                .ok_or(Error::MissingObjectKey("metadata.namespace"))?,
            kind: Self::kind(&()).into_owned(),
            api_version: Self::api_version(&()).into_owned(),
            uid: self.uid().ok_or(Error::MissingObjectKey("metadata.uid"))?,
            annotations: self.annotations().clone(),
            pod_annotations: self.pod_template_annotations().cloned().unwrap_or_default(),
        })
    }
}

impl Workload for Deployment {
    fn pod_template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()
    }
}

impl Workload for StatefulSet {
    fn pod_template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::{
        apps::v1::{DeploymentSpec, StatefulSetSpec},
        core::v1::PodTemplateSpec,
    };
    use kube::api::ObjectMeta;

    use super::*;

    fn metadata() -> ObjectMeta {
        ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("6b1c3c8e-0d2e-4c8b-9a7e-1f1f9b0a2c11".to_string()),
            annotations: Some(BTreeMap::from([("a".to_string(), "1".to_string())])),
            ..Default::default()
        }
    }

    fn template() -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                annotations: Some(BTreeMap::from([("b".to_string(), "2".to_string())])),
                ..Default::default()
            }),
            spec: None,
        }
    }

    #[test]
    fn deployment_reference() {
        let deployment = Deployment {
            metadata: metadata(),
            spec: Some(DeploymentSpec {
                template: template(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let workload = deployment.workload_ref().unwrap();

        assert_eq!(workload.kind, "Deployment");
        assert_eq!(workload.api_version, "apps/v1");
        assert_eq!(workload.name, "web");
        assert_eq!(workload.annotations["a"], "1");
        assert_eq!(workload.pod_annotations["b"], "2");
    }

    #[test]
    fn statefulset_reference() {
        let statefulset = StatefulSet {
            metadata: metadata(),
            spec: Some(StatefulSetSpec {
                template: template(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let workload = statefulset.workload_ref().unwrap();

        assert_eq!(workload.kind, "StatefulSet");
        assert_eq!(workload.pod_annotations["b"], "2");
    }

    #[test]
    fn missing_template_annotations_are_empty() {
        let deployment = Deployment {
            metadata: metadata(),
            ..Default::default()
        };

        assert!(deployment.workload_ref().unwrap().pod_annotations.is_empty());
    }

    #[test]
    fn namespace_is_required() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                namespace: None,
                ..metadata()
            },
            ..Default::default()
        };

        assert!(matches!(
            deployment.workload_ref(),
            Err(Error::MissingObjectKey("metadata.namespace"))
        ));
    }
}
