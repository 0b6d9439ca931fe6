//! Typed metric specifications and the parsers shared by every annotation schema.

use std::{collections::BTreeMap, str::FromStr};

use k8s_openapi::{
    api::autoscaling::v2::{
        ExternalMetricSource, MetricIdentifier, MetricSpec as K8sMetricSpec, MetricTarget,
        PodsMetricSource, ResourceMetricSource,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};

use crate::{
    annotations::{AnnotationError, AnnotationNames, Annotations},
    quantity::Quantity,
};

/// Metric name the external metrics adapter serves Prometheus queries under.
pub const PROMETHEUS_QUERY_METRIC: &str = "prometheus-query";
/// Selector label naming the query of an external metric.
pub const QUERY_NAME_LABEL: &str = "query-name";
/// Autoscaler annotation prefix carrying the query text of an external metric.
pub const QUERY_ANNOTATION_PREFIX: &str = "metric-config.external.prometheus-query.prometheus";

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResourceTarget {
    /// Average utilization in percent of the requested resource, within `1..=100`.
    Utilization(i32),
    AverageValue(Quantity),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExternalTarget {
    Value(Quantity),
    /// Target divided by the current replica count.
    AverageValue(Quantity),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExternalMetric {
    pub name: String,
    pub query: String,
    pub target: ExternalTarget,
}

impl ExternalMetric {
    pub fn is_per_instance(&self) -> bool {
        matches!(self.target, ExternalTarget::AverageValue(_))
    }

    pub fn query_annotation_key(&self) -> String {
        format!("{QUERY_ANNOTATION_PREFIX}/{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricSpec {
    Resource {
        resource: ResourceKind,
        target: ResourceTarget,
    },
    /// Custom metric averaged over the pods of the workload.
    Pods {
        name: String,
        average_value: Quantity,
    },
    External(ExternalMetric),
}

impl MetricSpec {
    /// Annotations the autoscaler object needs for this metric to be served.
    pub fn auxiliary_annotations(&self) -> BTreeMap<String, String> {
        match self {
            MetricSpec::External(external) => {
                BTreeMap::from([(external.query_annotation_key(), external.query.clone())])
            }
            _ => BTreeMap::new(),
        }
    }
}

impl From<&MetricSpec> for K8sMetricSpec {
    fn from(metric: &MetricSpec) -> Self {
        match metric {
            MetricSpec::Resource { resource, target } => {
                let target = match target {
                    ResourceTarget::Utilization(percent) => MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(*percent),
                        ..Default::default()
                    },
                    ResourceTarget::AverageValue(value) => MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(value.into()),
                        ..Default::default()
                    },
                };

                K8sMetricSpec {
                    type_: "Resource".to_string(),
                    resource: Some(ResourceMetricSource {
                        name: resource.to_string(),
                        target,
                    }),
                    ..Default::default()
                }
            }
            MetricSpec::Pods {
                name,
                average_value,
            } => K8sMetricSpec {
                type_: "Pods".to_string(),
                pods: Some(PodsMetricSource {
                    metric: MetricIdentifier {
                        name: name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(average_value.into()),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            },
            MetricSpec::External(external) => {
                let target = match &external.target {
                    ExternalTarget::Value(value) => MetricTarget {
                        type_: "Value".to_string(),
                        value: Some(value.into()),
                        ..Default::default()
                    },
                    ExternalTarget::AverageValue(value) => MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(value.into()),
                        ..Default::default()
                    },
                };

                K8sMetricSpec {
                    type_: "External".to_string(),
                    external: Some(ExternalMetricSource {
                        metric: MetricIdentifier {
                            name: PROMETHEUS_QUERY_METRIC.to_string(),
                            selector: Some(LabelSelector {
                                match_labels: Some(BTreeMap::from([(
                                    QUERY_NAME_LABEL.to_string(),
                                    external.name.clone(),
                                )])),
                                ..Default::default()
                            }),
                        },
                        target,
                    }),
                    ..Default::default()
                }
            }
        }
    }
}

/// Reads one of the replica bound keys, which must hold a positive 32-bit integer.
pub fn parse_replica_bound(annotations: &Annotations, key: &str) -> Result<i32, AnnotationError> {
    let raw = annotations
        .get(key)
        .filter(|value| !value.is_empty())
        .ok_or(AnnotationError::MissingValue)?;

    let value = parse_integer(raw)?;
    if value <= 0 {
        return Err(AnnotationError::NotPositive { value });
    }

    Ok(value)
}

/// Parses a CPU or memory target. `format` is the field name after the domain separator and
/// selects between a utilization percentage and an average quantity.
pub fn parse_resource_metric(
    names: &AnnotationNames,
    resource: ResourceKind,
    format: &str,
    raw: &str,
) -> Result<MetricSpec, AnnotationError> {
    if raw.is_empty() {
        return Err(AnnotationError::MissingValue);
    }

    let target = if format == names.target_average_utilization {
        ResourceTarget::Utilization(parse_percentage(raw)?)
    } else if format == names.target_average_value {
        ResourceTarget::AverageValue(parse_quantity(raw)?)
    } else {
        return Err(AnnotationError::UnknownFormat {
            format: format.to_string(),
        });
    };

    Ok(MetricSpec::Resource { resource, target })
}

pub(crate) fn parse_percentage(raw: &str) -> Result<i32, AnnotationError> {
    let value = parse_integer(raw)?;
    if !(1..=100).contains(&value) {
        return Err(AnnotationError::PercentageOutOfRange { value });
    }
    Ok(value)
}

pub(crate) fn parse_quantity(raw: &str) -> Result<Quantity, AnnotationError> {
    Quantity::from_str(raw).map_err(|err| AnnotationError::InvalidQuantity {
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_integer(raw: &str) -> Result<i32, AnnotationError> {
    raw.parse().map_err(|_| AnnotationError::InvalidInteger {
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn bounds(value: &str) -> Annotations {
        Annotations::from([("hpa/minReplicas".to_string(), value.to_string())])
    }

    #[rstest]
    #[case("1", Ok(1))]
    #[case("25", Ok(25))]
    #[case("", Err(AnnotationError::MissingValue))]
    #[case("0", Err(AnnotationError::NotPositive { value: 0 }))]
    #[case("-3", Err(AnnotationError::NotPositive { value: -3 }))]
    #[case("two", Err(AnnotationError::InvalidInteger { value: "two".to_string() }))]
    #[case("4294967296", Err(AnnotationError::InvalidInteger { value: "4294967296".to_string() }))]
    fn replica_bound(#[case] raw: &str, #[case] expected: Result<i32, AnnotationError>) {
        assert_eq!(parse_replica_bound(&bounds(raw), "hpa/minReplicas"), expected);
    }

    #[test]
    fn missing_replica_bound() {
        assert_eq!(
            parse_replica_bound(&Annotations::new(), "hpa/maxReplicas"),
            Err(AnnotationError::MissingValue)
        );
    }

    #[rstest]
    #[case("1", true)]
    #[case("80", true)]
    #[case("100", true)]
    #[case("0", false)]
    #[case("101", false)]
    #[case("150", false)]
    #[case("80%", false)]
    fn cpu_utilization_range(#[case] raw: &str, #[case] accepted: bool) {
        let names = AnnotationNames::default();
        let parsed =
            parse_resource_metric(&names, ResourceKind::Cpu, "targetAverageUtilization", raw);
        assert_eq!(parsed.is_ok(), accepted, "{raw}: {parsed:?}");
    }

    #[test]
    fn memory_average_value() {
        let names = AnnotationNames::default();
        let parsed =
            parse_resource_metric(&names, ResourceKind::Memory, "targetAverageValue", "1024Mi")
                .unwrap();

        let MetricSpec::Resource { resource, target } = &parsed else {
            panic!("expected a resource metric, got {parsed:?}");
        };
        assert_eq!(*resource, ResourceKind::Memory);
        assert_eq!(
            *target,
            ResourceTarget::AverageValue(Quantity::from_str("1024Mi").unwrap())
        );
    }

    #[test]
    fn unparseable_quantity_is_rejected() {
        let names = AnnotationNames::default();
        let parsed =
            parse_resource_metric(&names, ResourceKind::Memory, "targetAverageValue", "1024xMi");
        assert!(matches!(parsed, Err(AnnotationError::InvalidQuantity { .. })));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let names = AnnotationNames::default();
        assert_eq!(
            parse_resource_metric(&names, ResourceKind::Cpu, "targetValue", "10"),
            Err(AnnotationError::UnknownFormat {
                format: "targetValue".to_string()
            })
        );
    }

    #[test]
    fn external_metric_converts_to_prometheus_query_source() {
        let metric = MetricSpec::External(ExternalMetric {
            name: "q1".to_string(),
            query: "up".to_string(),
            target: ExternalTarget::AverageValue(Quantity::from_str("10").unwrap()),
        });

        let spec = K8sMetricSpec::from(&metric);
        assert_eq!(spec.type_, "External");
        let external = spec.external.unwrap();
        assert_eq!(external.metric.name, PROMETHEUS_QUERY_METRIC);
        assert_eq!(
            external.metric.selector.unwrap().match_labels.unwrap()[QUERY_NAME_LABEL],
            "q1"
        );
        assert_eq!(external.target.type_, "AverageValue");
        assert!(external.target.value.is_none());

        assert_eq!(
            metric.auxiliary_annotations(),
            BTreeMap::from([(
                "metric-config.external.prometheus-query.prometheus/q1".to_string(),
                "up".to_string(),
            )])
        );
    }

    #[test]
    fn external_target_keeps_the_configured_number() {
        let raw = "9007199254740993";
        let metric = MetricSpec::External(ExternalMetric {
            name: "q1".to_string(),
            query: "up".to_string(),
            target: ExternalTarget::Value(parse_quantity(raw).unwrap()),
        });

        let target = K8sMetricSpec::from(&metric).external.unwrap().target;
        assert_eq!(target.type_, "Value");
        assert_eq!(target.value.unwrap().0, raw);
    }

    #[test]
    fn resource_metric_converts_to_utilization_target() {
        let metric = MetricSpec::Resource {
            resource: ResourceKind::Cpu,
            target: ResourceTarget::Utilization(80),
        };

        let spec = K8sMetricSpec::from(&metric);
        let resource = spec.resource.unwrap();
        assert_eq!(spec.type_, "Resource");
        assert_eq!(resource.name, "cpu");
        assert_eq!(resource.target.type_, "Utilization");
        assert_eq!(resource.target.average_utilization, Some(80));
        assert!(metric.auxiliary_annotations().is_empty());
    }
}
