//! Current annotation convention, with the metric kind as a subdomain of the reserved domain:
//!
//! ```plain
//! <domain>/minReplicas                          <domain>/maxReplicas
//! cpu.<domain>/targetAverageUtilization         cpu.<domain>/targetAverageValue
//! memory.<domain>/targetAverageValue
//! prometheus.<metric>.<domain>/query
//! prometheus.<metric>.<domain>/targetValue      prometheus.<metric>.<domain>/targetAverageValue
//! ```

use std::collections::BTreeSet;

use super::{
    AnnotationError, AnnotationFilter, AnnotationNames, AnnotationSchema, Annotations,
    DOMAIN_SEPARATOR, Parsed, SUBDOMAIN_SEPARATOR, SchemaVersion,
};
use crate::{
    error::Error,
    metrics::{
        ExternalMetric, ExternalTarget, MetricSpec, ResourceKind, parse_quantity,
        parse_resource_metric,
    },
};

#[derive(Debug)]
pub struct PrefixedSchema {
    names: AnnotationNames,
    filter: AnnotationFilter,
}

impl PrefixedSchema {
    pub fn new(names: AnnotationNames) -> Result<Self, Error> {
        let pattern = format!(
            r"^([A-Za-z0-9_-]+\.)*{}/[A-Za-z.]+$",
            regex::escape(&names.domain)
        );
        let filter = AnnotationFilter::new(&pattern)?;

        Ok(Self { names, filter })
    }

    fn external_key(&self, metric: &str, field: &str) -> String {
        let dot = SUBDOMAIN_SEPARATOR;
        format!(
            "{prefix}{dot}{metric}{dot}{domain}{DOMAIN_SEPARATOR}{field}",
            prefix = self.names.prometheus,
            domain = self.names.domain,
        )
    }

    /// Builds the external metric `metric` from its `query` and target sub-keys.
    ///
    /// When both targets are present `targetValue` wins.
    pub fn parse_external_metric(
        &self,
        metric: &str,
        annotations: &Annotations,
    ) -> Result<ExternalMetric, AnnotationError> {
        let query = annotations
            .get(&self.external_key(metric, &self.names.query))
            .filter(|query| !query.is_empty())
            .ok_or_else(|| AnnotationError::MissingQuery {
                metric: metric.to_string(),
            })?;

        let target_value = annotations.get(&self.external_key(metric, &self.names.target_value));
        let target_average_value =
            annotations.get(&self.external_key(metric, &self.names.target_average_value));

        let target = match (target_value, target_average_value) {
            (Some(value), _) => ExternalTarget::Value(parse_quantity(value)?),
            (None, Some(value)) => ExternalTarget::AverageValue(parse_quantity(value)?),
            (None, None) => {
                return Err(AnnotationError::MissingTarget {
                    metric: metric.to_string(),
                    target_value: self.names.target_value.clone(),
                    target_average_value: self.names.target_average_value.clone(),
                });
            }
        };

        Ok(ExternalMetric {
            name: metric.to_string(),
            query: query.clone(),
            target,
        })
    }
}

/// Splits `<prefix>/<field>`; anything with zero or several separators is malformed.
fn split_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split(DOMAIN_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(field), None) => Some((prefix, field)),
        _ => None,
    }
}

impl AnnotationSchema for PrefixedSchema {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V2
    }

    fn names(&self) -> &AnnotationNames {
        &self.names
    }

    fn filter(&self) -> &AnnotationFilter {
        &self.filter
    }

    /// A key that does not split into a subdomain of at least two parts and a field stops the
    /// parse, returning whatever was collected before it. Every other invalid entry only drops
    /// its own metric.
    ///
    /// Keys that passed the schema's filter always have exactly one separator and end their prefix
    /// with the domain. The early stop is therefore only reachable on filtered input when the
    /// domain is a single label, as in `scaling/targetValue`.
    fn parse_metrics(&self, annotations: &Annotations, workload: &str) -> Parsed<Vec<MetricSpec>> {
        let mut parsed = Parsed::new(Vec::new());
        let mut external_metrics = BTreeSet::new();

        for (key, value) in annotations {
            if self.names.is_replica_bound_key(key) {
                continue;
            }

            let Some((prefix, field)) = split_key(key) else {
                parsed.reject(workload, key, AnnotationError::MalformedKey);
                return parsed;
            };
            let subdomains: Vec<&str> = prefix.split(SUBDOMAIN_SEPARATOR).collect();
            if subdomains.len() < 2 {
                parsed.reject(workload, key, AnnotationError::MalformedKey);
                return parsed;
            }

            let kind = subdomains[0];
            let metric = if kind == self.names.cpu {
                parse_resource_metric(&self.names, ResourceKind::Cpu, field, value)
            } else if kind == self.names.memory {
                parse_resource_metric(&self.names, ResourceKind::Memory, field, value)
            } else if kind == self.names.prometheus {
                let name = subdomains[1];
                if !external_metrics.insert(name) {
                    continue;
                }
                debug!(workload, metric = name, "setting up custom prometheus metric");
                self.parse_external_metric(name, annotations)
                    .map(MetricSpec::External)
            } else {
                continue;
            };

            match metric {
                Ok(metric) => parsed.value.push(metric),
                Err(reason) => parsed.reject(workload, key, reason),
            }
        }

        parsed
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::{metrics::ResourceTarget, quantity::Quantity};

    fn schema() -> PrefixedSchema {
        PrefixedSchema::new(AnnotationNames::default()).unwrap()
    }

    fn annotations<const N: usize>(entries: [(&str, &str); N]) -> Annotations {
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn quantity(raw: &str) -> Quantity {
        Quantity::from_str(raw).unwrap()
    }

    #[test]
    fn filter_recognizes_bounds_and_metric_keys() {
        let schema = schema();
        let filter = schema.filter();

        assert!(filter.matches("hpa.autoscaling.banzaicloud.io/minReplicas"));
        assert!(filter.matches("cpu.hpa.autoscaling.banzaicloud.io/targetAverageUtilization"));
        assert!(filter.matches("prometheus.q1.hpa.autoscaling.banzaicloud.io/query"));
        assert!(!filter.matches("hpa.autoscaling.banzaicloud.io.evil.com/minReplicas"));
        assert!(!filter.matches("hpaxautoscaling.banzaicloud.io/minReplicas"));
        assert!(!filter.matches("kubectl.kubernetes.io/last-applied-configuration"));
    }

    #[test]
    fn parses_resource_metrics() {
        let parsed = schema().parse_metrics(
            &annotations([
                ("hpa.autoscaling.banzaicloud.io/minReplicas", "1"),
                ("hpa.autoscaling.banzaicloud.io/maxReplicas", "3"),
                ("cpu.hpa.autoscaling.banzaicloud.io/targetAverageUtilization", "80"),
                ("memory.hpa.autoscaling.banzaicloud.io/targetAverageValue", "1024Mi"),
            ]),
            "web",
        );

        assert!(parsed.rejected.is_empty());
        assert_eq!(
            parsed.value,
            vec![
                MetricSpec::Resource {
                    resource: ResourceKind::Cpu,
                    target: ResourceTarget::Utilization(80),
                },
                MetricSpec::Resource {
                    resource: ResourceKind::Memory,
                    target: ResourceTarget::AverageValue(quantity("1024Mi")),
                },
            ]
        );
    }

    #[test]
    fn invalid_metric_does_not_drop_the_others() {
        let parsed = schema().parse_metrics(
            &annotations([
                ("cpu.hpa.autoscaling.banzaicloud.io/targetAverageUtilization", "150"),
                ("memory.hpa.autoscaling.banzaicloud.io/targetAverageValue", "1024xMi"),
                ("cpu.hpa.autoscaling.banzaicloud.io/targetAverageValue", "500m"),
            ]),
            "web",
        );

        assert_eq!(
            parsed.value,
            vec![MetricSpec::Resource {
                resource: ResourceKind::Cpu,
                target: ResourceTarget::AverageValue(quantity("500m")),
            }]
        );
        assert_eq!(parsed.rejected.len(), 2);
        assert_eq!(
            parsed.rejected[0].reason,
            AnnotationError::PercentageOutOfRange { value: 150 }
        );
        assert_eq!(
            parsed.rejected[1].key,
            "memory.hpa.autoscaling.banzaicloud.io/targetAverageValue"
        );
    }

    #[test]
    fn external_metric_is_synthesized_once() {
        let parsed = schema().parse_metrics(
            &annotations([
                ("prometheus.q1.hpa.autoscaling.banzaicloud.io/query", "up"),
                ("prometheus.q1.hpa.autoscaling.banzaicloud.io/targetAverageValue", "10"),
            ]),
            "web",
        );

        assert!(parsed.rejected.is_empty());
        assert_eq!(
            parsed.value,
            vec![MetricSpec::External(ExternalMetric {
                name: "q1".to_string(),
                query: "up".to_string(),
                target: ExternalTarget::AverageValue(quantity("10")),
            })]
        );
    }

    #[test]
    fn external_metric_prefers_target_value() {
        let metric = schema()
            .parse_external_metric(
                "requests",
                &annotations([
                    (
                        "prometheus.requests.hpa.autoscaling.banzaicloud.io/query",
                        "sum(rate(x[1m]))",
                    ),
                    ("prometheus.requests.hpa.autoscaling.banzaicloud.io/targetValue", "100"),
                    ("prometheus.requests.hpa.autoscaling.banzaicloud.io/targetAverageValue", "10"),
                ]),
            )
            .unwrap();

        assert_eq!(metric.target, ExternalTarget::Value(quantity("100")));
        assert!(!metric.is_per_instance());
    }

    #[test]
    fn external_metric_requires_query_and_target() {
        let schema = schema();

        assert_eq!(
            schema.parse_external_metric(
                "q1",
                &annotations([("prometheus.q1.hpa.autoscaling.banzaicloud.io/targetValue", "1")]),
            ),
            Err(AnnotationError::MissingQuery {
                metric: "q1".to_string()
            })
        );
        assert!(matches!(
            schema.parse_external_metric(
                "q1",
                &annotations([("prometheus.q1.hpa.autoscaling.banzaicloud.io/query", "up")]),
            ),
            Err(AnnotationError::MissingTarget { .. })
        ));
    }

    #[test]
    fn failed_external_metric_is_reported_once() {
        let parsed = schema().parse_metrics(
            &annotations([
                ("prometheus.q1.hpa.autoscaling.banzaicloud.io/query", "up"),
                ("prometheus.q1.hpa.autoscaling.banzaicloud.io/targetValue", "ten"),
            ]),
            "web",
        );

        assert!(parsed.value.is_empty());
        assert_eq!(parsed.rejected.len(), 1);
    }

    #[test]
    fn malformed_key_stops_parsing() {
        let parsed = schema().parse_metrics(
            &annotations([
                ("cpu.hpa.autoscaling.banzaicloud.io/targetAverageUtilization", "50"),
                ("foo/bar/baz", "1"),
                ("memory.hpa.autoscaling.banzaicloud.io/targetAverageValue", "1Gi"),
            ]),
            "web",
        );

        assert_eq!(
            parsed.value,
            vec![MetricSpec::Resource {
                resource: ResourceKind::Cpu,
                target: ResourceTarget::Utilization(50),
            }]
        );
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].key, "foo/bar/baz");
        assert_eq!(parsed.rejected[0].reason, AnnotationError::MalformedKey);
    }

    #[test]
    fn single_label_domain_can_stop_filtered_parse() {
        let schema = PrefixedSchema::new(AnnotationNames::with_domain("scaling")).unwrap();
        let filtered = schema.filter().filter(&annotations([
            ("cpu.scaling/targetAverageUtilization", "50"),
            ("scaling/targetValue", "1"),
            ("team", "checkout"),
        ]));

        let parsed = schema.parse_metrics(&filtered, "web");

        assert_eq!(filtered.len(), 2);
        assert_eq!(parsed.value.len(), 1);
        assert_eq!(parsed.rejected[0].key, "scaling/targetValue");
        assert_eq!(parsed.rejected[0].reason, AnnotationError::MalformedKey);
    }

    #[test]
    fn unknown_metric_kind_is_skipped() {
        let parsed = schema().parse_metrics(
            &annotations([("gpu.hpa.autoscaling.banzaicloud.io/targetAverageValue", "1")]),
            "web",
        );

        assert!(parsed.value.is_empty());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn custom_domain() {
        let schema =
            PrefixedSchema::new(AnnotationNames::with_domain("scale.example.com")).unwrap();
        let parsed = schema.parse_metrics(
            &annotations([
                ("scale.example.com/minReplicas", "1"),
                ("cpu.scale.example.com/targetAverageUtilization", "60"),
            ]),
            "web",
        );

        let filter = schema.filter();
        assert!(filter.matches("cpu.scale.example.com/targetAverageUtilization"));
        assert!(!filter.matches("cpu.hpa.autoscaling.banzaicloud.io/targetAverageUtilization"));
        assert_eq!(parsed.value.len(), 1);
    }
}
