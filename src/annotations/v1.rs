//! Legacy annotation convention, with every field directly under the reserved domain and custom
//! per-pod metrics under its `pod` subdomain:
//!
//! ```plain
//! <domain>/minReplicas    <domain>/maxReplicas
//! <domain>/cpu            (average utilization percentage)
//! <domain>/memory         (average value quantity)
//! <domain>.pod/<metric>   (average value quantity per pod)
//! ```

use super::{
    AnnotationError, AnnotationFilter, AnnotationNames, AnnotationSchema, Annotations,
    DOMAIN_SEPARATOR, Parsed, SUBDOMAIN_SEPARATOR, SchemaVersion,
};
use crate::{
    error::Error,
    metrics::{MetricSpec, ResourceKind, ResourceTarget, parse_percentage, parse_quantity},
};

#[derive(Debug)]
pub struct LegacySchema {
    names: AnnotationNames,
    filter: AnnotationFilter,
    pod_prefix: String,
}

impl LegacySchema {
    pub fn new(names: AnnotationNames) -> Result<Self, Error> {
        let pattern = format!(
            r"^{}({}{})?/[A-Za-z0-9_.-]+$",
            regex::escape(&names.domain),
            regex::escape(&SUBDOMAIN_SEPARATOR.to_string()),
            regex::escape(&names.pod),
        );
        let filter = AnnotationFilter::new(&pattern)?;
        let pod_prefix = format!("{}{SUBDOMAIN_SEPARATOR}{}", names.domain, names.pod);

        Ok(Self {
            names,
            filter,
            pod_prefix,
        })
    }

    fn parse_metric(
        &self,
        prefix: &str,
        field: &str,
        raw: &str,
    ) -> Option<Result<MetricSpec, AnnotationError>> {
        if raw.is_empty() {
            return Some(Err(AnnotationError::MissingValue));
        }

        if prefix == self.pod_prefix {
            return Some(parse_quantity(raw).map(|average_value| MetricSpec::Pods {
                name: field.to_string(),
                average_value,
            }));
        }

        if prefix != self.names.domain {
            return None;
        }

        if field == self.names.cpu {
            Some(parse_percentage(raw).map(|percent| MetricSpec::Resource {
                resource: ResourceKind::Cpu,
                target: ResourceTarget::Utilization(percent),
            }))
        } else if field == self.names.memory {
            Some(parse_quantity(raw).map(|quantity| MetricSpec::Resource {
                resource: ResourceKind::Memory,
                target: ResourceTarget::AverageValue(quantity),
            }))
        } else {
            Some(Err(AnnotationError::UnknownFormat {
                format: field.to_string(),
            }))
        }
    }
}

impl AnnotationSchema for LegacySchema {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V1
    }

    fn names(&self) -> &AnnotationNames {
        &self.names
    }

    fn filter(&self) -> &AnnotationFilter {
        &self.filter
    }

    fn parse_metrics(&self, annotations: &Annotations, workload: &str) -> Parsed<Vec<MetricSpec>> {
        let mut parsed = Parsed::new(Vec::new());

        for (key, value) in annotations {
            if self.names.is_replica_bound_key(key) {
                continue;
            }

            let Some((prefix, field)) = key.split_once(DOMAIN_SEPARATOR) else {
                parsed.reject(workload, key, AnnotationError::MalformedKey);
                return parsed;
            };
            if field.is_empty() || field.contains(DOMAIN_SEPARATOR) {
                parsed.reject(workload, key, AnnotationError::MalformedKey);
                return parsed;
            }

            match self.parse_metric(prefix, field, value) {
                Some(Ok(metric)) => parsed.value.push(metric),
                Some(Err(reason)) => parsed.reject(workload, key, reason),
                None => {}
            }
        }

        parsed
    }
}
