//! The autoscaling annotation namespace.
//!
//! Workloads opt into autoscaling by carrying annotations under a reserved domain. Several
//! incompatible key conventions have existed over time, each one is an [`AnnotationSchema`]
//! implementation selected by [`SchemaVersion`]. All of them are parameterised by an
//! [`AnnotationNames`] table, so the domain and field names are configuration rather than
//! compiled-in constants.

use std::{collections::BTreeMap, sync::Arc};

use crate::{error::Error, metrics::MetricSpec};

pub mod filter;
pub mod v1;
pub mod v2;

pub use filter::AnnotationFilter;

/// Annotation key/value pairs. Kept ordered so parsing visits keys lexicographically.
pub type Annotations = BTreeMap<String, String>;

pub const DEFAULT_DOMAIN: &str = "hpa.autoscaling.banzaicloud.io";

pub(crate) const DOMAIN_SEPARATOR: char = '/';
pub(crate) const SUBDOMAIN_SEPARATOR: char = '.';

/// Domain and field-name table of the annotation namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationNames {
    pub domain: String,
    pub min_replicas: String,
    pub max_replicas: String,
    pub cpu: String,
    pub memory: String,
    pub prometheus: String,
    pub pod: String,
    pub query: String,
    pub target_value: String,
    pub target_average_value: String,
    pub target_average_utilization: String,
}

impl Default for AnnotationNames {
    fn default() -> Self {
        Self::with_domain(DEFAULT_DOMAIN)
    }
}

impl AnnotationNames {
    pub fn with_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            min_replicas: "minReplicas".to_string(),
            max_replicas: "maxReplicas".to_string(),
            cpu: "cpu".to_string(),
            memory: "memory".to_string(),
            prometheus: "prometheus".to_string(),
            pod: "pod".to_string(),
            query: "query".to_string(),
            target_value: "targetValue".to_string(),
            target_average_value: "targetAverageValue".to_string(),
            target_average_utilization: "targetAverageUtilization".to_string(),
        }
    }

    /// Returns `<domain>/<field>`.
    pub fn domain_key(&self, field: &str) -> String {
        format!("{}{DOMAIN_SEPARATOR}{field}", self.domain)
    }

    pub fn min_replicas_key(&self) -> String {
        self.domain_key(&self.min_replicas)
    }

    pub fn max_replicas_key(&self) -> String {
        self.domain_key(&self.max_replicas)
    }

    pub fn is_replica_bound_key(&self, key: &str) -> bool {
        key == self.min_replicas_key() || key == self.max_replicas_key()
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum SchemaVersion {
    /// `<domain>/cpu`, `<domain>/memory` and `<domain>.pod/<metric>` keys.
    V1,

    /// `cpu.<domain>/...`, `memory.<domain>/...` and `prometheus.<metric>.<domain>/...` keys.
    #[default]
    V2,
}

impl SchemaVersion {
    pub fn schema(self, names: AnnotationNames) -> Result<Arc<dyn AnnotationSchema>, Error> {
        let schema: Arc<dyn AnnotationSchema> = match self {
            SchemaVersion::V1 => Arc::new(v1::LegacySchema::new(names)?),
            SchemaVersion::V2 => Arc::new(v2::PrefixedSchema::new(names)?),
        };
        Ok(schema)
    }
}

/// One annotation key convention: which keys belong to it and how they turn into metrics.
pub trait AnnotationSchema: Send + Sync + std::fmt::Debug {
    fn version(&self) -> SchemaVersion;

    fn names(&self) -> &AnnotationNames;

    fn filter(&self) -> &AnnotationFilter;

    /// Parses every metric described by `annotations`. Invalid entries are dropped and reported
    /// in [`Parsed::rejected`], they never fail the whole parse.
    fn parse_metrics(&self, annotations: &Annotations, workload: &str) -> Parsed<Vec<MetricSpec>>;
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AnnotationError {
    #[error("annotation key does not decompose into <subdomain>.<domain>/<field>")]
    MalformedKey,

    #[error("value is missing")]
    MissingValue,

    #[error("value {value:?} is not a valid integer")]
    InvalidInteger { value: String },

    #[error("value {value} should be a positive number")]
    NotPositive { value: i32 },

    #[error("value {value} should be a percentage value between [1,100]")]
    PercentageOutOfRange { value: i32 },

    #[error("value {value:?} is not a valid quantity: {reason}")]
    InvalidQuantity { value: String, reason: String },

    #[error("unknown target format {format:?}")]
    UnknownFormat { format: String },

    #[error("query is missing for custom metric {metric}")]
    MissingQuery { metric: String },

    #[error(
        "either {target_value} or {target_average_value} is required for custom metric {metric}"
    )]
    MissingTarget {
        metric: String,
        target_value: String,
        target_average_value: String,
    },
}

/// An annotation entry that was ignored, and why.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub key: String,
    pub reason: AnnotationError,
}

impl Rejection {
    pub fn new(key: impl Into<String>, reason: AnnotationError) -> Self {
        Self {
            key: key.into(),
            reason,
        }
    }
}

/// Outcome of a best-effort parse: what was produced plus everything that was dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub rejected: Vec<Rejection>,
}

impl<T> Parsed<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            rejected: Vec::new(),
        }
    }

    pub(crate) fn reject(
        &mut self,
        workload: &str,
        key: impl Into<String>,
        reason: AnnotationError,
    ) {
        let rejection = Rejection::new(key, reason);
        warn!(
            workload,
            key = rejection.key,
            reason = %rejection.reason,
            "ignoring invalid autoscaling annotation"
        );
        self.rejected.push(rejection);
    }
}
