use regex::Regex;

use super::Annotations;
use crate::error::Error;

/// Selects the annotations that belong to the autoscaling namespace.
///
/// Matching is purely syntactic, values are not looked at.
#[derive(Clone, Debug)]
pub struct AnnotationFilter {
    pattern: Regex,
}

impl AnnotationFilter {
    pub fn new(pattern: &str) -> Result<Self, Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    /// Returns the matching subset, which is empty when the workload is not configured.
    pub fn filter(&self, annotations: &Annotations) -> Annotations {
        annotations
            .iter()
            .filter(|(key, _)| self.matches(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
