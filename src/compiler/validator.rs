//! Intent validation
//!
//! Everything a backend would otherwise reject at runtime is rejected here,
//! before any backend is called.

use crate::error::{PipelineError, Result};
use crate::intent::{FilterClause, Real, SemanticIntent};
use crate::semantic::SemanticRegistry;
use itertools::Itertools;
use std::sync::Arc;

/// Largest row limit an intent may request.
pub const MAX_LIMIT: usize = 1_000;

pub struct IntentValidator {
    registry: Arc<dyn SemanticRegistry>,
}

impl IntentValidator {
    pub fn new(registry: Arc<dyn SemanticRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, intent: &SemanticIntent<Real>) -> Result<()> {
        if !intent.confidence.is_finite() || !(0.0..=1.0).contains(&intent.confidence) {
            return Err(invalid(format!(
                "confidence {} is outside [0, 1]",
                intent.confidence
            )));
        }

        for metric in intent.metrics() {
            if self.registry.metric(metric).is_none() {
                return Err(invalid(format!("unknown metric '{}'", metric)));
            }
        }
        if let Some(dup) = intent.metrics().duplicates().next() {
            return Err(invalid(format!("metric '{}' requested twice", dup)));
        }

        for dimension in &intent.group_by {
            self.check_dimension(dimension)?;
        }
        if let Some(dup) = intent.group_by.iter().duplicates().next() {
            return Err(invalid(format!("dimension '{}' grouped twice", dup)));
        }

        for filter in &intent.filters {
            self.check_filter(filter)?;
        }

        if let Some(sorting) = &intent.sorting {
            let requested = intent.metrics().any(|m| m == sorting.field)
                || intent.group_by.iter().any(|d| *d == sorting.field);
            if !requested {
                return Err(invalid(format!(
                    "sort field '{}' is neither a requested metric nor a grouping dimension",
                    sorting.field
                )));
            }
        }

        if let Some(limit) = intent.limit {
            if limit == 0 || limit > MAX_LIMIT {
                return Err(invalid(format!("limit {} is outside 1..={}", limit, MAX_LIMIT)));
            }
        }

        Ok(())
    }

    fn check_dimension(&self, name: &str) -> Result<()> {
        match self.registry.dimension(name) {
            Some(_) => Ok(()),
            None => Err(invalid(format!("unknown dimension '{}'", name))),
        }
    }

    fn check_filter(&self, filter: &FilterClause) -> Result<()> {
        self.check_dimension(&filter.dimension)?;
        if filter.values.is_empty() {
            return Err(invalid(format!("filter on '{}' has no values", filter.dimension)));
        }
        if filter.operator.is_single_valued() && filter.values.len() != 1 {
            return Err(invalid(format!(
                "filter on '{}' takes exactly one value, got {}",
                filter.dimension,
                filter.values.len()
            )));
        }
        for value in &filter.values {
            let ok = match value {
                serde_json::Value::String(_) => true,
                serde_json::Value::Number(n) => n.as_f64().map_or(false, f64::is_finite),
                _ => false,
            };
            if !ok {
                return Err(invalid(format!(
                    "filter on '{}' has unsupported value {}",
                    filter.dimension, value
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> PipelineError {
    PipelineError::Validation(message)
}
