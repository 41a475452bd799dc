//! Query Backend Trait - the two interchangeable execution paths
//!
//! A backend receives a `QueryPlan`, which can only be built from a
//! `SecuredIntent`, and is responsible for carrying the plan's predicate into
//! whatever it sends downstream.

use crate::compiler::QueryPlan;
use crate::error::Result;
use crate::execution::result::Row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rows plus the query text that produced them, for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub generated_query: String,
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Backend name for telemetry (e.g., "cube", "sql:embedded")
    fn name(&self) -> String;

    async fn execute(&self, plan: &QueryPlan<'_>) -> Result<BackendOutput>;
}
