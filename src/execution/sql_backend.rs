//! Fallback backend: compile to SQL, run on a storage engine.

use crate::compiler::{QueryPlan, SqlCompiler};
use crate::error::Result;
use crate::execution::backend::{BackendOutput, QueryBackend};
use crate::execution::engine::StorageEngine;
use crate::execution::result::Row;
use crate::semantic::SemanticRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct SqlBackend {
    compiler: SqlCompiler,
    engine: Arc<dyn StorageEngine>,
}

impl SqlBackend {
    pub fn new(registry: Arc<dyn SemanticRegistry>, engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            compiler: SqlCompiler::new(registry),
            engine,
        }
    }
}

#[async_trait]
impl QueryBackend for SqlBackend {
    fn name(&self) -> String {
        format!("sql:{}", self.engine.name())
    }

    async fn execute(&self, plan: &QueryPlan<'_>) -> Result<BackendOutput> {
        let compiled = self.compiler.compile(plan, self.engine.dialect())?;
        let result = self.engine.execute(&compiled).await?;
        debug!(
            engine = result.engine_name.as_str(),
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "SQL backend returned"
        );

        // Project onto the compiled column order; engines may reorder.
        let rows = result
            .rows
            .into_iter()
            .map(|mut row| {
                compiled
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.remove(c).unwrap_or(serde_json::Value::Null)))
                    .collect::<Row>()
            })
            .collect();

        Ok(BackendOutput {
            rows,
            columns: compiled.columns,
            generated_query: compiled.sql,
        })
    }
}
