//! Polars Execution Engine
//!
//! Embedded analytical store. Each tenant owns its own set of in-memory
//! frames; a query only ever sees the frames of the tenant it was compiled
//! for, registered into a fresh SQL context.

use crate::compiler::{CompiledQuery, SqlDialect};
use crate::error::{PipelineError, Result};
use crate::execution::engine::StorageEngine;
use crate::execution::result::QueryResult;
use crate::security::validate_tenant_id;
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub struct PolarsEngine {
    tables: HashMap<String, HashMap<String, DataFrame>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl PolarsEngine {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        Self {
            tables: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            acquire_timeout,
        }
    }

    /// Registers `df` under `table` for `tenant_id` only.
    pub fn register_table(
        &mut self,
        tenant_id: &str,
        table: impl Into<String>,
        df: DataFrame,
    ) -> Result<()> {
        validate_tenant_id(tenant_id)?;
        self.tables
            .entry(tenant_id.to_string())
            .or_default()
            .insert(table.into(), df);
        Ok(())
    }

    /// Loads `<dir>/<tenant>/<table>.csv` as table `client_<tenant>_<table>`.
    pub fn load_csv_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for tenant_dir in std::fs::read_dir(dir)? {
            let tenant_dir = tenant_dir?.path();
            if !tenant_dir.is_dir() {
                continue;
            }
            let tenant_id = match tenant_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            for file in std::fs::read_dir(&tenant_dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                    continue;
                }
                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem.to_string(),
                    None => continue,
                };
                let df = LazyCsvReader::new(&path)
                    .with_has_header(true)
                    .finish()
                    .and_then(|lf| lf.collect())
                    .map_err(|e| {
                        PipelineError::Config(format!("Failed to load CSV {}: {}", path.display(), e))
                    })?;
                let table = format!("client_{}_{}", tenant_id, stem);
                info!(tenant = %tenant_id, table = %table, rows = df.height(), "Loaded table");
                self.register_table(&tenant_id, table, df)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[async_trait]
impl StorageEngine for PolarsEngine {
    fn name(&self) -> &'static str {
        "polars"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Embedded
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<QueryResult> {
        if query.dialect != SqlDialect::Embedded {
            return Err(PipelineError::Validation(format!(
                "polars engine cannot run {} SQL",
                query.dialect.as_str()
            )));
        }
        let frames = self.tables.get(&query.tenant_id).cloned().ok_or_else(|| {
            PipelineError::BackendFailure {
                backend: "polars".to_string(),
                message: format!("no tables registered for tenant '{}'", query.tenant_id),
            }
        })?;

        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| PipelineError::Timeout {
                backend: "polars".to_string(),
                timeout_ms: self.acquire_timeout.as_millis() as u64,
            })?
            .map_err(|e| PipelineError::BackendFailure {
                backend: "polars".to_string(),
                message: e.to_string(),
            })?;

        let start_time = Instant::now();
        let sql = query.sql.clone();
        debug!(tenant = %query.tenant_id, "Executing query with Polars: {}", sql);

        let df = tokio::task::spawn_blocking(move || -> Result<DataFrame> {
            let _permit = permit;
            let mut ctx = SQLContext::new();
            for (name, df) in frames {
                ctx.register(&name, df.lazy());
            }
            Ok(ctx.execute(&sql)?.collect()?)
        })
        .await
        .map_err(|e| PipelineError::BackendFailure {
            backend: "polars".to_string(),
            message: format!("query task failed: {}", e),
        })??;

        let execution_time = start_time.elapsed().as_millis() as u64;
        QueryResult::from_dataframe(&df, self.name(), execution_time)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.tables.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> PolarsEngine {
        let mut engine = PolarsEngine::new(2, Duration::from_secs(1));
        let nestle = df! {
            "brand" => &["Maggi", "KitKat", "Maggi"],
            "asm_code" => &["ASM-N01", "ASM-N01", "ASM-N02"],
            "net_value" => &[100.0, 50.0, 900.0],
        }
        .unwrap();
        let itc = df! {
            "brand" => &["Aashirvaad"],
            "asm_code" => &["ASM-I01"],
            "net_value" => &[10.0],
        }
        .unwrap();
        engine
            .register_table("nestle", "client_nestle_secondary_sales", nestle)
            .unwrap();
        engine.register_table("itc", "client_itc_secondary_sales", itc).unwrap();
        engine
    }

    fn query(tenant: &str, sql: &str) -> CompiledQuery {
        CompiledQuery {
            sql: sql.to_string(),
            columns: vec!["brand".to_string(), "sales".to_string()],
            tenant_id: tenant.to_string(),
            dialect: SqlDialect::Embedded,
        }
    }

    #[tokio::test]
    async fn test_executes_tenant_sql() {
        let result = engine()
            .execute(&query(
                "nestle",
                "SELECT brand AS brand, SUM(net_value) AS sales FROM client_nestle_secondary_sales \
                 WHERE asm_code = 'ASM-N01' GROUP BY brand ORDER BY sales DESC",
            ))
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["brand"], json!("Maggi"));
        assert_eq!(result.rows[0]["sales"], json!(100.0));
    }

    #[tokio::test]
    async fn test_other_tenant_tables_are_invisible() {
        let err = engine()
            .execute(&query(
                "itc",
                "SELECT brand AS brand FROM client_nestle_secondary_sales",
            ))
            .await
            .unwrap_err();
        assert!(err.triggers_failover());

        let err = engine()
            .execute(&query("unilever", "SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BackendFailure { .. }));
    }
}
