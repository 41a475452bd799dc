//! PostgreSQL Execution Engine
//!
//! Star schema per tenant (`client_<tenant>`), reached through a bounded
//! `sqlx` pool. Every query runs in a read-only transaction that is rolled
//! back afterwards.

use crate::compiler::{CompiledQuery, SqlDialect};
use crate::error::{PipelineError, Result};
use crate::execution::engine::StorageEngine;
use crate::execution::result::{float, QueryResult, Row};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct PostgresEngine {
    pool: PgPool,
}

impl PostgresEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool that blocks up to `acquire_timeout` once
    /// `max_connections` are in use.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        // Test the connection
        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(max_connections, "Connected to PostgreSQL");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl StorageEngine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<QueryResult> {
        if query.dialect != SqlDialect::Postgres {
            return Err(PipelineError::Validation(format!(
                "postgres engine cannot run {} SQL",
                query.dialect.as_str()
            )));
        }
        let start_time = Instant::now();
        debug!(tenant = %query.tenant_id, "Executing query with PostgreSQL: {}", query.sql);

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let pg_rows = sqlx::query(&query.sql).fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        let rows = pg_rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        let execution_time = start_time.elapsed().as_millis() as u64;
        Ok(QueryResult::new(query.columns.clone(), rows, self.name(), execution_time))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(sqlx::query("SELECT 1").execute(&self.pool).await.is_ok())
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(float),
            "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(|f| float(f as f64)),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Into::into),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Into::into),
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Into::into),
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Into::into),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(idx)?
                .map(|d| d.to_string().into()),
            _ => row.try_get::<Option<String>, _>(idx)?.map(Into::into),
        };
        out.insert(
            column.name().to_string(),
            value.unwrap_or(serde_json::Value::Null),
        );
    }
    Ok(out)
}
