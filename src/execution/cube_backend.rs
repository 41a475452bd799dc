//! Primary backend: a Cube-compatible semantic API over HTTP.
//!
//! Each call carries a freshly signed token scoped to the plan's predicate,
//! and the hierarchy filter is part of the query body itself.

use crate::compiler::{CompiledCubeQuery, CubeQueryBuilder, QueryPlan};
use crate::error::{PipelineError, Result};
use crate::execution::backend::{BackendOutput, QueryBackend};
use crate::execution::result::{float, Row};
use crate::security::CubeTokenSigner;
use crate::semantic::SemanticRegistry;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CubeBackend {
    client: reqwest::Client,
    base_url: String,
    signer: CubeTokenSigner,
    builder: CubeQueryBuilder,
}

impl CubeBackend {
    pub fn new(
        base_url: impl Into<String>,
        signer: CubeTokenSigner,
        registry: Arc<dyn SemanticRegistry>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            builder: CubeQueryBuilder::new(registry),
        }
    }

    /// SQL the service generated for `query`; the JSON query text when the
    /// service cannot provide it.
    async fn generated_sql(&self, compiled: &CompiledCubeQuery, token: &str, json: &str) -> String {
        let response = self
            .client
            .get(format!("{}/cubejs-api/v1/sql", self.base_url))
            .header("Authorization", token)
            .query(&[("query", json)])
            .send()
            .await;

        let body: Option<serde_json::Value> = match response {
            Ok(r) if r.status().is_success() => r.json().await.ok(),
            _ => None,
        };
        match body
            .as_ref()
            .and_then(|b| b["sql"]["sql"][0].as_str())
        {
            Some(sql) => sql.to_string(),
            None => {
                debug!(tenant = %compiled.tenant_id, "Cube SQL endpoint unavailable, auditing JSON query");
                json.to_string()
            }
        }
    }
}

fn failure(message: impl Into<String>) -> PipelineError {
    PipelineError::BackendFailure {
        backend: "cube".to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl QueryBackend for CubeBackend {
    fn name(&self) -> String {
        "cube".to_string()
    }

    async fn execute(&self, plan: &QueryPlan<'_>) -> Result<BackendOutput> {
        let compiled = self.builder.build(plan)?;
        let token = self.signer.sign(plan.predicate())?;
        let json = compiled.to_json()?;
        debug!(tenant = %compiled.tenant_id, query = %json, "Sending cube query");

        let response = self
            .client
            .post(format!("{}/cubejs-api/v1/load", self.base_url))
            .header("Authorization", &token)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "query": compiled.query }))
            .send()
            .await
            .map_err(|e| failure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(failure(format!("HTTP {}: {}", status, error_text)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| failure(format!("malformed response: {}", e)))?;
        if let Some(error) = body.get("error") {
            return Err(failure(error.to_string()));
        }
        let data = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| failure("response has no data array"))?;

        let metrics: HashSet<&str> = plan.metrics().into_iter().collect();
        let mut rows = Vec::with_capacity(data.len());
        for record in data {
            let record = record
                .as_object()
                .ok_or_else(|| failure("data entry is not an object"))?;
            rows.push(map_record(record, &compiled, &metrics));
        }

        let generated_query = self.generated_sql(&compiled, &token, &json).await;
        if generated_query == json {
            warn!(tenant = %compiled.tenant_id, "Audit record carries cube JSON instead of SQL");
        }

        Ok(BackendOutput {
            rows,
            columns: compiled.columns,
            generated_query,
        })
    }
}

/// Re-keys a cube record by result column; metric strings become numbers.
fn map_record(
    record: &serde_json::Map<String, serde_json::Value>,
    compiled: &CompiledCubeQuery,
    metrics: &HashSet<&str>,
) -> Row {
    let mut row = Row::new();
    for column in &compiled.columns {
        let value = compiled
            .members
            .iter()
            .find(|(_, c)| *c == column)
            .and_then(|(member, _)| record.get(member))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let value = match value {
            serde_json::Value::String(s) if metrics.contains(column.as_str()) => {
                match s.parse::<f64>() {
                    Ok(n) => float(n),
                    Err(_) => serde_json::Value::String(s),
                }
            }
            other => other,
        };
        row.insert(column.clone(), value);
    }
    row
}
