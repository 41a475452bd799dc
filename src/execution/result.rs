//! Query Result - Standardized result formats from engines and backends

use crate::error::{PipelineError, Result};
use crate::execution::diagnostic::DiagnosticSummary;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One result row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows returned by a storage engine for one query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub engine_name: String,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>, engine_name: &str, execution_time_ms: u64) -> Self {
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time_ms,
            engine_name: engine_name.to_string(),
        }
    }

    pub fn from_dataframe(df: &DataFrame, engine_name: &str, execution_time_ms: u64) -> Result<Self> {
        let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        let rows = dataframe_to_rows(df)?;
        Ok(Self::new(columns, rows, engine_name, execution_time_ms))
    }
}

/// Which side of the failover pair produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Primary,
    Fallback,
}

impl BackendRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendRole::Primary => "primary",
            BackendRole::Fallback => "fallback",
        }
    }
}

/// Final result of executing one secured intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub backend_used: BackendRole,
    /// Concrete backend, e.g. `cube` or `sql:embedded`.
    pub backend_name: String,
    pub generated_query: String,
    pub row_count: usize,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<DiagnosticSummary>,
}

fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<Row>> {
    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = Row::new();
        for series in df.get_columns() {
            row.insert(series.name().to_string(), series_to_json_value(series, row_idx)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| PipelineError::Polars(format!("Failed to get value: {}", e)))?;

    let value = match any_val {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(b),
        AnyValue::Int8(i) => i.into(),
        AnyValue::Int16(i) => i.into(),
        AnyValue::Int32(i) => i.into(),
        AnyValue::Int64(i) => i.into(),
        AnyValue::UInt8(u) => u.into(),
        AnyValue::UInt16(u) => u.into(),
        AnyValue::UInt32(u) => u.into(),
        AnyValue::UInt64(u) => u.into(),
        AnyValue::Float32(f) => float(f as f64),
        AnyValue::Float64(f) => float(f),
        other => match other.get_str() {
            Some(s) => serde_json::Value::String(s.to_string()),
            None => serde_json::Value::String(other.to_string()),
        },
    };
    Ok(value)
}

pub(crate) fn float(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Orders JSON scalars: numbers numerically, strings lexically, nulls last.
pub(crate) fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dataframe_rows() {
        let df = df! {
            "brand" => &["Maggi", "KitKat"],
            "secondary_sales_value" => &[1250.5, 980.0],
        }
        .unwrap();
        let result = QueryResult::from_dataframe(&df, "polars", 3).unwrap();
        assert_eq!(result.columns, vec!["brand", "secondary_sales_value"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["brand"], json!("Maggi"));
        assert_eq!(result.rows[1]["secondary_sales_value"], json!(980.0));
    }

    #[test]
    fn test_nulls_sort_last() {
        let (one, null) = (json!(1), json!(null));
        assert_eq!(compare_values(Some(&one), Some(&null)), Ordering::Less);
        assert_eq!(compare_values(None, Some(&one)), Ordering::Greater);
        assert_eq!(
            compare_values(Some(&json!("a")), Some(&json!("b"))),
            Ordering::Less
        );
    }
}
