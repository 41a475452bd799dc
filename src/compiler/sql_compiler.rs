//! SQL Compiler - deterministic SQL generation from a query plan
//!
//! The access predicate is always the first WHERE condition. Output is
//! parsed back with `sqlparser` before it is handed to an engine.

use crate::compiler::QueryPlan;
use crate::error::{PipelineError, Result};
use crate::intent::{FilterClause, FilterOperator};
use crate::semantic::{SemanticDimension, SemanticRegistry, StarSchema, TimeGrain};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::{GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::debug;

/// Storage layout a SQL engine expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    /// One denormalized table per tenant; columns are named after the
    /// dimension identifiers, plus fact and hierarchy-code columns.
    Embedded,
    /// Star schema in a `client_<tenant>` schema.
    Postgres,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Embedded => "embedded",
            SqlDialect::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    /// Result column order.
    pub columns: Vec<String>,
    pub tenant_id: String,
    pub dialect: SqlDialect,
}

pub struct SqlCompiler {
    registry: Arc<dyn SemanticRegistry>,
}

impl SqlCompiler {
    pub fn new(registry: Arc<dyn SemanticRegistry>) -> Self {
        Self { registry }
    }

    /// Name of a tenant's denormalized table in the embedded store.
    pub fn embedded_table(schema: &StarSchema, tenant_id: &str) -> String {
        format!("client_{}_{}", tenant_id, schema.embedded_table)
    }

    pub fn compile(&self, plan: &QueryPlan<'_>, dialect: SqlDialect) -> Result<CompiledQuery> {
        let schema = self.registry.schema();
        let group_by = plan
            .group_by()
            .into_iter()
            .map(|d| self.dimension(d))
            .collect::<Result<Vec<_>>>()?;

        // SELECT
        let mut select = Vec::new();
        for dimension in &group_by {
            select.push(format!(
                "{} AS {}",
                self.dimension_expr(schema, dimension, dialect),
                dimension.name
            ));
        }
        for name in plan.metrics() {
            let metric = self
                .registry
                .metric(name)
                .ok_or_else(|| PipelineError::Validation(format!("unknown metric '{}'", name)))?;
            let column = match dialect {
                SqlDialect::Embedded => metric.column.clone(),
                SqlDialect::Postgres => format!("{}.{}", schema.fact_alias, metric.column),
            };
            let aggregate = metric.aggregation.apply(&column);
            let aggregate = match dialect {
                SqlDialect::Embedded => aggregate,
                SqlDialect::Postgres => format!("CAST({} AS DOUBLE PRECISION)", aggregate),
            };
            select.push(format!("{} AS {}", aggregate, metric.name));
        }

        // FROM / JOIN
        let tenant_schema = plan.predicate().tenant_schema();
        let mut from = Vec::new();
        match dialect {
            SqlDialect::Embedded => {
                from.push(format!(
                    "FROM {}",
                    Self::embedded_table(schema, plan.predicate().tenant_id())
                ));
            }
            SqlDialect::Postgres => {
                from.push(format!(
                    "FROM {}.{} {}",
                    tenant_schema, schema.fact_table, schema.fact_alias
                ));
                for table in self.joined_tables(plan, &group_by)? {
                    let joined = schema.dimension_table(&table).ok_or_else(|| {
                        PipelineError::Config(format!("no join defined for table '{}'", table))
                    })?;
                    from.push(format!(
                        "JOIN {}.{} {} ON {}.{} = {}.{}",
                        tenant_schema,
                        joined.name,
                        joined.alias,
                        schema.fact_alias,
                        joined.join.fact_column,
                        joined.alias,
                        joined.join.dimension_column
                    ));
                }
            }
        }

        // WHERE: access predicate first
        let mut conditions = Vec::new();
        if let Some((level, code)) = plan.predicate().territory() {
            let column = level.code_column().ok_or_else(|| {
                PipelineError::ScopeViolation("territory scope without a code column".to_string())
            })?;
            let column = match dialect {
                SqlDialect::Embedded => column.to_string(),
                SqlDialect::Postgres => format!("{}.{}", self.hierarchy_alias()?, column),
            };
            conditions.push(format!("{} = {}", column, quote(code)));
        }
        if let Some(window) = plan.window() {
            match dialect {
                SqlDialect::Embedded => {
                    conditions.push(format!(
                        "{col} >= '{}' AND {col} <= '{}'",
                        window.start,
                        window.end,
                        col = schema.date_column
                    ));
                }
                SqlDialect::Postgres => {
                    conditions.push(format!(
                        "{}.{} BETWEEN DATE '{}' AND DATE '{}'",
                        schema.fact_alias, schema.date_column, window.start, window.end
                    ));
                }
            }
        }
        for filter in plan.filters() {
            let dimension = self.dimension(&filter.dimension)?;
            let expr = self.dimension_expr(schema, dimension, dialect);
            conditions.push(filter_condition(&expr, filter)?);
        }

        let mut parts = vec![format!("SELECT {}", select.join(", "))];
        parts.extend(from);
        if !conditions.is_empty() {
            parts.push(format!("WHERE {}", conditions.join(" AND ")));
        }
        if !group_by.is_empty() {
            parts.push(format!(
                "GROUP BY {}",
                group_by
                    .iter()
                    .map(|d| self.dimension_expr(schema, d, dialect))
                    .join(", ")
            ));
        }
        if let Some(sorting) = plan.ordering() {
            parts.push(format!("ORDER BY {} {}", sorting.field, sorting.direction.as_sql()));
        }
        if let Some(limit) = plan.limit() {
            parts.push(format!("LIMIT {}", limit));
        }

        let sql = parts.join(" ");
        check_parses(&sql, dialect)?;
        debug!(dialect = dialect.as_str(), sql = %sql, "Compiled SQL");

        Ok(CompiledQuery {
            sql,
            columns: plan.columns(),
            tenant_id: plan.predicate().tenant_id().to_string(),
            dialect,
        })
    }

    fn dimension(&self, name: &str) -> Result<&SemanticDimension> {
        self.registry
            .dimension(name)
            .ok_or_else(|| PipelineError::Validation(format!("unknown dimension '{}'", name)))
    }

    fn hierarchy_alias(&self) -> Result<&str> {
        let schema = self.registry.schema();
        schema
            .dimension_table(&schema.hierarchy_table)
            .map(|t| t.alias.as_str())
            .ok_or_else(|| PipelineError::Config("hierarchy table has no join".to_string()))
    }

    /// Dimension tables needed by grouping, filters and the predicate, in
    /// schema declaration order.
    fn joined_tables(
        &self,
        plan: &QueryPlan<'_>,
        group_by: &[&SemanticDimension],
    ) -> Result<Vec<String>> {
        let schema = self.registry.schema();
        let mut needed: Vec<&str> = group_by.iter().map(|d| d.table.as_str()).collect();
        for filter in plan.filters() {
            needed.push(self.dimension(&filter.dimension)?.table.as_str());
        }
        if plan.predicate().territory().is_some() {
            needed.push(schema.hierarchy_table.as_str());
        }
        Ok(schema
            .dimension_tables
            .iter()
            .filter(|t| needed.contains(&t.name.as_str()))
            .map(|t| t.name.clone())
            .collect())
    }

    fn dimension_expr(
        &self,
        schema: &StarSchema,
        dimension: &SemanticDimension,
        dialect: SqlDialect,
    ) -> String {
        match dialect {
            SqlDialect::Embedded => dimension.name.clone(),
            SqlDialect::Postgres => {
                let alias = if dimension.table == schema.fact_table {
                    schema.fact_alias.as_str()
                } else {
                    schema
                        .dimension_table(&dimension.table)
                        .map(|t| t.alias.as_str())
                        .unwrap_or(schema.fact_alias.as_str())
                };
                let column = format!("{}.{}", alias, dimension.column);
                match dimension.time_grain {
                    None => column,
                    Some(TimeGrain::Week) => format!("TO_CHAR({}, 'IYYY-\"W\"IW')", column),
                    Some(TimeGrain::Month) => format!("TO_CHAR({}, 'YYYY-MM')", column),
                    Some(TimeGrain::Quarter) => format!("TO_CHAR({}, 'YYYY-\"Q\"Q')", column),
                    Some(TimeGrain::Year) => format!("TO_CHAR({}, 'YYYY')", column),
                }
            }
        }
    }
}

fn filter_condition(expr: &str, filter: &FilterClause) -> Result<String> {
    let values = filter
        .values
        .iter()
        .map(literal)
        .collect::<Result<Vec<_>>>()?;
    let first = values.first().ok_or_else(|| {
        PipelineError::Validation(format!("filter on '{}' has no values", filter.dimension))
    })?;
    let condition = match filter.operator {
        FilterOperator::Equals => format!("{} = {}", expr, first),
        FilterOperator::NotEquals => format!("{} <> {}", expr, first),
        FilterOperator::Gt => format!("{} > {}", expr, first),
        FilterOperator::Gte => format!("{} >= {}", expr, first),
        FilterOperator::Lt => format!("{} < {}", expr, first),
        FilterOperator::Lte => format!("{} <= {}", expr, first),
        FilterOperator::In => format!("{} IN ({})", expr, values.join(", ")),
        FilterOperator::NotIn => format!("{} NOT IN ({})", expr, values.join(", ")),
    };
    Ok(condition)
}

fn literal(value: &serde_json::Value) -> Result<String> {
    match value {
        serde_json::Value::String(s) => Ok(quote(s)),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(PipelineError::Validation(format!(
            "unsupported filter value {}",
            other
        ))),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn check_parses(sql: &str, dialect: SqlDialect) -> Result<()> {
    let parsed = match dialect {
        SqlDialect::Embedded => Parser::parse_sql(&GenericDialect {}, sql),
        SqlDialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
    }
    .map_err(|e| PipelineError::Validation(format!("compiled SQL does not parse: {}", e)))?;

    match parsed.as_slice() {
        [Statement::Query(_)] => Ok(()),
        _ => Err(PipelineError::Validation(
            "compiled SQL must be exactly one SELECT statement".to_string(),
        )),
    }
}
