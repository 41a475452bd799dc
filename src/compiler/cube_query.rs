//! Cube Query Builder
//!
//! Builds the JSON query accepted by a Cube-compatible semantic API. The
//! hierarchy filter derived from the access predicate is always the first
//! entry in `filters`.

use crate::compiler::QueryPlan;
use crate::error::{PipelineError, Result};
use crate::intent::{FilterClause, FilterOperator, SortDirection};
use crate::semantic::SemanticRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeFilter {
    pub member: String,
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeTimeDimension {
    pub dimension: String,
    pub date_range: [String; 2],
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeQuery {
    pub measures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<CubeFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_dimensions: Vec<CubeTimeDimension>,
    /// `[member, "asc" | "desc"]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCubeQuery {
    pub query: CubeQuery,
    /// Cube member to result column name.
    pub members: HashMap<String, String>,
    /// Result column order.
    pub columns: Vec<String>,
    pub tenant_id: String,
}

impl CompiledCubeQuery {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.query)?)
    }
}

pub struct CubeQueryBuilder {
    registry: Arc<dyn SemanticRegistry>,
}

impl CubeQueryBuilder {
    pub fn new(registry: Arc<dyn SemanticRegistry>) -> Self {
        Self { registry }
    }

    pub fn build(&self, plan: &QueryPlan<'_>) -> Result<CompiledCubeQuery> {
        let schema = self.registry.schema();
        let mut members = HashMap::new();
        let mut query = CubeQuery::default();

        for name in plan.metrics() {
            let metric = self
                .registry
                .metric(name)
                .ok_or_else(|| PipelineError::Validation(format!("unknown metric '{}'", name)))?;
            members.insert(metric.cube_member.clone(), metric.name.clone());
            query.measures.push(metric.cube_member.clone());
        }
        for name in plan.group_by() {
            let member = self.dimension_member(name)?;
            members.insert(member.clone(), name.to_string());
            query.dimensions.push(member);
        }

        if let Some((level, code)) = plan.predicate().territory() {
            let field = level.cube_field().ok_or_else(|| {
                PipelineError::ScopeViolation("territory scope without a cube field".to_string())
            })?;
            query.filters.push(CubeFilter {
                member: format!("{}.{}", schema.cube_hierarchy, field),
                operator: "equals".to_string(),
                values: vec![code.to_string()],
            });
        }
        for filter in plan.filters() {
            query.filters.push(self.filter(filter)?);
        }

        if let Some(window) = plan.window() {
            query.time_dimensions.push(CubeTimeDimension {
                dimension: schema.cube_time_member.clone(),
                date_range: [window.start.to_string(), window.end.to_string()],
            });
        }

        if let Some(sorting) = plan.ordering() {
            let member = match self.registry.metric(&sorting.field) {
                Some(metric) => metric.cube_member.clone(),
                None => self.dimension_member(&sorting.field)?,
            };
            let direction = match sorting.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            query.order.push((member, direction.to_string()));
        }
        query.limit = plan.limit();

        Ok(CompiledCubeQuery {
            query,
            members,
            columns: plan.columns(),
            tenant_id: plan.predicate().tenant_id().to_string(),
        })
    }

    fn dimension_member(&self, name: &str) -> Result<String> {
        self.registry
            .dimension(name)
            .map(|d| d.cube_member.clone())
            .ok_or_else(|| PipelineError::Validation(format!("unknown dimension '{}'", name)))
    }

    fn filter(&self, filter: &FilterClause) -> Result<CubeFilter> {
        let operator = match filter.operator {
            FilterOperator::Equals | FilterOperator::In => "equals",
            FilterOperator::NotEquals | FilterOperator::NotIn => "notEquals",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
        };
        let values = filter
            .values
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => Ok(s.clone()),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                other => Err(PipelineError::Validation(format!(
                    "unsupported filter value {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CubeFilter {
            member: self.dimension_member(&filter.dimension)?,
            operator: operator.to_string(),
            values,
        })
    }
}
