//! Semantic Intent
//!
//! Structured representation of "what the user wants". The identifier space
//! is part of the type: the interpreter can only produce
//! `SemanticIntent<Anonymous>`, and only the anonymization mapper turns that
//! into a `SemanticIntent<Real>`, the one type the access policy accepts.

use crate::error::{PipelineError, Result};
use crate::intent::time_window::TimeWindow;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Identifier space marker
pub trait IdentifierSpace:
    sealed::Sealed + std::fmt::Debug + Clone + Copy + PartialEq + Default + Send + Sync + 'static
{
    const LABEL: &'static str;
}

/// Identifiers are synthetic names handed to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anonymous;

/// Identifiers are real schema names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Real;

impl sealed::Sealed for Anonymous {}
impl sealed::Sealed for Real {}

impl IdentifierSpace for Anonymous {
    const LABEL: &'static str = "anonymous";
}

impl IdentifierSpace for Real {
    const LABEL: &'static str = "real";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Snapshot,
    Trend,
    Ranking,
    Comparison,
    Diagnostic,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Snapshot => "snapshot",
            IntentKind::Trend => "trend",
            IntentKind::Ranking => "ranking",
            IntentKind::Comparison => "comparison",
            IntentKind::Diagnostic => "diagnostic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricRequest {
    pub primary: String,
    #[serde(default)]
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        )
    }

    pub fn is_single_valued(&self) -> bool {
        !matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterClause {
    pub dimension: String,
    pub operator: FilterOperator,
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sorting {
    /// A requested metric or a grouping dimension.
    pub field: String,
    pub direction: SortDirection,
}

/// Position an identifier occupies inside an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRole {
    Metric,
    Dimension,
    /// Either a metric or a dimension.
    SortField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, bound(serialize = "", deserialize = ""))]
pub struct SemanticIntent<S: IdentifierSpace = Real> {
    pub intent: IntentKind,
    pub metric: MetricRequest,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    #[serde(default)]
    pub sorting: Option<Sorting>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub limit: Option<usize>,
    pub confidence: f64,
    #[serde(skip)]
    space: PhantomData<S>,
}

impl<S: IdentifierSpace> SemanticIntent<S> {
    pub fn new(intent: IntentKind, primary_metric: impl Into<String>) -> Self {
        Self {
            intent,
            metric: MetricRequest {
                primary: primary_metric.into(),
                secondary: Vec::new(),
            },
            group_by: Vec::new(),
            filters: Vec::new(),
            sorting: None,
            time_window: None,
            limit: None,
            confidence: 1.0,
            space: PhantomData,
        }
    }

    pub fn with_secondary_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric.secondary.push(metric.into());
        self
    }

    pub fn with_group_by(mut self, dimension: impl Into<String>) -> Self {
        self.group_by.push(dimension.into());
        self
    }

    pub fn with_filter(
        mut self,
        dimension: impl Into<String>,
        operator: FilterOperator,
        values: Vec<serde_json::Value>,
    ) -> Self {
        self.filters.push(FilterClause {
            dimension: dimension.into(),
            operator,
            values,
        });
        self
    }

    pub fn with_sorting(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorting = Some(Sorting {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn with_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn space(&self) -> &'static str {
        S::LABEL
    }

    /// Primary metric first, then secondaries in request order.
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.metric.primary.as_str())
            .chain(self.metric.secondary.iter().map(String::as_str))
    }

    /// Rewrites every identifier into another space. Stops at the first
    /// identifier the mapping rejects.
    pub(crate) fn try_map_identifiers<T, F>(self, mut map: F) -> Result<SemanticIntent<T>>
    where
        T: IdentifierSpace,
        F: FnMut(IdentifierRole, &str) -> Result<String>,
    {
        let primary = map(IdentifierRole::Metric, &self.metric.primary)?;
        let secondary = self
            .metric
            .secondary
            .iter()
            .map(|m| map(IdentifierRole::Metric, m))
            .collect::<Result<Vec<_>>>()?;
        let group_by = self
            .group_by
            .iter()
            .map(|d| map(IdentifierRole::Dimension, d))
            .collect::<Result<Vec<_>>>()?;
        let filters = self
            .filters
            .into_iter()
            .map(|f| {
                Ok(FilterClause {
                    dimension: map(IdentifierRole::Dimension, &f.dimension)?,
                    operator: f.operator,
                    values: f.values,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let sorting = match self.sorting {
            Some(s) => Some(Sorting {
                field: map(IdentifierRole::SortField, &s.field)?,
                direction: s.direction,
            }),
            None => None,
        };

        Ok(SemanticIntent {
            intent: self.intent,
            metric: MetricRequest { primary, secondary },
            group_by,
            filters,
            sorting,
            time_window: self.time_window,
            limit: self.limit,
            confidence: self.confidence,
            space: PhantomData,
        })
    }
}

impl SemanticIntent<Anonymous> {
    /// Parses interpreter output. Unknown fields are rejected.
    pub fn from_interpreter_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            PipelineError::Interpreter(format!("malformed intent from interpreter: {}", e))
        })
    }
}
