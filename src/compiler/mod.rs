//! Query Compiler
//!
//! Both backends compile from the same `QueryPlan`, which borrows the
//! `SecuredIntent` and therefore its predicate. Neither compiler can be
//! handed an intent without one.

pub mod cube_query;
pub mod sql_compiler;
pub mod validator;

pub use cube_query::{CompiledCubeQuery, CubeFilter, CubeQuery, CubeQueryBuilder, CubeTimeDimension};
pub use sql_compiler::{CompiledQuery, SqlCompiler, SqlDialect};
pub use validator::IntentValidator;

use crate::intent::{FilterClause, ResolvedWindow, SortDirection, Sorting};
use crate::security::{AccessPredicate, SecuredIntent};

/// What a single backend call computes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    /// Exactly what the intent asks for.
    Requested,
    /// All metrics, no grouping.
    Total,
    /// All metrics grouped by one dimension, unsorted and unlimited.
    Breakdown { dimension: String },
}

#[derive(Debug, Clone)]
pub struct QueryPlan<'a> {
    secured: &'a SecuredIntent,
    window: Option<ResolvedWindow>,
    shape: QueryShape,
}

impl<'a> QueryPlan<'a> {
    pub fn new(secured: &'a SecuredIntent, window: Option<ResolvedWindow>) -> Self {
        Self {
            secured,
            window,
            shape: QueryShape::Requested,
        }
    }

    pub fn total(secured: &'a SecuredIntent, window: Option<ResolvedWindow>) -> Self {
        Self {
            secured,
            window,
            shape: QueryShape::Total,
        }
    }

    pub fn breakdown(
        secured: &'a SecuredIntent,
        window: Option<ResolvedWindow>,
        dimension: impl Into<String>,
    ) -> Self {
        Self {
            secured,
            window,
            shape: QueryShape::Breakdown {
                dimension: dimension.into(),
            },
        }
    }

    pub fn secured(&self) -> &'a SecuredIntent {
        self.secured
    }

    pub fn predicate(&self) -> &'a AccessPredicate {
        self.secured.predicate()
    }

    pub fn window(&self) -> Option<ResolvedWindow> {
        self.window
    }

    pub fn shape(&self) -> &QueryShape {
        &self.shape
    }

    pub fn metrics(&self) -> Vec<&'a str> {
        self.secured.intent().metrics().collect()
    }

    pub fn group_by(&self) -> Vec<&str> {
        match &self.shape {
            QueryShape::Requested => self
                .secured
                .intent()
                .group_by
                .iter()
                .map(String::as_str)
                .collect(),
            QueryShape::Total => Vec::new(),
            QueryShape::Breakdown { dimension } => vec![dimension.as_str()],
        }
    }

    pub fn filters(&self) -> &'a [FilterClause] {
        &self.secured.intent().filters
    }

    pub fn sorting(&self) -> Option<&'a Sorting> {
        match self.shape {
            QueryShape::Requested => self.secured.intent().sorting.as_ref(),
            _ => None,
        }
    }

    /// Ordering the backend must apply before any limit. A limited query
    /// without an explicit sort ranks by the primary metric, descending.
    pub fn ordering(&self) -> Option<Sorting> {
        match (self.sorting(), self.limit()) {
            (Some(sorting), _) => Some(sorting.clone()),
            (None, Some(_)) => Some(Sorting {
                field: self.secured.intent().metric.primary.clone(),
                direction: SortDirection::Desc,
            }),
            (None, None) => None,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self.shape {
            QueryShape::Requested => self.secured.intent().limit,
            _ => None,
        }
    }

    /// Output column order: grouping dimensions, then metrics.
    pub fn columns(&self) -> Vec<String> {
        self.group_by()
            .into_iter()
            .chain(self.metrics())
            .map(str::to_string)
            .collect()
    }
}
