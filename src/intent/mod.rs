//! Intent Layer

pub mod semantic_intent;
pub mod time_window;

pub use semantic_intent::{
    Anonymous, FilterClause, FilterOperator, IdentifierRole, IdentifierSpace, IntentKind,
    MetricRequest, Real, SemanticIntent, SortDirection, Sorting,
};
pub use time_window::{ResolvedWindow, TimeWindow};
