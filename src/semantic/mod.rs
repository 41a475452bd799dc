//! Semantic Layer
//!
//! The real schema vocabulary: metrics, dimensions and the star schema
//! they compile against.

pub mod dimension;
pub mod metric;
pub mod registry;

pub use dimension::{SemanticDimension, TimeGrain};
pub use metric::{Aggregation, SemanticMetric};
pub use registry::{DimensionTable, InMemorySemanticRegistry, JoinKey, SemanticRegistry, StarSchema};
