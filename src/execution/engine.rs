//! Storage Engine Trait - contract for the analytical stores behind the
//! SQL backend
//!
//! An engine takes compiled query text and returns rows. It is read-only and
//! never sees an intent, only SQL that already carries the access predicate.

use crate::compiler::{CompiledQuery, SqlDialect};
use crate::error::Result;
use crate::execution::result::QueryResult;
use async_trait::async_trait;

#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Engine name (e.g., "polars", "postgres")
    fn name(&self) -> &'static str;

    /// Table layout the compiler must target for this engine.
    fn dialect(&self) -> SqlDialect;

    async fn execute(&self, query: &CompiledQuery) -> Result<QueryResult>;

    /// Check if engine is available/healthy
    async fn health_check(&self) -> Result<bool>;
}
