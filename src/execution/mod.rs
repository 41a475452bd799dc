//! Execution Layer
//!
//! Two interchangeable backends behind `QueryBackend`: the cube service
//! (primary) and compiled SQL on a `StorageEngine` (fallback). `Executor`
//! drives the failover between them.

pub mod backend;
pub mod cube_backend;
pub mod diagnostic;
pub mod engine;
pub mod failover;
pub mod polars_engine;
pub mod postgres_engine;
pub mod result;
pub mod sql_backend;

pub use backend::{BackendOutput, QueryBackend};
pub use cube_backend::CubeBackend;
pub use diagnostic::{DiagnosticOrchestrator, DiagnosticSummary, TrendDirection};
pub use engine::StorageEngine;
pub use failover::{order_rows, AttemptOutcome, BackendRun, Executor, FailoverState};
pub use polars_engine::PolarsEngine;
pub use postgres_engine::PostgresEngine;
pub use result::{BackendRole, ExecutionResult, QueryResult, Row};
pub use sql_backend::SqlBackend;
