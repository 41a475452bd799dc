//! Observability
//!
//! Request-level audit records. Process logging goes through `tracing`.

pub mod audit;

pub use audit::{AuditOutcome, AuditRecord, AuditTrail};
