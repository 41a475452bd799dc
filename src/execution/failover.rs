//! Failover state machine and the executor that drives it
//!
//! ```text
//! TryingPrimary --ok--> Succeeded(Primary)
//!      |  recoverable error / timeout
//!      v
//! PrimaryFailed --> TryingFallback --ok--> Succeeded(Fallback)
//!                        | error
//!                        v
//!                      Failed
//! ```
//!
//! The fallback is tried at most once and the primary is never retried.

use crate::compiler::{IntentValidator, QueryPlan};
use crate::error::{PipelineError, Result};
use crate::execution::backend::{BackendOutput, QueryBackend};
use crate::execution::diagnostic::DiagnosticOrchestrator;
use crate::execution::result::{compare_values, BackendRole, ExecutionResult, Row};
use crate::intent::{IntentKind, Sorting, SortDirection};
use crate::security::SecuredIntent;
use crate::semantic::SemanticRegistry;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    TryingPrimary,
    PrimaryFailed,
    TryingFallback,
    Succeeded(BackendRole),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// `recoverable` errors move the primary attempt to the fallback.
    Failed { recoverable: bool },
}

impl FailoverState {
    pub fn start(has_primary: bool) -> Self {
        if has_primary {
            FailoverState::TryingPrimary
        } else {
            FailoverState::TryingFallback
        }
    }

    /// Backend an attempt in this state goes to.
    pub fn attempting(&self) -> Option<BackendRole> {
        match self {
            FailoverState::TryingPrimary => Some(BackendRole::Primary),
            FailoverState::TryingFallback => Some(BackendRole::Fallback),
            _ => None,
        }
    }

    pub fn on_attempt(self, outcome: AttemptOutcome) -> Self {
        match (self, outcome) {
            (FailoverState::TryingPrimary, AttemptOutcome::Succeeded) => {
                FailoverState::Succeeded(BackendRole::Primary)
            }
            (FailoverState::TryingPrimary, AttemptOutcome::Failed { recoverable: true }) => {
                FailoverState::PrimaryFailed
            }
            (FailoverState::TryingFallback, AttemptOutcome::Succeeded) => {
                FailoverState::Succeeded(BackendRole::Fallback)
            }
            (FailoverState::TryingPrimary, AttemptOutcome::Failed { .. })
            | (FailoverState::TryingFallback, AttemptOutcome::Failed { .. }) => FailoverState::Failed,
            (state, _) => state,
        }
    }

    pub fn begin_fallback(self) -> Self {
        match self {
            FailoverState::PrimaryFailed => FailoverState::TryingFallback,
            state => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailoverState::Succeeded(_) | FailoverState::Failed)
    }
}

/// Output of one plan after failover resolution.
#[derive(Debug, Clone)]
pub struct BackendRun {
    pub role: BackendRole,
    pub backend: String,
    pub output: BackendOutput,
}

pub struct Executor {
    registry: Arc<dyn SemanticRegistry>,
    validator: IntentValidator,
    primary: Option<Arc<dyn QueryBackend>>,
    fallback: Arc<dyn QueryBackend>,
    primary_timeout: Duration,
    fallback_timeout: Duration,
}

impl Executor {
    pub fn new(registry: Arc<dyn SemanticRegistry>, fallback: Arc<dyn QueryBackend>) -> Self {
        Self {
            validator: IntentValidator::new(registry.clone()),
            registry,
            primary: None,
            fallback,
            primary_timeout: Duration::from_secs(10),
            fallback_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_primary(mut self, primary: Arc<dyn QueryBackend>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_timeouts(mut self, primary: Duration, fallback: Duration) -> Self {
        self.primary_timeout = primary;
        self.fallback_timeout = fallback;
        self
    }

    pub fn registry(&self) -> &Arc<dyn SemanticRegistry> {
        &self.registry
    }

    /// Validates, then runs the intent with failover. Time windows resolve
    /// against `anchor`.
    pub async fn execute(&self, secured: &SecuredIntent, anchor: NaiveDate) -> Result<ExecutionResult> {
        let start = Instant::now();
        let intent = secured.intent();
        self.validator.validate(intent)?;

        if intent.intent == IntentKind::Diagnostic {
            return DiagnosticOrchestrator::new(self).run(secured, anchor, start).await;
        }

        let window = intent.time_window.map(|w| w.resolve(anchor)).transpose()?;
        let plan = QueryPlan::new(secured, window);
        let run = self.run(&plan).await?;

        let mut rows = run.output.rows;
        order_rows(&mut rows, intent.sorting.as_ref(), &intent.metric.primary);
        if let Some(limit) = intent.limit {
            rows.truncate(limit);
        }

        Ok(ExecutionResult {
            row_count: rows.len(),
            rows,
            columns: run.output.columns,
            backend_used: run.role,
            backend_name: run.backend,
            generated_query: run.output.generated_query,
            elapsed_ms: start.elapsed().as_millis() as u64,
            diagnostic: None,
        })
    }

    /// Runs one plan through the state machine.
    pub async fn run(&self, plan: &QueryPlan<'_>) -> Result<BackendRun> {
        let predicate = plan.predicate();
        let mut state = FailoverState::start(self.primary.is_some());
        let mut errors: Vec<(BackendRole, PipelineError)> = Vec::new();
        let mut output = None;

        loop {
            state = match state {
                FailoverState::PrimaryFailed => {
                    warn!(predicate = %predicate, "Primary backend failed, failing over");
                    state.begin_fallback()
                }
                FailoverState::Succeeded(role) => {
                    let (backend, output) = match output {
                        Some(found) => found,
                        None => {
                            return Err(PipelineError::ExecutionFailed(
                                "backend succeeded without output".to_string(),
                            ))
                        }
                    };
                    info!(backend_used = role.as_str(), backend = %backend, "Query executed");
                    return Ok(BackendRun { role, backend, output });
                }
                FailoverState::Failed => {
                    let err = terminal_error(errors);
                    error!(predicate = %predicate, "Execution failed: {}", err);
                    return Err(err);
                }
                FailoverState::TryingPrimary | FailoverState::TryingFallback => {
                    let role = match state.attempting() {
                        Some(role) => role,
                        None => return Err(PipelineError::ExecutionFailed("invalid state".into())),
                    };
                    let (backend, timeout) = match (role, &self.primary) {
                        (BackendRole::Primary, Some(primary)) => (primary, self.primary_timeout),
                        _ => (&self.fallback, self.fallback_timeout),
                    };
                    match attempt(backend.as_ref(), plan, timeout).await {
                        Ok(out) => {
                            output = Some((backend.name(), out));
                            state.on_attempt(AttemptOutcome::Succeeded)
                        }
                        Err(e) => {
                            debug!(backend = %backend.name(), "Attempt failed: {}", e);
                            let recoverable = e.triggers_failover();
                            errors.push((role, e));
                            state.on_attempt(AttemptOutcome::Failed { recoverable })
                        }
                    }
                }
            };
        }
    }
}

/// One bounded backend call; the future is dropped on timeout, releasing
/// whatever it held before any fallback starts.
async fn attempt(
    backend: &dyn QueryBackend,
    plan: &QueryPlan<'_>,
    timeout: Duration,
) -> Result<BackendOutput> {
    match tokio::time::timeout(timeout, backend.execute(plan)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            backend: backend.name(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Denials and validation errors surface as they are; backend errors become
/// `ExecutionFailed` naming every attempt.
fn terminal_error(mut errors: Vec<(BackendRole, PipelineError)>) -> PipelineError {
    if let Some(pos) = errors.iter().position(|(_, e)| !e.triggers_failover()) {
        return errors.swap_remove(pos).1;
    }
    let detail = errors
        .iter()
        .map(|(role, e)| format!("{}: {}", role.as_str(), e))
        .collect::<Vec<_>>()
        .join("; ");
    PipelineError::ExecutionFailed(detail)
}

/// Stable sort by the requested field, else the primary metric descending.
pub fn order_rows(rows: &mut [Row], sorting: Option<&Sorting>, primary_metric: &str) {
    let (field, direction) = match sorting {
        Some(s) => (s.field.as_str(), s.direction),
        None => (primary_metric, SortDirection::Desc),
    };
    rows.sort_by(|a, b| {
        let ord = compare_values(a.get(field), b.get(field));
        match direction {
            SortDirection::Asc => ord,
            // Nulls stay last in both directions.
            SortDirection::Desc => match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) if !x.is_null() && !y.is_null() => ord.reverse(),
                _ => ord,
            },
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_success() {
        let state = FailoverState::start(true).on_attempt(AttemptOutcome::Succeeded);
        assert_eq!(state, FailoverState::Succeeded(BackendRole::Primary));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_single_fallback_hop() {
        let state = FailoverState::start(true)
            .on_attempt(AttemptOutcome::Failed { recoverable: true });
        assert_eq!(state, FailoverState::PrimaryFailed);
        let state = state.begin_fallback();
        assert_eq!(state.attempting(), Some(BackendRole::Fallback));
        assert_eq!(
            state.on_attempt(AttemptOutcome::Succeeded),
            FailoverState::Succeeded(BackendRole::Fallback)
        );
        assert_eq!(
            state.on_attempt(AttemptOutcome::Failed { recoverable: true }),
            FailoverState::Failed
        );
    }

    #[test]
    fn test_unrecoverable_primary_error_is_terminal() {
        let state = FailoverState::start(true)
            .on_attempt(AttemptOutcome::Failed { recoverable: false });
        assert_eq!(state, FailoverState::Failed);
        assert_eq!(state.begin_fallback(), FailoverState::Failed);
    }

    #[test]
    fn test_no_primary_starts_at_fallback() {
        assert_eq!(FailoverState::start(false), FailoverState::TryingFallback);
    }

    #[test]
    fn test_terminal_error_prefers_denial() {
        let err = terminal_error(vec![
            (BackendRole::Primary, PipelineError::Validation("bad".into())),
        ]);
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = terminal_error(vec![
            (BackendRole::Primary, PipelineError::Timeout { backend: "cube".into(), timeout_ms: 5 }),
            (BackendRole::Fallback, PipelineError::Polars("boom".into())),
        ]);
        assert!(matches!(err, PipelineError::ExecutionFailed(_)));
    }

    #[test]
    fn test_order_rows_is_stable() {
        let row = |b: &str, v: f64| {
            json!({"brand": b, "secondary_sales_value": v})
                .as_object()
                .cloned()
                .unwrap()
        };
        let mut rows = vec![row("A", 1.0), row("B", 3.0), row("C", 1.0), row("D", 2.0)];
        order_rows(&mut rows, None, "secondary_sales_value");
        let brands: Vec<_> = rows.iter().map(|r| r["brand"].as_str().unwrap()).collect();
        assert_eq!(brands, vec!["B", "D", "A", "C"]);

        let asc = Sorting {
            field: "brand".into(),
            direction: SortDirection::Asc,
        };
        order_rows(&mut rows, Some(&asc), "secondary_sales_value");
        let brands: Vec<_> = rows.iter().map(|r| r["brand"].as_str().unwrap()).collect();
        assert_eq!(brands, vec!["A", "B", "C", "D"]);
    }
}
