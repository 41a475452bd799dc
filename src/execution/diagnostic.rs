//! Diagnostic orchestration
//!
//! A diagnostic question ("why did sales drop") is answered by comparing the
//! requested window with the equal-length window before it: totals first,
//! then a per-member breakdown on the first grouping dimension. Every call
//! goes through the executor's failover, never straight to a backend.

use crate::compiler::QueryPlan;
use crate::error::Result;
use crate::execution::failover::{BackendRun, Executor};
use crate::execution::result::{compare_values, float, BackendRole, ExecutionResult, Row};
use crate::intent::{ResolvedWindow, TimeWindow};
use crate::security::SecuredIntent;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Window used when a diagnostic intent names none.
pub const DEFAULT_DIAGNOSTIC_WINDOW: TimeWindow = TimeWindow::LastWeeks(4);

/// Change below this many percent either way counts as stable.
const STABLE_BAND_PCT: f64 = 1.0;

/// Movers reported as insights.
const MAX_INSIGHTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
        }
    }

    fn from_change(current: f64, prior: f64, change_pct: Option<f64>) -> Self {
        match change_pct {
            Some(pct) if pct > STABLE_BAND_PCT => TrendDirection::Increasing,
            Some(pct) if pct < -STABLE_BAND_PCT => TrendDirection::Decreasing,
            Some(_) => TrendDirection::Stable,
            None if current > prior => TrendDirection::Increasing,
            None if current < prior => TrendDirection::Decreasing,
            None => TrendDirection::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    pub metric: String,
    pub current_window: ResolvedWindow,
    pub prior_window: ResolvedWindow,
    pub current_value: f64,
    pub prior_value: f64,
    /// `None` when the prior value is zero.
    pub change_pct: Option<f64>,
    pub direction: TrendDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_dimension: Option<String>,
    pub insights: Vec<String>,
}

pub struct DiagnosticOrchestrator<'a> {
    executor: &'a Executor,
}

impl<'a> DiagnosticOrchestrator<'a> {
    pub fn new(executor: &'a Executor) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        secured: &SecuredIntent,
        anchor: NaiveDate,
        start: Instant,
    ) -> Result<ExecutionResult> {
        let intent = secured.intent();
        let metric = intent.metric.primary.clone();
        let current_window = intent
            .time_window
            .unwrap_or(DEFAULT_DIAGNOSTIC_WINDOW)
            .resolve(anchor)?;
        let prior_window = current_window.prior()?;
        let mut runs = Vec::new();

        let current = self
            .executor
            .run(&QueryPlan::total(secured, Some(current_window)))
            .await?;
        let prior = self
            .executor
            .run(&QueryPlan::total(secured, Some(prior_window)))
            .await?;
        let current_value = first_number(&current, &metric);
        let prior_value = first_number(&prior, &metric);
        runs.push(current);
        runs.push(prior);

        let change_pct = pct_change(current_value, prior_value);
        let direction = TrendDirection::from_change(current_value, prior_value, change_pct);
        info!(
            metric = %metric,
            current = current_value,
            prior = prior_value,
            direction = direction.as_str(),
            "Diagnostic totals"
        );

        let prior_column = format!("prior_{}", metric);
        let breakdown_dimension = intent.group_by.first().cloned();
        let (columns, mut rows, insights) = match &breakdown_dimension {
            None => {
                let mut row = Row::new();
                row.insert(metric.clone(), float(current_value));
                row.insert(prior_column.clone(), float(prior_value));
                row.insert("change_pct".to_string(), change_pct.map(float).unwrap_or_default());
                (
                    vec![metric.clone(), prior_column, "change_pct".to_string()],
                    vec![row],
                    Vec::new(),
                )
            }
            Some(dimension) => {
                let current = self
                    .executor
                    .run(&QueryPlan::breakdown(secured, Some(current_window), dimension))
                    .await?;
                let prior = self
                    .executor
                    .run(&QueryPlan::breakdown(secured, Some(prior_window), dimension))
                    .await?;
                let movers = movers(dimension, &metric, &current, &prior);
                runs.push(current);
                runs.push(prior);

                let insights = movers
                    .iter()
                    .take(MAX_INSIGHTS)
                    .map(|m| m.insight(dimension))
                    .collect();
                let rows = movers
                    .iter()
                    .map(|m| m.row(dimension, &metric, &prior_column))
                    .collect();
                (
                    vec![
                        dimension.clone(),
                        metric.clone(),
                        prior_column,
                        "change_pct".to_string(),
                    ],
                    rows,
                    insights,
                )
            }
        };
        if let Some(limit) = intent.limit {
            rows.truncate(limit);
        }

        let backend_used = if runs.iter().any(|r| r.role == BackendRole::Fallback) {
            BackendRole::Fallback
        } else {
            BackendRole::Primary
        };
        let backend_name = runs
            .iter()
            .map(|r| r.backend.as_str())
            .fold(Vec::<&str>::new(), |mut names, name| {
                if !names.contains(&name) {
                    names.push(name);
                }
                names
            })
            .join("+");
        let generated_query = runs
            .iter()
            .map(|r| r.output.generated_query.as_str())
            .collect::<Vec<_>>()
            .join(";\n");

        Ok(ExecutionResult {
            row_count: rows.len(),
            rows,
            columns,
            backend_used,
            backend_name,
            generated_query,
            elapsed_ms: start.elapsed().as_millis() as u64,
            diagnostic: Some(DiagnosticSummary {
                metric,
                current_window,
                prior_window,
                current_value,
                prior_value,
                change_pct,
                direction,
                breakdown_dimension,
                insights,
            }),
        })
    }
}

fn number(row: &Row, column: &str) -> f64 {
    row.get(column).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn first_number(run: &BackendRun, column: &str) -> f64 {
    run.output.rows.first().map(|r| number(r, column)).unwrap_or(0.0)
}

fn pct_change(current: f64, prior: f64) -> Option<f64> {
    if prior == 0.0 {
        None
    } else {
        Some((current - prior) / prior.abs() * 100.0)
    }
}

struct Mover {
    member: serde_json::Value,
    current: f64,
    prior: f64,
}

impl Mover {
    fn delta(&self) -> f64 {
        self.current - self.prior
    }

    fn row(&self, dimension: &str, metric: &str, prior_column: &str) -> Row {
        let mut row = Row::new();
        row.insert(dimension.to_string(), self.member.clone());
        row.insert(metric.to_string(), float(self.current));
        row.insert(prior_column.to_string(), float(self.prior));
        row.insert(
            "change_pct".to_string(),
            pct_change(self.current, self.prior).map(float).unwrap_or_default(),
        );
        row
    }

    fn insight(&self, dimension: &str) -> String {
        let member = match &self.member {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match pct_change(self.current, self.prior) {
            Some(pct) => format!(
                "{} {}: {:.2} vs {:.2} ({:+.1}%)",
                dimension, member, self.current, self.prior, pct
            ),
            None => format!("{} {}: {:.2} (new in this period)", dimension, member, self.current),
        }
    }
}

/// Members of both periods, largest absolute change first.
fn movers(dimension: &str, metric: &str, current: &BackendRun, prior: &BackendRun) -> Vec<Mover> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut movers: Vec<Mover> = Vec::new();
    for (row, is_current) in current
        .output
        .rows
        .iter()
        .map(|r| (r, true))
        .chain(prior.output.rows.iter().map(|r| (r, false)))
    {
        let member = row.get(dimension).cloned().unwrap_or_default();
        let value = number(row, metric);
        let slot = *index.entry(member.to_string()).or_insert_with(|| {
            movers.push(Mover {
                member,
                current: 0.0,
                prior: 0.0,
            });
            movers.len() - 1
        });
        if is_current {
            movers[slot].current += value;
        } else {
            movers[slot].prior += value;
        }
    }
    movers.sort_by(|a, b| {
        b.delta()
            .abs()
            .partial_cmp(&a.delta().abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| compare_values(Some(&a.member), Some(&b.member)))
    });
    movers
}
