#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::*;
use secure_analytics::anonymization::{ExposedSymbol, SymbolKind};
use secure_analytics::compiler::QueryPlan;
use secure_analytics::error::{PipelineError, Result};
use secure_analytics::execution::{BackendOutput, Executor, PolarsEngine, QueryBackend, Row};
use secure_analytics::intent::{Anonymous, IntentKind, Real, SemanticIntent, SortDirection, TimeWindow};
use secure_analytics::interpreter::Interpreter;
use secure_analytics::semantic::{InMemorySemanticRegistry, SemanticRegistry};
use secure_analytics::{Pipeline, PipelineConfig};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

pub fn registry() -> Arc<dyn SemanticRegistry> {
    Arc::new(InMemorySemanticRegistry::cpg_secondary_sales())
}

/// Nestle sales. Inside the last four weeks before 2026-10-17, ASM-N01 sells
/// Maggi 800, KitKat 700, Nescafe 650, Munch 400, Milkybar 300, Polo 200 and
/// Bar-One 100. Bar-One also has a large invoice before the window and
/// ASM-N02 has a large Milo invoice inside it. In the four weeks before the
/// window ASM-N01 sold Maggi 1000 and KitKat 500.
pub fn nestle_sales() -> DataFrame {
    df! {
        "invoice_number" => &[
            "N1", "N2", "N3", "N4", "N5", "N6", "N7", "N8", "N9", "N10", "N11", "N12",
        ],
        "invoice_date" => &[
            "2026-09-20", "2026-10-17", "2026-10-01", "2026-09-25", "2026-10-05", "2026-10-10",
            "2026-10-12", "2026-10-15", "2026-08-01", "2026-10-02", "2026-09-05", "2026-09-05",
        ],
        "brand" => &[
            "Maggi", "Maggi", "KitKat", "Nescafe", "Munch", "Milkybar",
            "Polo", "Bar-One", "Bar-One", "Milo", "Maggi", "KitKat",
        ],
        "category" => &[
            "Noodles", "Noodles", "Confectionery", "Beverages", "Confectionery", "Confectionery",
            "Confectionery", "Confectionery", "Confectionery", "Beverages", "Noodles", "Confectionery",
        ],
        "channel" => &["GT", "MT", "GT", "GT", "MT", "GT", "GT", "MT", "GT", "GT", "GT", "GT"],
        "net_value" => &[
            500.0, 300.0, 700.0, 650.0, 400.0, 300.0, 200.0, 100.0, 5000.0, 9000.0, 1000.0, 500.0,
        ],
        "invoice_value" => &[
            550.0, 330.0, 770.0, 700.0, 440.0, 330.0, 220.0, 110.0, 5500.0, 9900.0, 1100.0, 550.0,
        ],
        "invoice_quantity" => &[50i64, 30, 70, 65, 40, 30, 20, 10, 500, 900, 100, 50],
        "so_code" => &[
            "SO-N01", "SO-N02", "SO-N01", "SO-N02", "SO-N01", "SO-N01",
            "SO-N02", "SO-N01", "SO-N01", "SO-N09", "SO-N01", "SO-N01",
        ],
        "asm_code" => &[
            "ASM-N01", "ASM-N01", "ASM-N01", "ASM-N01", "ASM-N01", "ASM-N01",
            "ASM-N01", "ASM-N01", "ASM-N01", "ASM-N02", "ASM-N01", "ASM-N01",
        ],
        "zsm_code" => &["ZSM-N1"; 12],
        "nsm_code" => &["NSM-N"; 12],
    }
    .unwrap()
}

pub fn itc_sales() -> DataFrame {
    df! {
        "invoice_number" => &["I1", "I2"],
        "invoice_date" => &["2026-10-01", "2026-10-02"],
        "brand" => &["Aashirvaad", "Sunfeast"],
        "category" => &["Staples", "Biscuits"],
        "channel" => &["GT", "GT"],
        "net_value" => &[99999.0, 88888.0],
        "invoice_value" => &[99999.0, 88888.0],
        "invoice_quantity" => &[1i64, 1],
        "so_code" => &["SO-I01", "SO-I01"],
        "asm_code" => &["ASM-N01", "ASM-I01"],
        "zsm_code" => &["ZSM-I1", "ZSM-I1"],
        "nsm_code" => &["NSM-I", "NSM-I"],
    }
    .unwrap()
}

/// One invoice per brand `B0`..`B{n-1}`, brand `Bi` selling `10 * i`.
pub fn many_brands_sales(n: usize) -> DataFrame {
    let invoices: Vec<String> = (0..n).map(|i| format!("M{}", i)).collect();
    let brands: Vec<String> = (0..n).map(|i| format!("B{}", i)).collect();
    let values: Vec<f64> = (0..n).map(|i| 10.0 * i as f64).collect();
    let quantities: Vec<i64> = (0..n).map(|i| i as i64).collect();
    df! {
        "invoice_number" => &invoices,
        "invoice_date" => &vec!["2026-10-01"; n],
        "brand" => &brands,
        "category" => &vec!["Confectionery"; n],
        "channel" => &vec!["GT"; n],
        "net_value" => &values,
        "invoice_value" => &values,
        "invoice_quantity" => &quantities,
        "so_code" => &vec!["SO-N01"; n],
        "asm_code" => &vec!["ASM-N01"; n],
        "zsm_code" => &vec!["ZSM-N1"; n],
        "nsm_code" => &vec!["NSM-N"; n],
    }
    .unwrap()
}

pub fn engine() -> PolarsEngine {
    let mut engine = PolarsEngine::new(4, Duration::from_secs(5));
    engine
        .register_table("nestle", "client_nestle_secondary_sales", nestle_sales())
        .unwrap();
    engine
        .register_table("itc", "client_itc_secondary_sales", itc_sales())
        .unwrap();
    engine
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang(Duration),
}

/// What a backend was asked to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub predicate: String,
    pub intent: SemanticIntent<Real>,
}

/// Scripted backend that counts calls and records each plan it receives.
/// A succeeding mock delegates to `inner` when one is set; otherwise its one
/// row differs on every call, like a store that keeps being refreshed.
pub struct MockBackend {
    name: String,
    behavior: Behavior,
    inner: Option<Arc<dyn QueryBackend>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl MockBackend {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            inner: None,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn wrapping(name: &str, inner: Arc<dyn QueryBackend>) -> Self {
        Self {
            inner: Some(inner),
            ..Self::new(name, Behavior::Succeed)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for MockBackend {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, plan: &QueryPlan<'_>) -> Result<BackendOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorded.lock().unwrap().push(RecordedCall {
            predicate: plan.predicate().to_string(),
            intent: plan.secured().intent().clone(),
        });

        match self.behavior {
            Behavior::Fail => Err(PipelineError::BackendFailure {
                backend: self.name.clone(),
                message: "connection refused".to_string(),
            }),
            Behavior::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Err(PipelineError::BackendFailure {
                    backend: self.name.clone(),
                    message: "woke up too late".to_string(),
                })
            }
            Behavior::Succeed => match self.inner {
                Some(ref inner) => inner.execute(plan).await,
                None => {
                    let columns = plan.columns();
                    let row: Row = columns
                        .iter()
                        .map(|c| (c.clone(), json!(format!("{}#{}:{}", self.name, call, c))))
                        .collect();
                    Ok(BackendOutput {
                        rows: vec![row],
                        columns,
                        generated_query: format!("-- {}", self.name),
                    })
                }
            },
        }
    }
}

type Script = dyn Fn(&[ExposedSymbol]) -> Result<SemanticIntent<Anonymous>> + Send + Sync;

/// Interpreter double: builds its answer from the exposed vocabulary only,
/// and keeps what it was shown.
pub struct ScriptedInterpreter {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Vec<ExposedSymbol>, String)>>,
}

impl ScriptedInterpreter {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[ExposedSymbol]) -> Result<SemanticIntent<Anonymous>> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(Vec<ExposedSymbol>, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        symbols: &[ExposedSymbol],
        question: &str,
    ) -> Result<SemanticIntent<Anonymous>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((symbols.to_vec(), question.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(symbols)
    }
}

/// First exposed symbol of `kind` whose description is `description`.
pub fn pick(symbols: &[ExposedSymbol], kind: SymbolKind, description: &str) -> Result<String> {
    symbols
        .iter()
        .find(|s| s.kind == kind && s.description == description)
        .map(|s| s.name.clone())
        .ok_or_else(|| PipelineError::Interpreter(format!("no {} symbol", description)))
}

/// "Show top 5 brands by sales value for last 4 weeks", answered from the
/// anonymous vocabulary.
pub fn top_brands_interpreter() -> ScriptedInterpreter {
    ScriptedInterpreter::new(|symbols| {
        let metric = pick(symbols, SymbolKind::Metric, "Monetary value measurement")?;
        let brand = pick(symbols, SymbolKind::Dimension, "Product hierarchy attribute")?;
        Ok(SemanticIntent::<Anonymous>::new(IntentKind::Ranking, metric.clone())
            .with_group_by(brand)
            .with_sorting(metric, SortDirection::Desc)
            .with_time_window(TimeWindow::LastWeeks(4))
            .with_limit(5)
            .with_confidence(0.93))
    })
}

pub fn config() -> PipelineConfig {
    PipelineConfig::default().with_as_of(as_of())
}

pub fn pipeline(
    config: &PipelineConfig,
    interpreter: Arc<ScriptedInterpreter>,
    primary: Option<Arc<dyn QueryBackend>>,
    fallback: Arc<dyn QueryBackend>,
) -> Pipeline {
    let mut executor = Executor::new(registry(), fallback)
        .with_timeouts(config.primary_timeout, config.fallback_timeout);
    if let Some(primary) = primary {
        executor = executor.with_primary(primary);
    }
    Pipeline::new(config, registry(), interpreter, executor).unwrap()
}
