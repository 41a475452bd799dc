//! Pipeline
//!
//! The request path: scope guard, cache, anonymize, interpret, de-anonymize,
//! attach the access predicate, execute with failover, format. Every
//! collaborator is constructed by the caller and handed in; the pipeline
//! owns no global state.

use crate::anonymization::{AnonymizationMapper, ExposedSymbol, SchemaSymbol, Strategy};
use crate::cache::ResultCache;
use crate::compiler::{CubeQueryBuilder, IntentValidator, QueryPlan, SqlCompiler, SqlDialect};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::execution::{
    CubeBackend, Executor, PolarsEngine, PostgresEngine, QueryBackend, SqlBackend, StorageEngine,
};
use crate::format::{FormattedResult, ResultMetadata};
use crate::intent::{Real, SemanticIntent};
use crate::interpreter::{Interpreter, LlmInterpreter};
use crate::observability::{AuditOutcome, AuditRecord, AuditTrail};
use crate::security::{AccessPolicyEngine, CubeTokenSigner, QuestionScope, ScopeGuard, UserAccessContext};
use crate::semantic::{InMemorySemanticRegistry, SemanticRegistry};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Pipeline {
    registry: Arc<dyn SemanticRegistry>,
    strategy: Strategy,
    policy: AccessPolicyEngine,
    scope_guard: ScopeGuard,
    interpreter: Arc<dyn Interpreter>,
    executor: Executor,
    cache: ResultCache,
    audit: AuditTrail,
    interpreter_timeout: Duration,
    as_of: Option<NaiveDate>,
}

/// Queries one real intent would produce, without executing them.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub predicate: String,
    pub embedded_sql: String,
    pub postgres_sql: String,
    pub cube_query: String,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        registry: Arc<dyn SemanticRegistry>,
        interpreter: Arc<dyn Interpreter>,
        executor: Executor,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            strategy: config.strategy,
            policy: AccessPolicyEngine::new(),
            scope_guard: ScopeGuard::new(&config.tenants)?,
            interpreter,
            executor,
            cache: ResultCache::new(config.cache_ttl, config.cache_max_entries),
            audit: AuditTrail::new(config.audit_log.clone(), config.audit_capacity),
            interpreter_timeout: config.interpreter_timeout,
            as_of: config.as_of,
        })
    }

    /// Wires the pipeline from configuration: PostgreSQL when a database URL
    /// is set, else the embedded store loaded from the data directory; the
    /// cube service as primary when configured.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let registry = load_registry(config)?;

        let engine: Arc<dyn StorageEngine> = if let Some(ref url) = config.database_url {
            Arc::new(
                PostgresEngine::connect(
                    url,
                    config.max_concurrent_queries as u32,
                    config.pool_acquire_timeout,
                )
                .await?,
            )
        } else if let Some(ref dir) = config.data_dir {
            let mut engine =
                PolarsEngine::new(config.max_concurrent_queries, config.pool_acquire_timeout);
            let loaded = engine.load_csv_dir(dir)?;
            info!(tables = loaded, dir = %dir.display(), "Loaded embedded tables");
            Arc::new(engine)
        } else {
            return Err(PipelineError::Config(
                "either DATABASE_URL or ANALYTICS_DATA_DIR must be set".to_string(),
            ));
        };

        let fallback: Arc<dyn QueryBackend> = Arc::new(SqlBackend::new(registry.clone(), engine));
        let mut executor = Executor::new(registry.clone(), fallback)
            .with_timeouts(config.primary_timeout, config.fallback_timeout);
        match config.cube {
            Some(ref cube) => {
                let signer = CubeTokenSigner::new(&cube.api_secret, cube.token_ttl_secs);
                executor = executor.with_primary(Arc::new(CubeBackend::new(
                    cube.base_url.clone(),
                    signer,
                    registry.clone(),
                )));
            }
            None => warn!("No cube service configured, running on the SQL backend only"),
        }

        let interpreter_config = config.interpreter.as_ref().ok_or_else(|| {
            PipelineError::Config("OPENAI_API_KEY is required for the interpreter".to_string())
        })?;
        let interpreter: Arc<dyn Interpreter> = Arc::new(LlmInterpreter::new(interpreter_config));

        Self::new(config, registry, interpreter, executor)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn registry(&self) -> &Arc<dyn SemanticRegistry> {
        &self.registry
    }

    /// Answers one question for one user. Never fails: every error becomes a
    /// failure payload and an audit record.
    pub async fn answer(
        &self,
        tenant_id: &str,
        ctx: &UserAccessContext,
        question: &str,
    ) -> FormattedResult {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "answer",
            request_id = %request_id,
            tenant = tenant_id,
            user = %ctx.user_id
        );
        self.answer_inner(request_id, tenant_id, ctx, question)
            .instrument(span)
            .await
    }

    async fn answer_inner(
        &self,
        request_id: String,
        tenant_id: &str,
        ctx: &UserAccessContext,
        question: &str,
    ) -> FormattedResult {
        let mut metadata = ResultMetadata::new(request_id, ctx);
        info!(role = %ctx.role, "Question received");

        match self.run(tenant_id, ctx, question, &mut metadata).await {
            Ok(Answer::Fresh(result, outcome)) => {
                self.record(question, outcome, &result, None);
                result
            }
            Ok(Answer::Cached(result)) => {
                self.record(question, AuditOutcome::CacheHit, &result, None);
                result
            }
            Err(e) => {
                let predicate = metadata.predicate.clone().unwrap_or_default();
                let outcome = if e.is_denial() {
                    warn!(predicate = %predicate, "Request denied: {}", e);
                    AuditOutcome::Denied
                } else if matches!(e, PipelineError::Validation(_)) {
                    warn!(predicate = %predicate, "Invalid request: {}", e);
                    AuditOutcome::Invalid
                } else {
                    error!(predicate = %predicate, "Request failed: {}", e);
                    AuditOutcome::Failed
                };
                let result = FormattedResult::failure(&e, metadata);
                self.record(question, outcome, &result, Some(&e));
                result
            }
        }
    }

    async fn run(
        &self,
        tenant_id: &str,
        ctx: &UserAccessContext,
        question: &str,
        metadata: &mut ResultMetadata,
    ) -> Result<Answer> {
        if ctx.tenant_id != tenant_id {
            return Err(PipelineError::ScopeViolation(format!(
                "user {} belongs to tenant {}, not {}",
                ctx.user_id, ctx.tenant_id, tenant_id
            )));
        }
        // Fail closed before anything leaves the process.
        let scope = self.policy.resolve_scope(ctx)?.describe(tenant_id);
        metadata.predicate = Some(scope.clone());

        match self.scope_guard.classify(question, tenant_id)? {
            QuestionScope::Help => {
                info!("Help request");
                return Ok(Answer::Fresh(
                    FormattedResult::help(metadata.clone()),
                    AuditOutcome::Help,
                ));
            }
            QuestionScope::OutOfScope(reason) => {
                info!(reason = ?reason, "Out-of-scope question");
                return Ok(Answer::Fresh(
                    FormattedResult::out_of_scope(reason, metadata.clone()),
                    AuditOutcome::OutOfScope,
                ));
            }
            QuestionScope::Analytics => {}
        }

        if let Some(cached) = self.cache.get(tenant_id, &ctx.user_id, &scope, question) {
            info!("Answered from cache");
            return Ok(Answer::Cached(cached));
        }

        let real_intent = self.interpret(question, metadata).await?;
        let secured = self.policy.apply(real_intent, ctx)?;
        metadata.predicate = Some(secured.predicate().to_string());

        let result = self.executor.execute(&secured, self.anchor()).await?;
        info!(
            backend = result.backend_used.as_str(),
            rows = result.row_count,
            elapsed_ms = result.elapsed_ms,
            "Query executed"
        );

        let formatted = FormattedResult::answer(result, metadata.clone());
        // Only a completed answer is cached; a dropped future never gets here.
        self.cache.put(
            tenant_id,
            &ctx.user_id,
            &secured.predicate().to_string(),
            question,
            formatted.clone(),
        );
        Ok(Answer::Fresh(formatted, AuditOutcome::Answered))
    }

    /// Anonymizes the vocabulary with a request-local mapper, calls the
    /// interpreter, and maps its answer back to real identifiers.
    async fn interpret(
        &self,
        question: &str,
        metadata: &mut ResultMetadata,
    ) -> Result<SemanticIntent<Real>> {
        let mut mapper = AnonymizationMapper::new(self.strategy);
        let (anonymized, _) = mapper.anonymize(&SchemaSymbol::from_registry(self.registry.as_ref()));
        let exposed: Vec<ExposedSymbol> = anonymized.iter().map(|s| s.exposed()).collect();

        let start = Instant::now();
        let anonymous = tokio::time::timeout(
            self.interpreter_timeout,
            self.interpreter.interpret(&exposed, question),
        )
        .await
        .map_err(|_| {
            PipelineError::Interpreter(format!(
                "no response within {}ms",
                self.interpreter_timeout.as_millis()
            ))
        })??;
        metadata.parse_time_ms = start.elapsed().as_millis() as u64;
        metadata.intent = Some(anonymous.intent);
        metadata.confidence = Some(anonymous.confidence);

        let intent = mapper.deanonymize(anonymous)?;
        info!(
            intent = intent.intent.as_str(),
            metric = %intent.metric.primary,
            group_by = ?intent.group_by,
            parse_time_ms = metadata.parse_time_ms,
            "Interpreted question"
        );
        Ok(intent)
    }

    /// Compiles `intent` for `ctx` against every backend without running it.
    pub fn explain(&self, intent: SemanticIntent<Real>, ctx: &UserAccessContext) -> Result<Explanation> {
        explain(self.registry.clone(), intent, ctx, self.anchor())
    }

    fn anchor(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn record(
        &self,
        question: &str,
        outcome: AuditOutcome,
        result: &FormattedResult,
        err: Option<&PipelineError>,
    ) {
        if let Err(e) = self
            .audit
            .record(AuditRecord::from_result(question, outcome, result, err))
        {
            error!("Failed to write audit record: {}", e);
        }
    }
}

enum Answer {
    Fresh(FormattedResult, AuditOutcome),
    Cached(FormattedResult),
}

/// Validates `intent`, attaches the predicate for `ctx` and compiles it for
/// every backend.
pub fn explain(
    registry: Arc<dyn SemanticRegistry>,
    intent: SemanticIntent<Real>,
    ctx: &UserAccessContext,
    anchor: NaiveDate,
) -> Result<Explanation> {
    IntentValidator::new(registry.clone()).validate(&intent)?;
    let secured = AccessPolicyEngine::new().apply(intent, ctx)?;
    let window = secured
        .intent()
        .time_window
        .map(|w| w.resolve(anchor))
        .transpose()?;
    let plan = QueryPlan::new(&secured, window);

    let sql = SqlCompiler::new(registry.clone());
    Ok(Explanation {
        predicate: secured.predicate().to_string(),
        embedded_sql: sql.compile(&plan, SqlDialect::Embedded)?.sql,
        postgres_sql: sql.compile(&plan, SqlDialect::Postgres)?.sql,
        cube_query: CubeQueryBuilder::new(registry).build(&plan)?.to_json()?,
    })
}

/// Registry from `ANALYTICS_REGISTRY_FILE`, or the built-in vocabulary.
pub fn load_registry(config: &PipelineConfig) -> Result<Arc<dyn SemanticRegistry>> {
    let registry = match config.registry_file {
        Some(ref path) => InMemorySemanticRegistry::from_json_file(path)?,
        None => InMemorySemanticRegistry::cpg_secondary_sales(),
    };
    Ok(Arc::new(registry))
}
