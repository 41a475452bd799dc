//! Pipeline configuration
//!
//! Every tunable is read from the environment once at start-up. The binary
//! calls `dotenv::dotenv()` first so a local `.env` file works too.

use crate::anonymization::Strategy;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// One entry of the tenant directory used by the scope guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEntry {
    pub id: String,
    pub display_name: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CubeConfig {
    pub base_url: String,
    pub api_secret: String,
    pub token_ttl_secs: u64,
}

/// Request field that caps the completion length. Older chat models take
/// `max_tokens`; reasoning models only accept `max_completion_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLimitField {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenLimitField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenLimitField::MaxTokens => "max_tokens",
            TokenLimitField::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

impl FromStr for TokenLimitField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "max_tokens" => Ok(TokenLimitField::MaxTokens),
            "max_completion_tokens" => Ok(TokenLimitField::MaxCompletionTokens),
            other => Err(PipelineError::Config(format!(
                "OPENAI_TOKEN_LIMIT_FIELD '{}': expected max_tokens or max_completion_tokens",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub token_limit_field: TokenLimitField,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Staleness window of cached answers. Cached answers are not invalidated
    /// when the underlying data refreshes.
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub interpreter_timeout: Duration,
    pub strategy: Strategy,
    pub worker_threads: usize,
    pub max_concurrent_queries: usize,
    pub pool_acquire_timeout: Duration,
    /// Anchor date for symbolic time windows; today when unset.
    pub as_of: Option<NaiveDate>,
    pub audit_log: Option<PathBuf>,
    pub audit_capacity: usize,
    pub tenants: Vec<TenantEntry>,
    pub database_url: Option<String>,
    /// Directory of `<tenant>/<table>.csv` files for the embedded store.
    pub data_dir: Option<PathBuf>,
    /// JSON semantic registry; the built-in vocabulary when unset.
    pub registry_file: Option<PathBuf>,
    pub cube: Option<CubeConfig>,
    pub interpreter: Option<InterpreterConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 10_000,
            primary_timeout: Duration::from_millis(10_000),
            fallback_timeout: Duration::from_millis(30_000),
            interpreter_timeout: Duration::from_millis(20_000),
            strategy: Strategy::Category,
            worker_threads: 4,
            max_concurrent_queries: 8,
            pool_acquire_timeout: Duration::from_millis(5_000),
            as_of: None,
            audit_log: None,
            audit_capacity: 1_000,
            tenants: default_tenants(),
            database_url: None,
            data_dir: None,
            registry_file: None,
            cube: None,
            interpreter: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cache_ttl = match get("ANALYTICS_CACHE_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_number("ANALYTICS_CACHE_TTL_SECS", &v)?),
            None => defaults.cache_ttl,
        };
        let cache_max_entries = match get("ANALYTICS_CACHE_MAX_ENTRIES") {
            Some(v) => parse_number("ANALYTICS_CACHE_MAX_ENTRIES", &v)?,
            None => defaults.cache_max_entries,
        };
        let primary_timeout = millis(&get, "ANALYTICS_PRIMARY_TIMEOUT_MS", defaults.primary_timeout)?;
        let fallback_timeout =
            millis(&get, "ANALYTICS_FALLBACK_TIMEOUT_MS", defaults.fallback_timeout)?;
        let interpreter_timeout =
            millis(&get, "ANALYTICS_INTERPRETER_TIMEOUT_MS", defaults.interpreter_timeout)?;
        let pool_acquire_timeout =
            millis(&get, "ANALYTICS_POOL_ACQUIRE_TIMEOUT_MS", defaults.pool_acquire_timeout)?;

        let strategy = match get("ANALYTICS_ANONYMIZATION_STRATEGY") {
            Some(v) => Strategy::from_str(&v)?,
            None => defaults.strategy,
        };
        let worker_threads = match get("ANALYTICS_WORKER_THREADS") {
            Some(v) => parse_number("ANALYTICS_WORKER_THREADS", &v)?,
            None => defaults.worker_threads,
        };
        let max_concurrent_queries = match get("ANALYTICS_MAX_CONCURRENT_QUERIES") {
            Some(v) => parse_number("ANALYTICS_MAX_CONCURRENT_QUERIES", &v)?,
            None => defaults.max_concurrent_queries,
        };
        if worker_threads == 0 || max_concurrent_queries == 0 {
            return Err(PipelineError::Config(
                "worker threads and concurrent queries must be at least 1".to_string(),
            ));
        }

        let as_of = match get("ANALYTICS_AS_OF_DATE") {
            Some(v) => Some(NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(|e| {
                PipelineError::Config(format!("ANALYTICS_AS_OF_DATE '{}': {}", v, e))
            })?),
            None => None,
        };

        let tenants = match get("ANALYTICS_TENANTS") {
            Some(v) => parse_tenants(&v)?,
            None => defaults.tenants,
        };

        let cube = match (get("CUBEJS_URL"), get("CUBEJS_API_SECRET")) {
            (Some(base_url), Some(api_secret)) => Some(CubeConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_secret,
                token_ttl_secs: match get("CUBEJS_TOKEN_TTL_SECS") {
                    Some(v) => parse_number("CUBEJS_TOKEN_TTL_SECS", &v)?,
                    None => 900,
                },
            }),
            (Some(_), None) => {
                return Err(PipelineError::Config(
                    "CUBEJS_URL is set but CUBEJS_API_SECRET is missing".to_string(),
                ))
            }
            _ => None,
        };

        let interpreter = match get("OPENAI_API_KEY") {
            Some(api_key) => Some(InterpreterConfig {
                api_key,
                model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                token_limit_field: match get("OPENAI_TOKEN_LIMIT_FIELD") {
                    Some(v) => TokenLimitField::from_str(&v)?,
                    None => TokenLimitField::MaxTokens,
                },
                max_output_tokens: match get("OPENAI_MAX_OUTPUT_TOKENS") {
                    Some(v) => parse_number("OPENAI_MAX_OUTPUT_TOKENS", &v)?,
                    None => 500,
                },
            }),
            None => None,
        };

        Ok(Self {
            cache_ttl,
            cache_max_entries,
            primary_timeout,
            fallback_timeout,
            interpreter_timeout,
            strategy,
            worker_threads,
            max_concurrent_queries,
            pool_acquire_timeout,
            as_of,
            audit_log: get("ANALYTICS_AUDIT_LOG").map(PathBuf::from),
            audit_capacity: defaults.audit_capacity,
            tenants,
            database_url: get("DATABASE_URL"),
            data_dir: get("ANALYTICS_DATA_DIR").map(PathBuf::from),
            registry_file: get("ANALYTICS_REGISTRY_FILE").map(PathBuf::from),
            cube,
            interpreter,
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeouts(mut self, primary: Duration, fallback: Duration) -> Self {
        self.primary_timeout = primary;
        self.fallback_timeout = fallback;
        self
    }

    pub fn with_interpreter_timeout(mut self, timeout: Duration) -> Self {
        self.interpreter_timeout = timeout;
        self
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn millis<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => Ok(Duration::from_millis(parse_number(key, &v)?)),
        None => Ok(default),
    }
}

/// Parses `id=Display|alias|alias,id=Display`.
pub fn parse_tenants(raw: &str) -> Result<Vec<TenantEntry>> {
    let mut tenants = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, rest) = entry.split_once('=').ok_or_else(|| {
            PipelineError::Config(format!("tenant entry '{}' is missing '='", entry))
        })?;
        let id = id.trim().to_lowercase();
        if id.is_empty() {
            return Err(PipelineError::Config(format!("tenant entry '{}' has an empty id", entry)));
        }
        let mut parts = rest.split('|').map(str::trim).filter(|p| !p.is_empty());
        let display_name = parts.next().unwrap_or(id.as_str()).to_string();
        let mut aliases: Vec<String> = parts.map(str::to_lowercase).collect();
        aliases.push(id.clone());
        aliases.push(display_name.to_lowercase());
        aliases.sort();
        aliases.dedup();
        tenants.push(TenantEntry { id, display_name, aliases });
    }
    Ok(tenants)
}

fn default_tenants() -> Vec<TenantEntry> {
    vec![
        TenantEntry {
            id: "nestle".to_string(),
            display_name: "Nestle".to_string(),
            aliases: vec!["nestle".to_string(), "nestlé".to_string()],
        },
        TenantEntry {
            id: "unilever".to_string(),
            display_name: "Unilever".to_string(),
            aliases: vec![
                "unilever".to_string(),
                "hindustan unilever".to_string(),
                "hul".to_string(),
            ],
        },
        TenantEntry {
            id: "itc".to_string(),
            display_name: "ITC".to_string(),
            aliases: vec!["itc".to_string(), "itc limited".to_string()],
        },
    ]
}
