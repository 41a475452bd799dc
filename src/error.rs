use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Cross-tenant request, or a restricted role with nothing to scope against.
    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    /// Interpreter output referenced an identifier it was never given.
    #[error("Anonymization integrity error: {0}")]
    AnonymizationIntegrity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend failure ({backend}): {message}")]
    BackendFailure { backend: String, message: String },

    #[error("Timeout: {backend} exceeded {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    /// Both backends failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Interpreter error: {0}")]
    Interpreter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::Polars(err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::BackendFailure {
            backend: "postgres".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::BackendFailure {
            backend: "http".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for PipelineError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        PipelineError::Config(format!("Failed to sign access token: {}", err))
    }
}

/// User-visible failure class carried by a formatted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Denied,
    Invalid,
    ExecutionFailed,
    InterpreterFailed,
    Internal,
}

impl PipelineError {
    /// Denials and invalid intents stay on the failed backend; everything else may fail over.
    pub fn triggers_failover(&self) -> bool {
        !matches!(
            self,
            PipelineError::ScopeViolation(_)
                | PipelineError::Validation(_)
                | PipelineError::AnonymizationIntegrity(_)
        )
    }

    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            PipelineError::ScopeViolation(_) | PipelineError::AnonymizationIntegrity(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::ScopeViolation(_) | PipelineError::AnonymizationIntegrity(_) => {
                FailureKind::Denied
            }
            PipelineError::Validation(_) => FailureKind::Invalid,
            PipelineError::BackendFailure { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::ExecutionFailed(_)
            | PipelineError::Polars(_) => FailureKind::ExecutionFailed,
            PipelineError::Interpreter(_) => FailureKind::InterpreterFailed,
            PipelineError::Config(_) | PipelineError::Io(_) | PipelineError::Json(_) => {
                FailureKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
