pub mod anonymization;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod execution;
pub mod format;
pub mod intent;
pub mod interpreter;
pub mod observability;
pub mod pipeline;
pub mod security;
pub mod semantic;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use format::FormattedResult;
pub use pipeline::{explain, load_registry, Explanation, Pipeline};
