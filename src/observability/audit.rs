//! Audit Trail
//!
//! One record per request outcome, including denials, with the access
//! predicate that was in force. Kept in a bounded in-memory ring and
//! optionally appended to a JSON-lines file.

use crate::error::{PipelineError, Result};
use crate::format::FormattedResult;
use crate::execution::BackendRole;
use crate::intent::IntentKind;
use crate::security::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Answered,
    CacheHit,
    Help,
    OutOfScope,
    Denied,
    Invalid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub role: Option<Role>,
    pub question: String,
    pub outcome: AuditOutcome,
    pub intent: Option<IntentKind>,
    pub predicate: Option<String>,
    pub backend_used: Option<BackendRole>,
    pub backend_name: Option<String>,
    pub generated_query: Option<String>,
    pub row_count: usize,
    pub parse_time_ms: u64,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

impl AuditRecord {
    /// Record for a finished request; `error` is the internal error text,
    /// which may be more detailed than what the user was shown.
    pub fn from_result(
        question: &str,
        outcome: AuditOutcome,
        result: &FormattedResult,
        error: Option<&PipelineError>,
    ) -> Self {
        let meta = &result.metadata;
        Self {
            timestamp: Utc::now(),
            request_id: meta.request_id.clone(),
            tenant_id: meta.tenant_id.clone(),
            user_id: meta.user_id.clone(),
            role: meta.role,
            question: question.to_string(),
            outcome,
            intent: meta.intent,
            predicate: meta.predicate.clone(),
            backend_used: meta.backend_used,
            backend_name: meta.backend_name.clone(),
            generated_query: meta.generated_query.clone(),
            row_count: meta.row_count,
            parse_time_ms: meta.parse_time_ms,
            execution_time_ms: meta.execution_time_ms,
            error: error.map(|e| e.to_string()),
        }
    }
}

pub struct AuditTrail {
    log_file: Option<PathBuf>,
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl AuditTrail {
    pub fn new(log_file: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            log_file,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::new(None, capacity)
    }

    pub fn record(&self, record: AuditRecord) -> Result<()> {
        if let Some(ref log_file) = self.log_file {
            let line = serde_json::to_string(&record)?;
            let mut file = OpenOptions::new().create(true).append(true).open(log_file)?;
            writeln!(file, "{}", line)?;
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }

    /// Most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
