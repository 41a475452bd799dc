//! Question scope guard
//!
//! Runs before the cache and the interpreter. Cross-tenant mentions are a
//! denial; help and out-of-domain questions are answered locally.

use crate::config::TenantEntry;
use crate::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

/// Minimum Jaro-Winkler similarity for a near-miss tenant mention.
const NEAR_MISS_THRESHOLD: f64 = 0.93;
/// Shorter aliases only match exactly.
const NEAR_MISS_MIN_LEN: usize = 5;

const HELP_PHRASES: &[&str] = &[
    "what questions",
    "what can i ask",
    "what can you do",
    "give me examples",
    "show examples",
    "sample questions",
    "help me",
    "what to ask",
    "how to use",
];
const HELP_EXACT: &[&str] = &["help", "examples", "suggestions"];

const METADATA_KEYWORDS: &[&str] = &[
    "table",
    "tables",
    "column",
    "columns",
    "schema",
    "database",
    "metadata",
    "describe table",
    "table structure",
    "what data",
    "what fields",
    "available fields",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "who is", "who was", "who are", "what is a", "what are the", "when was", "where is",
    "where was", "how to", "how do i", "weather", "news", "stock market", "sports", "politics",
    "calculate", "math", "geography", "history", "science", "president", "prime minister",
    "actor", "actress", "celebrity", "movie", "film", "song", "music", "cricket", "football",
];

/// Phrasings that look general but are analytics questions.
const ANALYTICS_EXCEPTIONS: &[&str] = &[
    "what is the",
    "what are my",
    "how much",
    "how many",
    "how is",
    "where is my",
    "when is my",
];

lazy_static! {
    static ref METADATA_RE: Regex = word_alternation(METADATA_KEYWORDS);
    static ref GENERAL_RE: Regex = word_alternation(GENERAL_KEYWORDS);
}

fn word_alternation(words: &[&str]) -> Regex {
    let body = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{})\b", body)).expect("keyword list is a valid pattern")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfScopeReason {
    Metadata,
    GeneralKnowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionScope {
    Analytics,
    Help,
    OutOfScope(OutOfScopeReason),
}

struct TenantMatcher {
    entry: TenantEntry,
    patterns: Vec<Regex>,
}

pub struct ScopeGuard {
    tenants: Vec<TenantMatcher>,
}

impl ScopeGuard {
    pub fn new(tenants: &[TenantEntry]) -> Result<Self> {
        let tenants = tenants
            .iter()
            .map(|entry| {
                let patterns = entry
                    .aliases
                    .iter()
                    .map(|alias| {
                        Regex::new(&format!(r"\b{}\b", regex::escape(alias))).map_err(|e| {
                            PipelineError::Config(format!("tenant alias '{}': {}", alias, e))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(TenantMatcher {
                    entry: entry.clone(),
                    patterns,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tenants })
    }

    pub fn display_name(&self, tenant_id: &str) -> Option<&str> {
        self.tenants
            .iter()
            .find(|t| t.entry.id == tenant_id)
            .map(|t| t.entry.display_name.as_str())
    }

    pub fn classify(&self, question: &str, tenant_id: &str) -> Result<QuestionScope> {
        let q = question.trim().to_lowercase();

        let mentioned = self.other_tenants_mentioned(&q, tenant_id);
        if !mentioned.is_empty() {
            warn!(tenant = tenant_id, mentioned = ?mentioned, "Cross-tenant question denied");
            return Err(PipelineError::ScopeViolation(format!(
                "you do not have access to data from: {}",
                mentioned.join(", ")
            )));
        }

        if HELP_EXACT.contains(&q.as_str()) || HELP_PHRASES.iter().any(|p| q.contains(p)) {
            return Ok(QuestionScope::Help);
        }
        if METADATA_RE.is_match(&q) {
            return Ok(QuestionScope::OutOfScope(OutOfScopeReason::Metadata));
        }
        if GENERAL_RE.is_match(&q) && !ANALYTICS_EXCEPTIONS.iter().any(|e| q.contains(e)) {
            return Ok(QuestionScope::OutOfScope(OutOfScopeReason::GeneralKnowledge));
        }
        Ok(QuestionScope::Analytics)
    }

    fn other_tenants_mentioned(&self, q: &str, tenant_id: &str) -> Vec<String> {
        let own_aliases: Vec<&str> = self
            .tenants
            .iter()
            .filter(|t| t.entry.id == tenant_id)
            .flat_map(|t| t.entry.aliases.iter().map(String::as_str))
            .collect();
        let words: Vec<&str> = q
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        self.tenants
            .iter()
            .filter(|t| t.entry.id != tenant_id)
            .filter(|t| {
                t.patterns.iter().any(|p| p.is_match(q))
                    || t.entry
                        .aliases
                        .iter()
                        .any(|alias| near_miss(&words, alias, &own_aliases))
            })
            .map(|t| t.entry.display_name.clone())
            .collect()
    }
}

fn near_miss(words: &[&str], alias: &str, own_aliases: &[&str]) -> bool {
    if alias.chars().count() < NEAR_MISS_MIN_LEN {
        return false;
    }
    let span = alias.split_whitespace().count().max(1);
    if words.len() < span {
        return false;
    }
    words.windows(span).any(|window| {
        let candidate = window.join(" ");
        !own_aliases.contains(&candidate.as_str())
            && strsim::jaro_winkler(&candidate, alias) >= NEAR_MISS_THRESHOLD
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn guard() -> ScopeGuard {
        ScopeGuard::new(&PipelineConfig::default().tenants).unwrap()
    }

    #[test]
    fn test_analytics_question_passes() {
        let scope = guard()
            .classify("Show top 5 brands by sales value for last 4 weeks", "nestle")
            .unwrap();
        assert_eq!(scope, QuestionScope::Analytics);
        assert_eq!(
            guard().classify("What is the total sales this month?", "nestle").unwrap(),
            QuestionScope::Analytics
        );
    }

    #[test]
    fn test_help_and_out_of_scope() {
        let g = guard();
        assert_eq!(g.classify("help", "nestle").unwrap(), QuestionScope::Help);
        assert_eq!(
            g.classify("What can I ask?", "nestle").unwrap(),
            QuestionScope::Help
        );
        assert_eq!(
            g.classify("show tables in the database", "nestle").unwrap(),
            QuestionScope::OutOfScope(OutOfScopeReason::Metadata)
        );
        assert_eq!(
            g.classify("who is the prime minister", "nestle").unwrap(),
            QuestionScope::OutOfScope(OutOfScopeReason::GeneralKnowledge)
        );
    }

    #[test]
    fn test_cross_tenant_mention_denied() {
        let g = guard();
        assert!(matches!(
            g.classify("Compare our sales with Unilever", "nestle"),
            Err(PipelineError::ScopeViolation(_))
        ));
        assert!(g.classify("HUL brands by volume", "nestle").is_err());
        // Own tenant name is fine.
        assert!(g.classify("Nestle sales this month", "nestle").is_ok());
    }

    #[test]
    fn test_near_miss_spelling_denied() {
        let g = guard();
        assert!(g.classify("sales for unilver last month", "nestle").is_err());
        // Short aliases are exact-only; "it" and "itcx" do not match "itc".
        assert!(g.classify("show it by brand", "nestle").is_ok());
        assert!(g.classify("itcx volume", "nestle").is_ok());
    }
}
