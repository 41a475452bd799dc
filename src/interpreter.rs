//! Interpreter
//!
//! Natural language to `SemanticIntent<Anonymous>`. The interpreter only ever
//! sees anonymous symbols with templated descriptions and the question text,
//! and can only hand back identifiers in the anonymous space.

use crate::anonymization::{ExposedSymbol, SymbolKind};
use crate::config::{InterpreterConfig, TokenLimitField};
use crate::error::{PipelineError, Result};
use crate::intent::{Anonymous, SemanticIntent};
use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(
        &self,
        symbols: &[ExposedSymbol],
        question: &str,
    ) -> Result<SemanticIntent<Anonymous>>;
}

const SYSTEM_PROMPT: &str = "You translate analytics questions into a JSON intent. Return JSON only, no text.";

/// OpenAI-compatible chat completions client.
pub struct LlmInterpreter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    token_limit_field: TokenLimitField,
    max_output_tokens: u32,
}

impl LlmInterpreter {
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_limit_field: config.token_limit_field,
            max_output_tokens: config.max_output_tokens,
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
        });
        body[self.token_limit_field.as_str()] = serde_json::json!(self.max_output_tokens);
        body
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Interpreter(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PipelineError::Interpreter(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Interpreter(format!("Failed to parse LLM response: {}", e)))?;
        if let Some(error) = response_json.get("error") {
            return Err(PipelineError::Interpreter(format!("LLM API error: {}", error)));
        }

        let choice = response_json["choices"]
            .get(0)
            .ok_or_else(|| PipelineError::Interpreter("No choices in LLM response".to_string()))?;
        match choice["finish_reason"].as_str() {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(PipelineError::Interpreter(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Interpreter("Empty content in LLM response".to_string()))?;
        Ok(content.to_string())
    }
}

#[async_trait]
impl Interpreter for LlmInterpreter {
    async fn interpret(
        &self,
        symbols: &[ExposedSymbol],
        question: &str,
    ) -> Result<SemanticIntent<Anonymous>> {
        let prompt = build_prompt(symbols, question);
        let content = self.call_llm(&prompt).await?;
        debug!(response = %content, "Interpreter response");
        SemanticIntent::<Anonymous>::from_interpreter_json(strip_code_fence(&content))
    }
}

/// Prompt listing only the anonymous vocabulary.
pub fn build_prompt(symbols: &[ExposedSymbol], question: &str) -> String {
    let list = |kind: SymbolKind| {
        symbols
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "METRICS:\n{}\n\nDIMENSIONS:\n{}\n\n\
         Use only the identifiers listed above.\n\
         Return a JSON object with fields:\n\
         intent (snapshot|trend|ranking|comparison|diagnostic),\n\
         metric {{primary, secondary: []}},\n\
         group_by: [dimension],\n\
         filters: [{{dimension, operator (equals|not_equals|in|not_in|gt|gte|lt|lte), values: []}}],\n\
         sorting: {{field, direction (asc|desc)}} or null,\n\
         time_window (e.g. last_4_weeks, this_month, last_quarter) or null,\n\
         limit (integer) or null,\n\
         confidence (0 to 1).\n\n\
         QUESTION: {}",
        list(SymbolKind::Metric),
        list(SymbolKind::Dimension),
        question
    )
}

/// Strips a surrounding Markdown code fence, if any.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
