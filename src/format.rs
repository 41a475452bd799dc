//! Response formatting
//!
//! Turns execution results, scope-guard outcomes and errors into the single
//! `FormattedResult` shape handed to the web layer. Cached answers are stored
//! in this form, so formatting must be deterministic for a given input.

use crate::error::{FailureKind, PipelineError};
use crate::execution::{BackendRole, DiagnosticSummary, ExecutionResult, Row, TrendDirection};
use crate::intent::IntentKind;
use crate::security::{OutOfScopeReason, Role, UserAccessContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Answer,
    Diagnostic,
    Help,
    OutOfScopeMetadata,
    OutOfScopeGeneral,
    Error,
}

/// Execution metadata for audit and display.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub request_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub role: Option<Role>,
    pub intent: Option<IntentKind>,
    pub parse_time_ms: u64,
    pub execution_time_ms: u64,
    pub confidence: Option<f64>,
    pub backend_used: Option<BackendRole>,
    pub backend_name: Option<String>,
    pub generated_query: Option<String>,
    pub row_count: usize,
    /// Access predicate in force, e.g. `tenant=nestle AND asm_code='ASM-N01'`.
    pub predicate: Option<String>,
}

impl ResultMetadata {
    pub fn new(request_id: impl Into<String>, ctx: &UserAccessContext) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: ctx.user_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            role: Some(ctx.role),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedResult {
    pub success: bool,
    pub kind: ResponseKind,
    /// Renderable payload.
    pub html: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<DiagnosticSummary>,
    pub metadata: ResultMetadata,
}

const SAMPLE_QUESTIONS: &[(&str, &[&str])] = &[
    (
        "Ranking",
        &[
            "Show top 5 brands by sales value",
            "Top 10 SKUs by volume this month",
            "Top distributors by sales value",
        ],
    ),
    (
        "Trends",
        &["Weekly sales trend for last 6 weeks", "Monthly sales trend for this year"],
    ),
    ("Compare", &["Compare sales by channel", "Sales by state this month"]),
    ("Snapshot", &["Total sales this month", "Total volume last month"]),
    ("Diagnostics", &["Why did sales change?", "Why did sales drop?"]),
];

impl FormattedResult {
    pub fn answer(result: ExecutionResult, mut metadata: ResultMetadata) -> Self {
        metadata.execution_time_ms = result.elapsed_ms;
        metadata.backend_used = Some(result.backend_used);
        metadata.backend_name = Some(result.backend_name);
        metadata.generated_query = Some(result.generated_query);
        metadata.row_count = result.row_count;

        let (kind, html) = match &result.diagnostic {
            Some(summary) => (
                ResponseKind::Diagnostic,
                format!(
                    "{}{}",
                    render_diagnostic(summary),
                    render_table(&result.columns, &result.rows)
                ),
            ),
            None => (ResponseKind::Answer, render_table(&result.columns, &result.rows)),
        };

        Self {
            success: true,
            kind,
            html,
            columns: result.columns,
            rows: result.rows,
            failure: None,
            message: None,
            diagnostic: result.diagnostic,
            metadata,
        }
    }

    pub fn help(metadata: ResultMetadata) -> Self {
        let mut html = String::from("<div class=\"suggestions-box\"><h3>Sample Questions</h3>");
        for (category, questions) in SAMPLE_QUESTIONS {
            html.push_str(&format!("<h4>{}</h4><ul>", category));
            for question in *questions {
                html.push_str(&format!("<li>\"{}\"</li>", question));
            }
            html.push_str("</ul>");
        }
        html.push_str("</div>");
        Self::message_only(true, ResponseKind::Help, html, None, None, metadata)
    }

    pub fn out_of_scope(reason: OutOfScopeReason, metadata: ResultMetadata) -> Self {
        let (kind, message) = match reason {
            OutOfScopeReason::Metadata => (
                ResponseKind::OutOfScopeMetadata,
                "This assistant is for analytics queries only, not database metadata.",
            ),
            OutOfScopeReason::GeneralKnowledge => (
                ResponseKind::OutOfScopeGeneral,
                "I'm a CPG sales analytics assistant, not a general knowledge chatbot. \
                 I can help with sales data, brand performance, distribution metrics and trends.",
            ),
        };
        let html = format!(
            "<div class=\"out-of-scope\"><h3>Out of Scope</h3><p><strong>{}</strong></p>\
             <p>Try asking: \"Show top 5 brands by sales\", \"Why did sales change?\", \
             \"Total sales this month\"</p></div>",
            message
        );
        Self::message_only(false, kind, html, None, Some(message.to_string()), metadata)
    }

    pub fn failure(err: &PipelineError, metadata: ResultMetadata) -> Self {
        let kind = err.failure_kind();
        let message = match kind {
            FailureKind::Denied => format!("Access denied: {}", err),
            FailureKind::Invalid => format!("The question could not be answered: {}", err),
            FailureKind::InterpreterFailed => {
                "I could not understand the question. Please rephrase it.".to_string()
            }
            FailureKind::ExecutionFailed => {
                "The query could not be executed right now. Please try again.".to_string()
            }
            FailureKind::Internal => "An internal error occurred.".to_string(),
        };
        let html = format!("<p class=\"error\">{}</p>", escape_html(&message));
        Self::message_only(false, ResponseKind::Error, html, Some(kind), Some(message), metadata)
    }

    fn message_only(
        success: bool,
        kind: ResponseKind,
        html: String,
        failure: Option<FailureKind>,
        message: Option<String>,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            success,
            kind,
            html,
            columns: Vec::new(),
            rows: Vec::new(),
            failure,
            message,
            diagnostic: None,
            metadata,
        }
    }
}

pub fn render_table(columns: &[String], rows: &[Row]) -> String {
    if rows.is_empty() {
        return "<p class=\"no-results\">No results found</p>".to_string();
    }
    let mut html = String::from("<div class=\"results-table\"><table><thead><tr>");
    for column in columns {
        html.push_str(&format!("<th>{}</th>", escape_html(column)));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows {
        html.push_str("<tr>");
        for column in columns {
            let cell = row.get(column).map(format_value).unwrap_or_else(|| "-".to_string());
            html.push_str(&format!("<td>{}</td>", escape_html(&cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></div>");
    html.push_str(&format!(
        "<p class=\"result-summary\">{} rows returned</p>",
        rows.len()
    ));
    html
}

pub fn render_diagnostic(summary: &DiagnosticSummary) -> String {
    let (icon, color) = match summary.direction {
        TrendDirection::Increasing => ("[+]", "green"),
        TrendDirection::Decreasing => ("[!]", "red"),
        TrendDirection::Stable => ("[=]", "gray"),
    };
    let change = match summary.change_pct {
        Some(pct) => format!("{:+.1}%", pct),
        None => "n/a".to_string(),
    };
    let mut html = format!(
        "<div class=\"diagnostic-section\"><h3>Trend Analysis</h3>\
         <p style=\"color: {};\"><strong>{} Direction:</strong> {} ({})</p>\
         <p>{}: {} ({}) vs {} ({})</p></div>",
        color,
        icon,
        capitalize(summary.direction.as_str()),
        change,
        escape_html(&summary.metric),
        format_float(summary.current_value),
        summary.current_window,
        format_float(summary.prior_value),
        summary.prior_window,
    );
    if !summary.insights.is_empty() {
        html.push_str("<div class=\"diagnostic-section\"><h3>Key Insights</h3><ul class=\"insights-list\">");
        for insight in &summary.insights {
            html.push_str(&format!("<li>{}</li>", escape_html(insight)));
        }
        html.push_str("</ul></div>");
    }
    html
}

/// Display form of one cell: grouped integers, two-decimal floats, `-` for null.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                group_thousands(&i.unsigned_abs().to_string(), i < 0)
            } else if let Some(u) = n.as_u64() {
                group_thousands(&u.to_string(), false)
            } else {
                format_float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    let fixed = format!("{:.2}", f.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    format!("{}.{}", group_thousands(int_part, f < 0.0 && fixed != "0.00"), frac)
}

fn group_thousands(digits: &str, negative: bool) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if negative {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
