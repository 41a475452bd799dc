//! Category derivation
//!
//! Categories are derived from whole-word tokens of the real name (and, for
//! metrics, the description), so compound words such as "discount" never
//! match the "count" cue.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Metric,
    Dimension,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Metric => "metric",
            SymbolKind::Dimension => "dimension",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolCategory {
    // metrics
    Value,
    Volume,
    Ratio,
    Count,
    Average,
    Generic,
    // dimensions
    Time,
    Product,
    Geography,
    Customer,
    Channel,
    Attribute,
}

const COUNT_CUES: &[&str] = &["count", "counts", "number", "cnt", "num"];
const RATIO_CUES: &[&str] = &["rate", "ratio", "percentage", "percent", "pct", "share"];
const AVERAGE_CUES: &[&str] = &["average", "avg", "mean"];
const VOLUME_CUES: &[&str] = &["volume", "quantity", "qty", "units", "unit", "cases"];
const VALUE_CUES: &[&str] = &[
    "value", "amount", "revenue", "sales", "margin", "profit", "price", "gmv",
];

const TIME_CUES: &[&str] = &["date", "time", "day", "week", "month", "quarter", "year", "period"];
const PRODUCT_CUES: &[&str] = &["product", "brand", "sku", "category", "item", "pack"];
const GEOGRAPHY_CUES: &[&str] = &[
    "geography", "location", "state", "city", "region", "zone", "district", "town", "territory",
];
const CUSTOMER_CUES: &[&str] = &["customer", "distributor", "retailer", "outlet", "store"];
const CHANNEL_CUES: &[&str] = &["channel", "sales"];

impl SymbolCategory {
    pub fn for_metric(name: &str, description: &str) -> Self {
        let tokens = tokenize(&format!("{} {}", name, description));
        let has = |cues: &[&str]| tokens.iter().any(|t| cues.contains(&t.as_str()));

        // Count cues first: they are the most specific.
        if has(COUNT_CUES) {
            SymbolCategory::Count
        } else if has(RATIO_CUES) {
            SymbolCategory::Ratio
        } else if has(AVERAGE_CUES) {
            SymbolCategory::Average
        } else if has(VOLUME_CUES) {
            SymbolCategory::Volume
        } else if has(VALUE_CUES) {
            SymbolCategory::Value
        } else {
            SymbolCategory::Generic
        }
    }

    pub fn for_dimension(name: &str) -> Self {
        let tokens = tokenize(name);
        let has = |cues: &[&str]| tokens.iter().any(|t| cues.contains(&t.as_str()));

        if has(TIME_CUES) {
            SymbolCategory::Time
        } else if has(PRODUCT_CUES) {
            SymbolCategory::Product
        } else if has(GEOGRAPHY_CUES) {
            SymbolCategory::Geography
        } else if has(CUSTOMER_CUES) {
            SymbolCategory::Customer
        } else if has(CHANNEL_CUES) {
            SymbolCategory::Channel
        } else {
            SymbolCategory::Attribute
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolCategory::Value => "value",
            SymbolCategory::Volume => "volume",
            SymbolCategory::Ratio => "ratio",
            SymbolCategory::Count => "count",
            SymbolCategory::Average => "average",
            SymbolCategory::Generic => "generic",
            SymbolCategory::Time => "time",
            SymbolCategory::Product => "product",
            SymbolCategory::Geography => "geography",
            SymbolCategory::Customer => "customer",
            SymbolCategory::Channel => "channel",
            SymbolCategory::Attribute => "attribute",
        }
    }

    /// Description shown to the interpreter. Never derived from the real
    /// description text.
    pub fn description_template(&self) -> &'static str {
        match self {
            SymbolCategory::Value => "Monetary value measurement",
            SymbolCategory::Volume => "Quantity measurement",
            SymbolCategory::Ratio => "Calculated ratio or percentage",
            SymbolCategory::Count => "Count of items",
            SymbolCategory::Average => "Average value calculation",
            SymbolCategory::Generic => "Business metric measurement",
            SymbolCategory::Time => "Time period attribute",
            SymbolCategory::Product => "Product hierarchy attribute",
            SymbolCategory::Geography => "Geographic location attribute",
            SymbolCategory::Customer => "Customer relationship attribute",
            SymbolCategory::Channel => "Route to market attribute",
            SymbolCategory::Attribute => "Descriptive attribute",
        }
    }
}

/// Lower-cased words split on punctuation and on camelCase boundaries
/// (`netSalesValue`, `SKUCode`).
fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
