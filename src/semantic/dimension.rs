//! Semantic Dimension Definition

use serde::{Deserialize, Serialize};

/// Time grain for time-derived dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

/// Semantic dimension implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticDimension {
    pub name: String,
    pub description: String,
    /// Table holding the column; either a dimension table or the fact table.
    pub table: String,
    pub column: String,
    /// Cube member, e.g. `Product.brandName`.
    pub cube_member: String,
    /// Set for dimensions derived from the fact date column.
    #[serde(default)]
    pub time_grain: Option<TimeGrain>,
}

impl SemanticDimension {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        cube_member: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            table: table.into(),
            column: column.into(),
            cube_member: cube_member.into(),
            time_grain: None,
        }
    }

    pub fn with_time_grain(mut self, grain: TimeGrain) -> Self {
        self.time_grain = Some(grain);
        self
    }
}
