//! Semantic Metric Definition
//!
//! A metric is an aggregation over one fact column. Metric names are the
//! real vocabulary that never leaves the process un-anonymized.

use serde::{Deserialize, Serialize};

/// Aggregation function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
}

impl Aggregation {
    /// Wraps a column expression in the aggregate call.
    pub fn apply(&self, expr: &str) -> String {
        match self {
            Aggregation::Sum => format!("SUM({})", expr),
            Aggregation::Avg => format!("AVG({})", expr),
            Aggregation::Count => format!("COUNT({})", expr),
            Aggregation::CountDistinct => format!("COUNT(DISTINCT {})", expr),
            Aggregation::Min => format!("MIN({})", expr),
            Aggregation::Max => format!("MAX({})", expr),
        }
    }
}

/// Semantic metric implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMetric {
    pub name: String,
    pub description: String,
    pub aggregation: Aggregation,
    /// Column of the fact table the aggregation runs over.
    pub column: String,
    /// Measure name in the cube service, e.g. `SecondarySales.netValue`.
    pub cube_member: String,
}

impl SemanticMetric {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        aggregation: Aggregation,
        column: impl Into<String>,
        cube_member: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            aggregation,
            column: column.into(),
            cube_member: cube_member.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_sql() {
        assert_eq!(Aggregation::Sum.apply("f.net_value"), "SUM(f.net_value)");
        assert_eq!(
            Aggregation::CountDistinct.apply("invoice_number"),
            "COUNT(DISTINCT invoice_number)"
        );
    }
}
