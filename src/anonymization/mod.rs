//! Schema Anonymizer
//!
//! Bidirectional mapping between real schema vocabulary and synthetic
//! identifiers that are safe to hand to the external interpreter. A mapper
//! is created per request; nothing here is global.

pub mod category;

pub use category::{SymbolCategory, SymbolKind};

use crate::error::{PipelineError, Result};
use crate::intent::{Anonymous, IdentifierRole, Real, SemanticIntent};
use crate::semantic::SemanticRegistry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Hex characters of the content digest used before collision extension.
const HASH_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `metric_001`, `dimension_001`, in input order.
    Sequential,
    /// `value_metric_003`, `product_dimension_002`.
    Category,
    /// `metric_1a2b3c4d`, deterministic across mapper instances.
    ContentHash,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Category => "category",
            Strategy::ContentHash => "content_hash",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "sequential" | "generic" => Ok(Strategy::Sequential),
            "category" => Ok(Strategy::Category),
            "content_hash" | "hash" => Ok(Strategy::ContentHash),
            other => Err(PipelineError::Config(format!(
                "unknown anonymization strategy '{}'",
                other
            ))),
        }
    }
}

/// A real schema element offered for anonymization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub description: String,
}

impl SchemaSymbol {
    pub fn metric(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: SymbolKind::Metric,
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn dimension(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: SymbolKind::Dimension,
            name: name.into(),
            description: description.into(),
        }
    }

    /// Every metric and dimension of a registry, metrics first.
    pub fn from_registry(registry: &dyn SemanticRegistry) -> Vec<SchemaSymbol> {
        registry
            .metrics()
            .iter()
            .map(|m| SchemaSymbol::metric(&m.name, &m.description))
            .chain(
                registry
                    .dimensions()
                    .iter()
                    .map(|d| SchemaSymbol::dimension(&d.name, &d.description)),
            )
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizedSymbol {
    pub kind: SymbolKind,
    pub real_name: String,
    pub anonymous_name: String,
    pub category: SymbolCategory,
}

impl AnonymizedSymbol {
    /// The view handed to the interpreter: no real name, templated description.
    pub fn exposed(&self) -> ExposedSymbol {
        ExposedSymbol {
            kind: self.kind,
            name: self.anonymous_name.clone(),
            description: self.category.description_template().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    pub metrics_mapped: usize,
    pub dimensions_mapped: usize,
    pub strategy: Strategy,
}

/// Anonymous -> real, per kind, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MappingExport {
    pub metrics: BTreeMap<String, String>,
    pub dimensions: BTreeMap<String, String>,
}

pub struct AnonymizationMapper {
    strategy: Strategy,
    forward: HashMap<(SymbolKind, String), AnonymizedSymbol>,
    reverse_metrics: HashMap<String, String>,
    reverse_dimensions: HashMap<String, String>,
    metric_counter: usize,
    dimension_counter: usize,
}

impl AnonymizationMapper {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            forward: HashMap::new(),
            reverse_metrics: HashMap::new(),
            reverse_dimensions: HashMap::new(),
            metric_counter: 0,
            dimension_counter: 0,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Anonymizes `symbols` in input order and returns them with the
    /// anonymous -> real map of this batch. Re-anonymizing a real name
    /// returns the symbol it already has.
    pub fn anonymize(
        &mut self,
        symbols: &[SchemaSymbol],
    ) -> (Vec<AnonymizedSymbol>, HashMap<String, String>) {
        let mut out = Vec::with_capacity(symbols.len());
        let mut batch_reverse = HashMap::with_capacity(symbols.len());

        for symbol in symbols {
            let anonymized = self.anonymize_one(symbol);
            batch_reverse.insert(anonymized.anonymous_name.clone(), anonymized.real_name.clone());
            out.push(anonymized);
        }

        debug!(
            strategy = %self.strategy,
            count = out.len(),
            "Anonymized schema symbols"
        );
        (out, batch_reverse)
    }

    fn anonymize_one(&mut self, symbol: &SchemaSymbol) -> AnonymizedSymbol {
        let key = (symbol.kind, symbol.name.clone());
        if let Some(existing) = self.forward.get(&key) {
            return existing.clone();
        }

        let category = match symbol.kind {
            SymbolKind::Metric => SymbolCategory::for_metric(&symbol.name, &symbol.description),
            SymbolKind::Dimension => SymbolCategory::for_dimension(&symbol.name),
        };
        let anonymous_name = self.next_name(symbol, category);

        let anonymized = AnonymizedSymbol {
            kind: symbol.kind,
            real_name: symbol.name.clone(),
            anonymous_name: anonymous_name.clone(),
            category,
        };
        match symbol.kind {
            SymbolKind::Metric => self.reverse_metrics.insert(anonymous_name, symbol.name.clone()),
            SymbolKind::Dimension => {
                self.reverse_dimensions.insert(anonymous_name, symbol.name.clone())
            }
        };
        self.forward.insert(key, anonymized.clone());
        anonymized
    }

    fn next_name(&mut self, symbol: &SchemaSymbol, category: SymbolCategory) -> String {
        let kind = symbol.kind.as_str();
        match self.strategy {
            Strategy::Sequential => format!("{}_{:03}", kind, self.bump(symbol.kind)),
            Strategy::Category => {
                format!("{}_{}_{:03}", category.as_str(), kind, self.bump(symbol.kind))
            }
            Strategy::ContentHash => {
                let digest = hex::encode(Sha256::digest(symbol.name.as_bytes()));
                digest_name(kind, &digest, |candidate| self.is_taken(candidate))
            }
        }
    }

    fn bump(&mut self, kind: SymbolKind) -> usize {
        let counter = match kind {
            SymbolKind::Metric => &mut self.metric_counter,
            SymbolKind::Dimension => &mut self.dimension_counter,
        };
        *counter += 1;
        *counter
    }

    fn is_taken(&self, anonymous_name: &str) -> bool {
        self.reverse_metrics.contains_key(anonymous_name)
            || self.reverse_dimensions.contains_key(anonymous_name)
    }

    /// Forward lookup, real -> anonymous.
    pub fn anonymous_name(&self, kind: SymbolKind, real_name: &str) -> Option<&str> {
        self.forward
            .get(&(kind, real_name.to_string()))
            .map(|s| s.anonymous_name.as_str())
    }

    /// Reverse lookup, anonymous -> real.
    pub fn real_name(&self, kind: SymbolKind, anonymous_name: &str) -> Option<&str> {
        let map = match kind {
            SymbolKind::Metric => &self.reverse_metrics,
            SymbolKind::Dimension => &self.reverse_dimensions,
        };
        map.get(anonymous_name).map(String::as_str)
    }

    /// Replaces every anonymous identifier with its real name. Any identifier
    /// outside the vocabulary this mapper handed out, or used in a position
    /// of the wrong kind, is an integrity error.
    pub fn deanonymize(&self, intent: SemanticIntent<Anonymous>) -> Result<SemanticIntent<Real>> {
        intent.try_map_identifiers(|role, id| {
            let found = match role {
                IdentifierRole::Metric => self.real_name(SymbolKind::Metric, id),
                IdentifierRole::Dimension => self.real_name(SymbolKind::Dimension, id),
                IdentifierRole::SortField => self
                    .real_name(SymbolKind::Metric, id)
                    .or_else(|| self.real_name(SymbolKind::Dimension, id)),
            };
            found.map(str::to_string).ok_or_else(|| {
                PipelineError::AnonymizationIntegrity(format!(
                    "interpreter referenced unknown {} identifier '{}'",
                    match role {
                        IdentifierRole::Metric => "metric",
                        IdentifierRole::Dimension => "dimension",
                        IdentifierRole::SortField => "sort",
                    },
                    id
                ))
            })
        })
    }

    pub fn summary(&self) -> MappingSummary {
        MappingSummary {
            metrics_mapped: self.reverse_metrics.len(),
            dimensions_mapped: self.reverse_dimensions.len(),
            strategy: self.strategy,
        }
    }

    pub fn export_mapping(&self) -> MappingExport {
        MappingExport {
            metrics: self
                .reverse_metrics
                .iter()
                .map(|(a, r)| (a.clone(), r.clone()))
                .collect(),
            dimensions: self
                .reverse_dimensions
                .iter()
                .map(|(a, r)| (a.clone(), r.clone()))
                .collect(),
        }
    }
}

/// Shortest free digest prefix, extended two characters at a time; a full
/// digest that is still taken gets a numeric suffix.
fn digest_name(kind: &str, digest: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut len = HASH_PREFIX_LEN.min(digest.len());
    while len <= digest.len() {
        let candidate = format!("{}_{}", kind, &digest[..len]);
        if !is_taken(&candidate) {
            return candidate;
        }
        len += 2;
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{}_{}_{}", kind, digest, suffix);
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
