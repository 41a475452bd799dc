mod common;

use common::registry;
use secure_analytics::anonymization::{
    AnonymizationMapper, SchemaSymbol, Strategy, SymbolCategory, SymbolKind,
};
use secure_analytics::error::PipelineError;
use secure_analytics::intent::{
    Anonymous, FilterOperator, IntentKind, SemanticIntent, SortDirection,
};
use serde_json::json;
use std::collections::HashSet;

const STRATEGIES: [Strategy; 3] = [Strategy::Sequential, Strategy::Category, Strategy::ContentHash];

#[test]
fn test_registry_round_trips_under_every_strategy() {
    let symbols = SchemaSymbol::from_registry(registry().as_ref());
    for strategy in STRATEGIES {
        let mut mapper = AnonymizationMapper::new(strategy);
        let (anonymized, reverse) = mapper.anonymize(&symbols);

        assert_eq!(anonymized.len(), symbols.len());
        let names: HashSet<_> = anonymized.iter().map(|s| s.anonymous_name.as_str()).collect();
        assert_eq!(names.len(), symbols.len(), "{:?} produced duplicate names", strategy);

        for (symbol, anon) in symbols.iter().zip(&anonymized) {
            assert_eq!(reverse[&anon.anonymous_name], symbol.name);
            assert_eq!(mapper.real_name(symbol.kind, &anon.anonymous_name), Some(symbol.name.as_str()));
            assert!(!anon.exposed().description.contains(&symbol.name));
        }
    }
}

#[test]
fn test_deanonymized_intent_uses_real_names() {
    let mut mapper = AnonymizationMapper::new(Strategy::Category);
    mapper.anonymize(&SchemaSymbol::from_registry(registry().as_ref()));
    let value = mapper.anonymous_name(SymbolKind::Metric, "secondary_sales_value").unwrap().to_string();
    let channel = mapper.anonymous_name(SymbolKind::Dimension, "channel").unwrap().to_string();
    let brand = mapper.anonymous_name(SymbolKind::Dimension, "brand").unwrap().to_string();

    let intent = SemanticIntent::<Anonymous>::new(IntentKind::Ranking, value.clone())
        .with_group_by(brand)
        .with_filter(channel, FilterOperator::Equals, vec![json!("GT")])
        .with_sorting(value, SortDirection::Desc);
    let real = mapper.deanonymize(intent).unwrap();

    assert_eq!(real.metric.primary, "secondary_sales_value");
    assert_eq!(real.group_by, vec!["brand"]);
    assert_eq!(real.filters[0].dimension, "channel");
    assert_eq!(real.filters[0].values, vec![json!("GT")]);
    assert_eq!(real.sorting.unwrap().field, "secondary_sales_value");
}

#[test]
fn test_metric_id_in_dimension_position_is_rejected() {
    let mut mapper = AnonymizationMapper::new(Strategy::Sequential);
    mapper.anonymize(&SchemaSymbol::from_registry(registry().as_ref()));

    let intent = SemanticIntent::<Anonymous>::new(IntentKind::Snapshot, "metric_001")
        .with_group_by("metric_002");
    let err = mapper.deanonymize(intent).unwrap_err();
    assert!(matches!(err, PipelineError::AnonymizationIntegrity(_)));
}

#[test]
fn test_content_hash_is_stable_across_requests() {
    let symbols = SchemaSymbol::from_registry(registry().as_ref());
    let (first, _) = AnonymizationMapper::new(Strategy::ContentHash).anonymize(&symbols);
    let (second, _) = AnonymizationMapper::new(Strategy::ContentHash).anonymize(&symbols);
    assert_eq!(first, second);

    // Sequential names depend only on position, so a request that sees a
    // different vocabulary hands out different meanings for the same name.
    let (other, _) = AnonymizationMapper::new(Strategy::Sequential).anonymize(&symbols[1..]);
    let (full, _) = AnonymizationMapper::new(Strategy::Sequential).anonymize(&symbols);
    assert_eq!(other[0].anonymous_name, full[0].anonymous_name);
    assert_ne!(other[0].real_name, full[0].real_name);
}

#[test]
fn test_category_derivation() {
    assert_eq!(
        SymbolCategory::for_metric("invoice_count", "Number of distinct invoices"),
        SymbolCategory::Count
    );
    assert_eq!(
        SymbolCategory::for_metric("discount_amount", "Total discount given"),
        SymbolCategory::Value
    );
    assert_eq!(
        SymbolCategory::for_metric("discount_percentage", "Average discount rate"),
        SymbolCategory::Ratio
    );
}

#[test]
fn test_mapping_export_matches_summary() {
    let symbols = SchemaSymbol::from_registry(registry().as_ref());
    let mut mapper = AnonymizationMapper::new(Strategy::Category);
    mapper.anonymize(&symbols);

    let summary = mapper.summary();
    let export = mapper.export_mapping();
    assert_eq!(summary.metrics_mapped, export.metrics.len());
    assert_eq!(summary.dimensions_mapped, export.dimensions.len());
    assert_eq!(export.metrics["value_metric_001"], "secondary_sales_value");
    assert_eq!(export.dimensions["product_dimension_001"], "brand");
}
