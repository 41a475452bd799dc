mod common;

use common::{
    config, engine, pick, pipeline, registry, top_brands_interpreter, Behavior, MockBackend,
    ScriptedInterpreter,
};
use secure_analytics::anonymization::{Strategy, SymbolKind};
use secure_analytics::execution::{BackendRole, QueryBackend, SqlBackend, TrendDirection};
use secure_analytics::format::ResponseKind;
use secure_analytics::intent::{Anonymous, IntentKind, SemanticIntent};
use secure_analytics::observability::AuditOutcome;
use secure_analytics::security::{AccessPolicyEngine, Role, UserAccessContext};
use std::sync::Arc;
use tokio::task::JoinSet;

fn sql_backend() -> Arc<dyn QueryBackend> {
    Arc::new(SqlBackend::new(registry(), Arc::new(engine())))
}

#[tokio::test]
async fn test_asm_top_brands_last_four_weeks() {
    let interpreter = Arc::new(top_brands_interpreter());
    let cube = Arc::new(MockBackend::new("cube", Behavior::Fail));
    let pipeline = pipeline(&config(), interpreter.clone(), Some(cube.clone()), sql_backend());

    let ctx = UserAccessContext::new("asm.north", "nestle", Role::Asm).with_asm_code("ASM-N01");
    let result = pipeline
        .answer("nestle", &ctx, "Show top 5 brands by sales value for last 4 weeks")
        .await;

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.kind, ResponseKind::Answer);
    assert_eq!(result.columns, vec!["brand", "secondary_sales_value"]);

    let ranked: Vec<(&str, f64)> = result
        .rows
        .iter()
        .map(|r| {
            (
                r["brand"].as_str().unwrap(),
                r["secondary_sales_value"].as_f64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        ranked,
        vec![
            ("Maggi", 800.0),
            ("KitKat", 700.0),
            ("Nescafe", 650.0),
            ("Munch", 400.0),
            ("Milkybar", 300.0),
        ]
    );

    // The cube was asked first, under the same predicate.
    assert_eq!(cube.calls(), 1);
    assert_eq!(cube.recorded()[0].predicate, "tenant=nestle AND asm_code='ASM-N01'");

    let meta = &result.metadata;
    assert_eq!(meta.intent, Some(IntentKind::Ranking));
    assert_eq!(meta.confidence, Some(0.93));
    assert_eq!(meta.backend_used, Some(BackendRole::Fallback));
    assert_eq!(meta.row_count, 5);
    assert_eq!(meta.predicate.as_deref(), Some("tenant=nestle AND asm_code='ASM-N01'"));
    let sql = meta.generated_query.as_deref().unwrap();
    assert!(sql.contains("FROM client_nestle_secondary_sales"));
    assert!(sql.contains("invoice_date >= '2026-09-20' AND invoice_date <= '2026-10-17'"));

    assert!(result.html.contains("<td>Maggi</td><td>800.00</td>"));
    assert!(result.html.contains("5 rows returned"));
    assert!(!result.html.contains("Milo"));
    assert!(!result.html.contains("Bar-One"));

    let audit = pipeline.audit().recent(1);
    assert_eq!(audit[0].outcome, AuditOutcome::Answered);
    assert_eq!(audit[0].user_id, "asm.north");
    assert_eq!(audit[0].backend_used, Some(BackendRole::Fallback));
}

#[tokio::test]
async fn test_tenant_tables_stay_separate() {
    let interpreter = Arc::new(top_brands_interpreter());
    let pipeline = pipeline(&config(), interpreter, None, sql_backend());

    // ITC also has an ASM-N01; only ITC rows may come back.
    let ctx = UserAccessContext::new("asm.itc", "itc", Role::Asm).with_asm_code("ASM-N01");
    let result = pipeline.answer("itc", &ctx, "Top brands last 4 weeks").await;

    assert!(result.success, "{:?}", result.message);
    let brands: Vec<&str> = result
        .rows
        .iter()
        .map(|r| r["brand"].as_str().unwrap())
        .collect();
    assert_eq!(brands, vec!["Aashirvaad"]);
}

#[tokio::test]
async fn test_diagnostic_compares_with_prior_window() {
    let interpreter = Arc::new(ScriptedInterpreter::new(|symbols| {
        let metric = pick(symbols, SymbolKind::Metric, "Monetary value measurement")?;
        let brand = pick(symbols, SymbolKind::Dimension, "Product hierarchy attribute")?;
        Ok(SemanticIntent::<Anonymous>::new(IntentKind::Diagnostic, metric)
            .with_group_by(brand)
            .with_confidence(0.8))
    }));
    let pipeline = pipeline(&config(), interpreter, None, sql_backend());

    let ctx = UserAccessContext::new("asm.north", "nestle", Role::Asm).with_asm_code("ASM-N01");
    let result = pipeline.answer("nestle", &ctx, "Why did sales change?").await;

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.kind, ResponseKind::Diagnostic);
    let summary = result.diagnostic.as_ref().unwrap();
    assert_eq!(summary.current_value, 3150.0);
    assert_eq!(summary.prior_value, 1500.0);
    assert_eq!(summary.direction, TrendDirection::Increasing);
    assert!((summary.change_pct.unwrap() - 110.0).abs() < 1e-9);
    assert_eq!(summary.current_window.to_string(), "2026-09-20 to 2026-10-17");
    assert_eq!(summary.prior_window.to_string(), "2026-08-23 to 2026-09-19");
    assert_eq!(summary.breakdown_dimension.as_deref(), Some("brand"));
    assert!(!summary.insights.is_empty());
    assert!(result.html.contains("Trend Analysis"));
}

#[tokio::test]
async fn test_content_hash_strategy_round_trips() {
    // Content-hash names carry no category; the double chooses by the
    // templated description, which every strategy shares.
    let interpreter = Arc::new(top_brands_interpreter());
    let config = config().with_strategy(Strategy::ContentHash);
    let pipeline = pipeline(&config, interpreter.clone(), None, sql_backend());

    let ctx = UserAccessContext::new("asm.north", "nestle", Role::Asm).with_asm_code("ASM-N01");
    let result = pipeline.answer("nestle", &ctx, "Top brands last 4 weeks").await;

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.rows[0]["brand"], "Maggi");
    let seen = interpreter.seen();
    assert!(seen[0]
        .0
        .iter()
        .all(|s| s.name.starts_with("metric_") || s.name.starts_with("dimension_")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_users_get_their_own_rows() {
    const QUESTION: &str = "Show top 5 brands by sales value for last 4 weeks";
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::wrapping("sql", sql_backend()));
    let pipeline = Arc::new(pipeline(&config(), interpreter, None, backend.clone()));

    let users = vec![
        (
            UserAccessContext::new("asm.north", "nestle", Role::Asm).with_asm_code("ASM-N01"),
            vec!["Maggi", "KitKat", "Nescafe", "Munch", "Milkybar"],
        ),
        (
            UserAccessContext::new("asm.east", "nestle", Role::Asm).with_asm_code("ASM-N02"),
            vec!["Milo"],
        ),
        (
            UserAccessContext::new("so.two", "nestle", Role::So).with_so_code("SO-N02"),
            vec!["Nescafe", "Maggi", "Polo"],
        ),
        (
            UserAccessContext::new("asm.itc", "itc", Role::Asm).with_asm_code("ASM-N01"),
            vec!["Aashirvaad"],
        ),
    ];

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        for (ctx, expected) in &users {
            let pipeline = pipeline.clone();
            let ctx = ctx.clone();
            let expected: Vec<String> = expected.iter().map(|b| b.to_string()).collect();
            tasks.spawn(async move {
                let result = pipeline.answer(&ctx.tenant_id, &ctx, QUESTION).await;
                (ctx, expected, result)
            });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        let (ctx, expected, result) = joined.unwrap();
        assert!(result.success, "{}: {:?}", ctx.user_id, result.message);
        let brands: Vec<String> = result
            .rows
            .iter()
            .map(|r| r["brand"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(brands, expected, "rows for {}", ctx.user_id);
        assert_eq!(result.metadata.user_id, ctx.user_id);
    }

    // One entry per user, each holding that user's rows.
    assert_eq!(pipeline.cache().len(), users.len());
    assert!(backend.calls() >= users.len() && backend.calls() <= 4 * users.len());
    for (ctx, expected) in &users {
        let scope = AccessPolicyEngine::new()
            .resolve_scope(ctx)
            .unwrap()
            .describe(&ctx.tenant_id);
        let cached = pipeline
            .cache()
            .get(&ctx.tenant_id, &ctx.user_id, &scope, QUESTION)
            .unwrap();
        let brands: Vec<&str> = cached
            .rows
            .iter()
            .map(|r| r["brand"].as_str().unwrap())
            .collect();
        assert_eq!(&brands, expected);
    }
}
