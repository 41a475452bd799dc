mod common;

use common::{config, engine, pipeline, registry, top_brands_interpreter, Behavior, MockBackend};
use secure_analytics::execution::{QueryBackend, SqlBackend};
use secure_analytics::observability::AuditOutcome;
use secure_analytics::security::{Role, UserAccessContext};
use std::sync::Arc;
use std::time::Duration;

const QUESTION: &str = "Show top 5 brands by sales value for last 4 weeks";
const NORTH: &str = "tenant=nestle AND asm_code='ASM-N01'";

fn asm(user: &str) -> UserAccessContext {
    UserAccessContext::new(user, "nestle", Role::Asm).with_asm_code("ASM-N01")
}

#[tokio::test]
async fn test_same_user_is_served_from_cache() {
    let interpreter = Arc::new(top_brands_interpreter());
    let sql: Arc<dyn QueryBackend> = Arc::new(SqlBackend::new(registry(), Arc::new(engine())));
    let backend = Arc::new(MockBackend::wrapping("sql", sql));
    let pipeline = pipeline(&config(), interpreter.clone(), None, backend.clone());

    let first = pipeline.answer("nestle", &asm("asm1"), QUESTION).await;
    let second = pipeline
        .answer("nestle", &asm("asm1"), "  show top 5 brands by sales value for LAST 4 weeks ")
        .await;

    assert!(first.success);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(interpreter.calls(), 1);
    assert_eq!(backend.calls(), 1);
    assert_eq!(pipeline.audit().recent(1)[0].outcome, AuditOutcome::CacheHit);
}

#[tokio::test]
async fn test_users_do_not_share_entries() {
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::new("sql", Behavior::Succeed));
    let pipeline = pipeline(&config(), interpreter.clone(), None, backend.clone());

    pipeline.answer("nestle", &asm("asm1"), QUESTION).await;
    pipeline.answer("nestle", &asm("asm2"), QUESTION).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(interpreter.calls(), 2);
    assert_eq!(pipeline.cache().len(), 2);
    assert!(pipeline.cache().get("nestle", "asm1", NORTH, QUESTION).is_some());
    assert!(pipeline.cache().get("nestle", "asm2", NORTH, QUESTION).is_some());
}

#[tokio::test]
async fn test_territory_change_is_not_served_old_rows() {
    let interpreter = Arc::new(top_brands_interpreter());
    let sql: Arc<dyn QueryBackend> = Arc::new(SqlBackend::new(registry(), Arc::new(engine())));
    let backend = Arc::new(MockBackend::wrapping("sql", sql));
    let pipeline = pipeline(&config(), interpreter, None, backend.clone());

    let north = pipeline.answer("nestle", &asm("asm1"), QUESTION).await;
    let moved = UserAccessContext::new("asm1", "nestle", Role::Asm).with_asm_code("ASM-N02");
    let south = pipeline.answer("nestle", &moved, QUESTION).await;

    assert!(north.success && south.success);
    assert_eq!(backend.calls(), 2);
    let brands: Vec<&str> = south
        .rows
        .iter()
        .map(|r| r["brand"].as_str().unwrap())
        .collect();
    assert_eq!(brands, vec!["Milo"]);
    assert_eq!(pipeline.cache().len(), 2);
}

#[tokio::test]
async fn test_data_refresh_within_ttl_serves_stale_answer() {
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::new("sql", Behavior::Succeed));
    let pipeline = pipeline(&config(), interpreter, None, backend.clone());

    let before = pipeline.answer("nestle", &asm("asm1"), QUESTION).await;
    // The backend would now return different rows; nothing invalidates the entry.
    let after = pipeline.answer("nestle", &asm("asm1"), QUESTION).await;

    assert_eq!(before, after);
    assert_eq!(after.rows[0]["brand"], "sql#1:brand");
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_expired_entry_is_recomputed() {
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::new("sql", Behavior::Succeed));
    let config = config().with_cache_ttl(Duration::from_millis(30));
    let pipeline = pipeline(&config, interpreter.clone(), None, backend.clone());

    pipeline.answer("nestle", &asm("asm1"), QUESTION).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    pipeline.answer("nestle", &asm("asm1"), QUESTION).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(interpreter.calls(), 2);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::new("sql", Behavior::Fail));
    let pipeline = pipeline(&config(), interpreter, None, backend.clone());

    let result = pipeline.answer("nestle", &asm("asm1"), QUESTION).await;

    assert!(!result.success);
    assert!(pipeline.cache().is_empty());
    assert_eq!(pipeline.audit().recent(1)[0].outcome, AuditOutcome::Failed);
}

#[tokio::test]
async fn test_cancelled_request_leaves_cache_untouched() {
    let interpreter = Arc::new(top_brands_interpreter());
    let backend = Arc::new(MockBackend::new("sql", Behavior::Hang(Duration::from_secs(30))));
    let pipeline = pipeline(&config(), interpreter, None, backend.clone());

    let ctx = asm("asm1");
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.answer("nestle", &ctx, QUESTION),
    )
    .await;

    assert!(cancelled.is_err());
    assert_eq!(backend.calls(), 1);
    assert!(pipeline.cache().is_empty());
}
