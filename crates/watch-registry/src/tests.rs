use trade_core::{Confidence, Direction, TradeSetup, WatchStatus};
use trade_store::TradeStore;

use crate::registry::tp1_close_pct_from_checklist;
use crate::{WatchError, WatchRegistry};

async fn setup_registry() -> WatchRegistry {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();
    WatchRegistry::new(store, 3)
}

fn setup_with_checklist(score: &str) -> TradeSetup {
    serde_json::from_value(serde_json::json!({
        "bias": "long",
        "entry_min": 191.20, "entry_max": 191.40,
        "stop_loss": 190.90, "sl_pips": 30.0,
        "tp1": 191.80, "tp1_pips": 20.0,
        "tp2": 192.40, "tp2_pips": 40.0,
        "rr_tp1": 0.7, "rr_tp2": 1.3,
        "confidence": "high",
        "confluence": ["BOS on M15", "Asian low sweep", "H1 order block", "extra factor"],
        "checklist_score": score
    }))
    .unwrap()
}

#[tokio::test]
async fn create_truncates_confluence_and_derives_close_pct() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    assert_eq!(watch.confluence.len(), 3);
    assert_eq!(watch.tp1_close_pct, 40);
    assert_eq!(watch.id.len(), 8);
    assert_eq!(watch.status, WatchStatus::Watching);
    assert_eq!(watch.max_confirmations, 3);
}

#[tokio::test]
async fn second_watch_per_symbol_is_refused() {
    let registry = setup_registry().await;
    registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    let err = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("9/12"))
        .await
        .unwrap_err();
    assert_eq!(err, WatchError::AlreadyWatching);

    // Other symbols are unaffected
    assert!(registry
        .create_from_setup("EURUSD", &setup_with_checklist("8/12"))
        .await
        .is_ok());
    assert_eq!(registry.all_active().len(), 2);
}

#[tokio::test]
async fn low_checklist_never_becomes_a_watch() {
    let registry = setup_registry().await;
    let err = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("3/12"))
        .await
        .unwrap_err();
    assert_eq!(err, WatchError::ChecklistTooLow);

    let err = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("garbage"))
        .await
        .unwrap_err();
    assert_eq!(err, WatchError::ChecklistTooLow);
}

#[tokio::test]
async fn three_rejections_exhaust_the_watch() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    let first = registry
        .apply_confirmation(&watch.id, "GBPJPY", false)
        .await
        .unwrap();
    assert_eq!(first.status, WatchStatus::Watching);
    assert_eq!(first.remaining, 2);

    let second = registry
        .apply_confirmation(&watch.id, "GBPJPY", false)
        .await
        .unwrap();
    assert_eq!(second.remaining, 1);

    let third = registry
        .apply_confirmation(&watch.id, "GBPJPY", false)
        .await
        .unwrap();
    assert_eq!(third.status, WatchStatus::Rejected);
    assert_eq!(third.remaining, 0);

    // Terminal: gone from the board and from persistence
    assert!(registry.active("GBPJPY").is_none());
    let err = registry
        .apply_confirmation(&watch.id, "GBPJPY", false)
        .await
        .unwrap_err();
    assert_eq!(err, WatchError::NotFound);
}

#[tokio::test]
async fn confirmation_true_is_terminal() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("9/12"))
        .await
        .unwrap();

    let outcome = registry
        .apply_confirmation(&watch.id, "GBPJPY", true)
        .await
        .unwrap();
    assert!(outcome.confirmed);
    assert_eq!(outcome.status, WatchStatus::Confirmed);
    assert!(registry.active("GBPJPY").is_none());
}

#[tokio::test]
async fn id_mismatch_is_refused_without_mutation() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    let err = registry
        .apply_confirmation("wrong-id", "GBPJPY", false)
        .await
        .unwrap_err();
    assert_eq!(err, WatchError::IdMismatch);

    let err = registry.validate_attempt(&watch.id, "EURUSD").unwrap_err();
    assert_eq!(err, WatchError::NotFound);

    // No attempt was consumed
    assert_eq!(registry.active("GBPJPY").unwrap().confirmations_used, 0);
}

#[tokio::test]
async fn expiry_applies_only_past_kill_zone_end() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    // GBPJPY kill zone ends at 20:00 local
    assert!(registry.expire_if_past("GBPJPY", 19).await.is_none());
    assert!(registry.active("GBPJPY").is_some());

    let expired = registry.expire_if_past("GBPJPY", 20).await.unwrap();
    assert_eq!(expired.id, watch.id);
    assert_eq!(expired.status, WatchStatus::Expired);
    assert!(registry.active("GBPJPY").is_none());

    // Second tick finds nothing to expire
    assert!(registry.expire_if_past("GBPJPY", 20).await.is_none());
}

#[tokio::test]
async fn restore_reseeds_without_gate() {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();
    let registry = WatchRegistry::new(store.clone(), 3);

    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    // Simulate restart: fresh registry seeded from the store
    let recovered = WatchRegistry::new(store.clone(), 3);
    for persisted in store.load_active_watches().await.unwrap() {
        recovered.restore(persisted);
    }
    let active = recovered.active("GBPJPY").unwrap();
    assert_eq!(active.id, watch.id);
    assert_eq!(active.confirmations_used, 0);
}

#[tokio::test]
async fn dismiss_removes_watch_without_consuming_attempts() {
    let registry = setup_registry().await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_with_checklist("10/12"))
        .await
        .unwrap();

    let dismissed = registry.dismiss(&watch.id, "GBPJPY").await.unwrap();
    assert_eq!(dismissed.status, WatchStatus::Rejected);
    assert_eq!(dismissed.confirmations_used, 0);
    assert!(registry.active("GBPJPY").is_none());
}

#[test]
fn tp1_close_fraction_table() {
    assert_eq!(tp1_close_pct_from_checklist(12), 40);
    assert_eq!(tp1_close_pct_from_checklist(10), 40);
    assert_eq!(tp1_close_pct_from_checklist(9), 45);
    assert_eq!(tp1_close_pct_from_checklist(8), 45);
    assert_eq!(tp1_close_pct_from_checklist(7), 55);
    assert_eq!(tp1_close_pct_from_checklist(6), 55);
    assert_eq!(tp1_close_pct_from_checklist(5), 60);
    assert_eq!(tp1_close_pct_from_checklist(4), 60);
}
