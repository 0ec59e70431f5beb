use chrono::Utc;

use trade_core::{Confidence, Direction, WatchStatus, WatchTrade};

use crate::models::QueuedTrade;
use crate::TradeStore;

async fn setup_store() -> TradeStore {
    let store = TradeStore::connect_memory().await.expect("in-memory SQLite");
    store.init().await.expect("schema");
    store
}

fn queued(id: &str, symbol: &str) -> QueuedTrade {
    QueuedTrade {
        id: id.to_string(),
        symbol: symbol.to_string(),
        bias: "long".to_string(),
        confidence: "high".to_string(),
        session: "London".to_string(),
        entry_min: 191.20,
        entry_max: 191.40,
        stop_loss: 190.90,
        tp1: 191.80,
        tp2: 192.40,
        sl_pips: 30.0,
        tp1_pips: 20.0,
        tp2_pips: 40.0,
        rr_tp1: 0.7,
        rr_tp2: 1.3,
        checklist_score: "10/12".to_string(),
        tp1_close_pct: 40,
        ..Default::default()
    }
}

fn sample_watch(id: &str, symbol: &str) -> WatchTrade {
    WatchTrade {
        id: id.to_string(),
        symbol: symbol.to_string(),
        bias: Direction::Long,
        entry_min: 191.20,
        entry_max: 191.40,
        stop_loss: 190.90,
        tp1: 191.80,
        tp2: 192.40,
        sl_pips: 30.0,
        tp1_pips: 20.0,
        tp2_pips: 40.0,
        confidence: Confidence::High,
        confluence: vec!["BOS on M15".into(), "Asian low sweep".into()],
        checklist_score: "10/12".into(),
        tp1_close_pct: 40,
        created_at: Utc::now(),
        max_confirmations: 3,
        confirmations_used: 0,
        status: WatchStatus::Watching,
    }
}

#[tokio::test]
async fn init_is_idempotent() {
    let store = setup_store().await;
    store.init().await.unwrap();
    store.init().await.unwrap();
}

#[tokio::test]
async fn queued_insert_is_idempotent_on_id() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();

    let mut dup = queued("t1", "GBPJPY");
    dup.sl_pips = 99.0;
    store.log_trade_queued(&dup).await.unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.sl_pips, 30.0);
    assert_eq!(trade.status, "queued");
}

#[tokio::test]
async fn tp1_then_sl_is_partial_win_at_tp1_pips() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();

    store.log_trade_closed("t1", 11, 191.80, "tp1", 100.0).await.unwrap();
    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "open");
    assert!(trade.tp1_hit);
    assert_eq!(trade.pnl_money, 100.0);

    store.log_trade_closed("t1", 12, 191.30, "sl", 0.0).await.unwrap();
    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "partial_win");
    assert_eq!(trade.pnl_pips, 20.0);
    assert_eq!(trade.status, "closed");
    assert!(trade.closed_at.is_some());
}

#[tokio::test]
async fn sl_only_is_full_loss() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();

    store.log_trade_closed("t1", 11, 190.90, "sl", -150.0).await.unwrap();
    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "loss");
    assert_eq!(trade.pnl_pips, -30.0);
    assert_eq!(trade.pnl_money, -150.0);
}

#[tokio::test]
async fn both_tps_is_full_win() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();

    store.log_trade_closed("t1", 11, 191.80, "tp1", 100.0).await.unwrap();
    store.log_trade_closed("t1", 12, 192.40, "tp2", 200.0).await.unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "full_win");
    assert_eq!(trade.pnl_pips, 60.0);
    assert_eq!(trade.pnl_money, 300.0);
}

#[tokio::test]
async fn cancelled_resolves_with_zero_pips() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store.log_trade_closed("t1", 0, 0.0, "cancelled", 0.0).await.unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "cancelled");
    assert_eq!(trade.pnl_pips, 0.0);
    assert_eq!(trade.status, "closed");
}

#[tokio::test]
async fn late_close_after_resolution_moves_money_not_outcome() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();
    store.log_trade_closed("t1", 11, 190.90, "sl", -150.0).await.unwrap();

    // A manual adjustment arriving after resolution
    store.log_trade_closed("t1", 13, 191.00, "manual", 25.0).await.unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.outcome, "loss");
    assert_eq!(trade.pnl_pips, -30.0);
    assert_eq!(trade.pnl_money, -125.0);
}

#[tokio::test]
async fn failed_execution_keeps_the_terminal_reason() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "failed", 0.0, 0, 0, 0.0, 0.0, "not enough margin")
        .await
        .unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.status, "failed");
    assert_eq!(trade.outcome, "failed");
    assert_eq!(trade.error_message, "not enough margin");
}

#[tokio::test]
async fn replayed_execution_report_produces_no_delta() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 11, 12, 0.5, 0.5, "")
        .await
        .unwrap();

    let trade = store.get_trade("t1").await.unwrap().unwrap();
    assert_eq!(trade.status, "executed");
    assert_eq!(trade.outcome, "open");
    assert_eq!(trade.pnl_money, 0.0);
}

#[tokio::test]
async fn stale_sweep_only_touches_old_open_trades() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("old", "GBPJPY")).await.unwrap();
    store.log_trade_queued(&queued("new", "EURUSD")).await.unwrap();
    store
        .log_trade_executed("old", "executed", 191.30, 1, 2, 0.5, 0.5, "")
        .await
        .unwrap();
    store
        .log_trade_executed("new", "executed", 1.0800, 3, 4, 0.5, 0.5, "")
        .await
        .unwrap();

    // Backdate the old trade past the threshold
    let stale = (Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
    sqlx::query("UPDATE trades SET created_at = ? WHERE id = 'old'")
        .bind(&stale)
        .execute(store.pool())
        .await
        .unwrap();

    let swept = store.cleanup_stale_open_trades(24).await.unwrap();
    assert_eq!(swept, 1);

    assert_eq!(store.get_trade("old").await.unwrap().unwrap().outcome, "closed");
    assert_eq!(store.get_trade("new").await.unwrap().unwrap().outcome, "open");
}

#[tokio::test]
async fn watch_persistence_round_trip() {
    let store = setup_store().await;
    let watch = sample_watch("w1", "GBPJPY");
    store.persist_watch(&watch).await.unwrap();

    let loaded = store.load_active_watches().await.unwrap();
    assert_eq!(loaded.len(), 1);
    let restored = &loaded[0];
    assert_eq!(restored.id, "w1");
    assert_eq!(restored.bias, Direction::Long);
    assert_eq!(restored.confluence.len(), 2);
    assert_eq!(restored.tp1_close_pct, 40);
    assert_eq!(restored.status, WatchStatus::Watching);

    store.update_watch_status("w1", WatchStatus::Rejected).await.unwrap();
    assert!(store.load_active_watches().await.unwrap().is_empty());

    store.delete_watch("w1").await.unwrap();
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watch_trades")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}

#[tokio::test]
async fn daily_pnl_sums_only_today() {
    let store = setup_store().await;
    store.log_trade_queued(&queued("t1", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t1", "executed", 191.30, 1, 2, 0.5, 0.5, "")
        .await
        .unwrap();
    store.log_trade_closed("t1", 1, 190.90, "sl", -80.0).await.unwrap();

    store.log_trade_queued(&queued("t2", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("t2", "executed", 191.30, 3, 4, 0.5, 0.5, "")
        .await
        .unwrap();
    store.log_trade_closed("t2", 3, 190.90, "sl", -40.0).await.unwrap();

    // Push one of them into yesterday
    let yesterday = (Utc::now() - chrono::Duration::days(1)).to_rfc3339();
    sqlx::query("UPDATE trades SET closed_at = ? WHERE id = 't2'")
        .bind(&yesterday)
        .execute(store.pool())
        .await
        .unwrap();

    let pnl = store.daily_pnl().await.unwrap();
    assert_eq!(pnl.daily_pnl, -80.0);
    assert_eq!(pnl.closed_trades_today, 1);
}

#[tokio::test]
async fn stats_aggregates_outcomes_and_buckets() {
    let store = setup_store().await;

    for (id, reason, profit) in [("a", "sl", -100.0), ("b", "tp1", 60.0)] {
        store.log_trade_queued(&queued(id, "GBPJPY")).await.unwrap();
        store
            .log_trade_executed(id, "executed", 191.30, 1, 2, 0.5, 0.5, "")
            .await
            .unwrap();
        store.log_trade_closed(id, 1, 191.0, reason, profit).await.unwrap();
    }
    // Resolve "b" as a full win
    store.log_trade_closed("b", 2, 192.40, "tp2", 120.0).await.unwrap();

    let stats = store.stats(None, 30).await.unwrap();
    assert_eq!(stats.total_trades, 2);
    assert_eq!(stats.closed_trades, 2);
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.win_rate, 50.0);
    assert_eq!(stats.total_pnl_pips, 30.0); // +60 -30
    assert!(stats.pair_stats.contains_key("GBPJPY"));
    assert_eq!(stats.confidence_stats["high"].total, 2);

    let filtered = store.stats(Some("EURUSD"), 30).await.unwrap();
    assert_eq!(filtered.total_trades, 0);
}

#[tokio::test]
async fn weekly_report_buckets_by_checklist() {
    let store = setup_store().await;

    let mut low = queued("lo", "GBPJPY");
    low.checklist_score = "5/12".to_string();
    store.log_trade_queued(&low).await.unwrap();
    store
        .log_trade_executed("lo", "executed", 191.3, 1, 2, 0.5, 0.5, "")
        .await
        .unwrap();
    store.log_trade_closed("lo", 1, 190.9, "sl", -50.0).await.unwrap();

    store.log_trade_queued(&queued("hi", "GBPJPY")).await.unwrap();
    store
        .log_trade_executed("hi", "executed", 191.3, 3, 4, 0.5, 0.5, "")
        .await
        .unwrap();
    store.log_trade_closed("hi", 3, 191.8, "tp1", 60.0).await.unwrap();
    store.log_trade_closed("hi", 4, 192.4, "tp2", 120.0).await.unwrap();

    let report = store.weekly_report(None).await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.by_checklist["10-12"].wins, 1);
    assert_eq!(report.by_checklist["4-6"].wins, 0);
    assert_eq!(report.by_bias["long"].total, 2);
}

#[tokio::test]
async fn screening_stats_count_decisions() {
    let store = setup_store().await;
    store.log_screener_decision("GBPJPY", true, "clean sweep").await.unwrap();
    store.log_screener_decision("GBPJPY", false, "chop").await.unwrap();
    store.log_screener_decision("EURUSD", false, "no edge").await.unwrap();

    let stats = store.screening_stats(7).await.unwrap();
    assert_eq!(stats.total_screens, 3);
    assert_eq!(stats.setups_flagged, 1);
    assert_eq!(stats.skipped, 2);
}

#[tokio::test]
async fn post_trade_reviews_round_trip() {
    let store = setup_store().await;
    store
        .record_post_trade_review("t1", "GBPJPY", "Entry was late; zone already mitigated.")
        .await
        .unwrap();
    let reviews = store.recent_reviews("GBPJPY", 5).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert!(reviews[0].review.contains("mitigated"));
}
