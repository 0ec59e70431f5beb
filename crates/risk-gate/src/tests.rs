use market_context::{CacheDb, NewsCalendar};
use trade_core::Direction;
use trade_store::{QueuedTrade, TradeStore};

use crate::{correlation_conflict, GateRule, RiskGate, RiskLimits};

async fn setup_gate(limits: RiskLimits) -> (RiskGate, TradeStore) {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();
    // Memory-backed calendar with nothing fetched: the news rule is clear
    let cache = CacheDb::open_memory().await.unwrap();
    let news = NewsCalendar::new(cache, 2);
    let gate = RiskGate::new(store.clone(), news, limits);
    (gate, store)
}

async fn open_trade(store: &TradeStore, id: &str, symbol: &str, bias: &str) {
    let trade = QueuedTrade {
        id: id.to_string(),
        symbol: symbol.to_string(),
        bias: bias.to_string(),
        confidence: "high".to_string(),
        sl_pips: 30.0,
        tp1_pips: 20.0,
        tp2_pips: 40.0,
        ..Default::default()
    };
    store.log_trade_queued(&trade).await.unwrap();
    store
        .log_trade_executed(id, "executed", 0.0, 1, 2, 0.5, 0.5, "")
        .await
        .unwrap();
}

#[tokio::test]
async fn clean_state_allows() {
    let (gate, _store) = setup_gate(RiskLimits::default()).await;
    let decision = gate.check("GBPJPY", Direction::Long, 100_000.0).await.unwrap();
    assert!(decision.allowed);
    assert!(decision.reason.is_empty());
}

#[tokio::test]
async fn drawdown_breach_denies() {
    let (gate, store) = setup_gate(RiskLimits::default()).await;

    open_trade(&store, "t1", "USDJPY", "long").await;
    store
        .log_trade_closed("t1", 1, 0.0, "sl", -3500.0)
        .await
        .unwrap();

    let decision = gate.check("GBPJPY", Direction::Long, 100_000.0).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.rule, Some(GateRule::DailyDrawdown));
    assert!(decision.reason.contains("drawdown"));
}

#[tokio::test]
async fn profitable_day_is_not_drawdown() {
    let (gate, store) = setup_gate(RiskLimits::default()).await;

    open_trade(&store, "t1", "USDJPY", "long").await;
    store
        .log_trade_closed("t1", 1, 0.0, "sl", 5000.0)
        .await
        .unwrap();

    let decision = gate.check("GBPJPY", Direction::Long, 100_000.0).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn max_open_trades_denies() {
    let (gate, store) = setup_gate(RiskLimits {
        max_daily_drawdown_pct: 3.0,
        max_open_trades: 2,
    })
    .await;

    open_trade(&store, "t1", "USDJPY", "long").await;
    open_trade(&store, "t2", "EURUSD", "short").await;

    let decision = gate.check("GBPJPY", Direction::Long, 100_000.0).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.rule, Some(GateRule::MaxOpenTrades));
}

#[tokio::test]
async fn correlated_exposure_via_other_pair_denies() {
    let (gate, store) = setup_gate(RiskLimits {
        max_daily_drawdown_pct: 3.0,
        max_open_trades: 5,
    })
    .await;

    open_trade(&store, "t1", "GBPJPY", "long").await;

    // Long GBPUSD would double the long-GBP exposure
    let decision = gate.check("GBPUSD", Direction::Long, 100_000.0).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.rule, Some(GateRule::Correlation));
    assert!(decision.reason.contains("GBP"));

    // A second GBPJPY candidate is the same pair, not correlation
    let decision = gate.check("GBPJPY", Direction::Long, 100_000.0).await.unwrap();
    assert!(decision.allowed);
}

#[test]
fn correlation_expansion_covers_quote_leg() {
    // Short GBPJPY = long JPY; long USDJPY = short JPY -- no overlap
    let open = vec![("GBPJPY".to_string(), "short".to_string())];
    assert!(correlation_conflict(&open, "USDJPY", Direction::Long).is_none());

    // Short USDJPY = long JPY, same as the open short GBPJPY
    let conflict = correlation_conflict(&open, "USDJPY", Direction::Short).unwrap();
    assert!(conflict.contains("JPY already long via GBPJPY"));
}

#[test]
fn no_open_positions_is_clear() {
    assert!(correlation_conflict(&[], "GBPJPY", Direction::Long).is_none());
}
