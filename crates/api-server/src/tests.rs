use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use analysis_engine::{AnalysisEngine, DailyContext};
use market_context::{CacheDb, ContextBuilder, ContextConfig, NewsCalendar};
use notifier::{Notifier, NotifierConfig};
use risk_gate::{RiskGate, RiskLimits};
use trade_core::{Confidence, Direction, TradeSetup, WatchStatus, WatchTrade};
use trade_store::TradeStore;
use watch_registry::{TradeQueue, WatchRegistry};

use crate::{build_router, AppState, Config};

const TEST_KEY: &str = "test-key";

async fn test_state() -> AppState {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();

    let cache = CacheDb::open_memory().await.unwrap();
    let fundamentals = CacheDb::open_memory().await.unwrap();
    let news = NewsCalendar::new(cache.clone(), 2);
    let context_builder = ContextBuilder::new(cache, ContextConfig::default());
    let daily = DailyContext::new(None, context_builder.clone(), fundamentals);
    let engine = Arc::new(AnalysisEngine::new(None, store.clone(), daily));

    let tmp = tempfile::tempdir().unwrap().into_path();
    let config = Config {
        api_key: TEST_KEY.to_string(),
        model_api_key: None,
        analysis_model: "test-model".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        log_level: "info".to_string(),
        max_daily_drawdown_pct: 3.0,
        max_open_trades: 2,
        active_pairs: vec!["GBPJPY".to_string()],
        data_dir: tmp,
        auto_queue_min_checklist: 7,
        pending_ttl_secs: 60,
        max_confirmations: 3,
        stale_trade_hours: 24,
        news_window_minutes: 2,
        api_ninjas_key: None,
        fred_api_key: None,
        timezone: chrono_tz::Europe::Berlin,
    };

    AppState {
        config: Arc::new(config),
        store: store.clone(),
        engine,
        registry: Arc::new(WatchRegistry::new(store.clone(), 3)),
        queue: Arc::new(TradeQueue::new(60)),
        gate: Arc::new(RiskGate::new(store.clone(), news.clone(), RiskLimits::default())),
        notifier: Arc::new(Notifier::new(&NotifierConfig::default())),
        news,
        context_builder,
        bundles: Arc::new(dashmap::DashMap::new()),
        reports: Arc::new(dashmap::DashMap::new()),
        watch_context: Arc::new(dashmap::DashMap::new()),
        pipeline_lock: Arc::new(tokio::sync::Mutex::new(())),
    }
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(path: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn sample_watch(id: &str) -> WatchTrade {
    WatchTrade {
        id: id.to_string(),
        symbol: "GBPJPY".to_string(),
        bias: Direction::Long,
        entry_min: 191.2,
        entry_max: 191.4,
        stop_loss: 190.9,
        tp1: 191.8,
        tp2: 192.4,
        sl_pips: 30.0,
        tp1_pips: 20.0,
        tp2_pips: 40.0,
        confidence: Confidence::High,
        confluence: vec!["BOS on M15".to_string()],
        checklist_score: "10/12".to_string(),
        tp1_close_pct: 40,
        created_at: chrono::Utc::now(),
        max_confirmations: 3,
        confirmations_used: 0,
        status: WatchStatus::Watching,
    }
}

fn sample_setup() -> TradeSetup {
    serde_json::from_value(json!({
        "bias": "long",
        "entry_min": 191.2, "entry_max": 191.4,
        "stop_loss": 190.9, "sl_pips": 30.0,
        "tp1": 191.8, "tp1_pips": 20.0,
        "tp2": 192.4, "tp2_pips": 40.0,
        "rr_tp1": 0.7, "rr_tp2": 1.3,
        "confidence": "high",
        "checklist_score": "10/12"
    }))
    .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let state = test_state().await;
    let (status, body) = send(&state, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn authenticated_routes_reject_missing_or_wrong_key() {
    let state = test_state().await;

    let (status, _) = send(&state, get("/stats", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&state, get("/stats", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&state, get("/stats", Some(TEST_KEY))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn public_surface_needs_no_key() {
    let state = test_state().await;

    let (status, body) = send(&state, get("/public/stats?days=30", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period_days"], 30);

    let (status, body) = send(&state, get("/public/trades?limit=10", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn public_trades_redact_account_fields() {
    let state = test_state().await;
    let row = crate::pipeline::queued_trade_row(&sample_watch("t1"), None);
    state.store.log_trade_queued(&row).await.unwrap();
    state
        .store
        .log_trade_executed("t1", "executed", 191.3, 7001, 7002, 0.5, 0.5, "")
        .await
        .unwrap();
    state.store.log_trade_closed("t1", 7001, 190.9, "sl", -150.0).await.unwrap();

    let (status, body) = send(&state, get("/public/trades", None)).await;
    assert_eq!(status, StatusCode::OK);
    let trade = &body["trades"][0];
    assert_eq!(trade["id"], "t1");
    assert_eq!(trade["outcome"], "loss");
    assert_eq!(trade["pnl_pips"], -30.0);
    assert!(trade.get("pnl_money").is_none());
    assert!(trade.get("lots_tp1").is_none());
    assert!(trade.get("ticket_tp1").is_none());
}

#[tokio::test]
async fn watch_trade_endpoint_reflects_registry() {
    let state = test_state().await;

    let (status, body) = send(&state, get("/watch_trade?symbol=GBPJPY", Some(TEST_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["watching"], false);

    state.registry.restore(sample_watch("w1"));
    let (_, body) = send(&state, get("/watch_trade?symbol=GBPJPY", Some(TEST_KEY))).await;
    assert_eq!(body["watching"], true);
    assert_eq!(body["watch"]["id"], "w1");
    assert_eq!(body["watch"]["entry_min"], 191.2);
}

#[tokio::test]
async fn pending_trade_broadcast_then_cleared_on_execution() {
    let state = test_state().await;
    let watch = sample_watch("p1");
    state
        .queue
        .publish(trade_core::PendingTrade::from_watch(&watch, chrono::Utc::now()));

    // Several polls inside the window see the same entry
    for _ in 0..2 {
        let (status, body) =
            send(&state, get("/pending_trade?symbol=GBPJPY", Some(TEST_KEY))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], true);
        assert_eq!(body["trade"]["id"], "p1");
    }

    // The execution report consumes it
    let row = crate::pipeline::queued_trade_row(&watch, None);
    state.store.log_trade_queued(&row).await.unwrap();
    let (status, _) = send(
        &state,
        post_json(
            "/trade_executed",
            Some(TEST_KEY),
            json!({
                "trade_id": "p1",
                "symbol": "GBPJPY",
                "status": "executed",
                "actual_entry": 191.31,
                "ticket_tp1": 7001, "ticket_tp2": 7002,
                "lots_tp1": 0.5, "lots_tp2": 0.5
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&state, get("/pending_trade?symbol=GBPJPY", Some(TEST_KEY))).await;
    assert_eq!(body["pending"], false);

    let record = state.store.get_trade("p1").await.unwrap().unwrap();
    assert_eq!(record.status, "executed");
    assert_eq!(record.outcome, "open");
}

#[tokio::test]
async fn close_reports_flow_through_the_close_algorithm() {
    let state = test_state().await;
    let watch = sample_watch("c1");
    let row = crate::pipeline::queued_trade_row(&watch, None);
    state.store.log_trade_queued(&row).await.unwrap();
    state
        .store
        .log_trade_executed("c1", "executed", 191.3, 1, 2, 0.5, 0.5, "")
        .await
        .unwrap();

    for (reason, profit) in [("tp1", 100.0), ("sl", 0.0)] {
        let (status, _) = send(
            &state,
            post_json(
                "/trade_closed",
                Some(TEST_KEY),
                json!({
                    "trade_id": "c1",
                    "symbol": "GBPJPY",
                    "ticket": 1,
                    "close_price": 191.8,
                    "close_reason": reason,
                    "profit": profit
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let record = state.store.get_trade("c1").await.unwrap().unwrap();
    assert_eq!(record.outcome, "partial_win");
    assert_eq!(record.pnl_pips, 20.0);
    assert_eq!(record.pnl_money, 100.0);
}

#[tokio::test]
async fn malformed_reports_are_rejected_without_mutation() {
    let state = test_state().await;

    let (status, _) = send(
        &state,
        post_json("/trade_executed", Some(TEST_KEY), json!({ "symbol": "GBPJPY" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &state,
        post_json(
            "/trade_closed",
            Some(TEST_KEY),
            json!({ "trade_id": "", "close_reason": "sl" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirm_entry_with_unknown_watch_is_a_stable_404() {
    let state = test_state().await;

    let boundary = "deskboundary";
    let mut body = String::new();
    for (name, value) in [
        ("trade_id", "nope1234"),
        ("symbol", "GBPJPY"),
        ("bias", "long"),
        ("current_price", "191.30"),
    ] {
        body.push_str(&format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\ncontent-disposition: form-data; name=\"screenshot_m1\"; filename=\"m1.png\"\r\ncontent-type: image/png\r\n\r\nPNGBYTES\r\n--{boundary}--\r\n"
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/confirm_entry")
        .header("X-API-Key", TEST_KEY)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&state, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no active watch for symbol");
}

#[tokio::test]
async fn scan_without_data_is_404() {
    let state = test_state().await;
    let (status, _) = send(&state, get("/scan?symbol=GBPJPY", Some(TEST_KEY))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_execute_passes_the_gate_and_queues() {
    let state = test_state().await;
    state.reports.insert(
        "GBPJPY".to_string(),
        trade_core::AnalysisReport {
            symbol: "GBPJPY".to_string(),
            digits: 3,
            setups: vec![sample_setup()],
            market_summary: "clean sweep".to_string(),
            ..Default::default()
        },
    );

    let hub = crate::hooks::Hub::new(state.clone());
    use notifier::DeskHooks;
    let reply = hub.execute_setup("GBPJPY", 0).await.unwrap();
    assert!(reply.contains("queued"));

    let pending = state.queue.get("GBPJPY").unwrap();
    assert_eq!(pending.bias, Direction::Long);
    let record = state.store.get_trade(&pending.id).await.unwrap().unwrap();
    assert_eq!(record.status, "queued");

    // An unknown index is reported, not panicked on
    assert!(hub.execute_setup("GBPJPY", 9).await.is_err());
}

#[tokio::test]
async fn sub_floor_setup_is_never_queued_even_manually() {
    let state = test_state().await;
    let mut setup = sample_setup();
    setup.checklist_score = "3/12".to_string();
    state.reports.insert(
        "GBPJPY".to_string(),
        trade_core::AnalysisReport {
            symbol: "GBPJPY".to_string(),
            digits: 3,
            setups: vec![setup],
            market_summary: "weak structure".to_string(),
            ..Default::default()
        },
    );

    let hub = crate::hooks::Hub::new(state.clone());
    use notifier::DeskHooks;
    let err = hub.execute_setup("GBPJPY", 0).await.unwrap_err();
    assert!(err.contains("below the executable minimum"));
    assert!(state.queue.get("GBPJPY").is_none());
}
