use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use trade_core::{MarketData, PendingTrade, TradeCloseReport, TradeExecutionReport};

use crate::error::AppError;
use crate::{pipeline, AnalysisBundle, AppState};

/// Multipart ceiling: four chart PNGs plus the data payload
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn terminal_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/analyze", post(analyze))
        .route("/scan", get(scan))
        .route("/pending_trade", get(pending_trade))
        .route("/watch_trade", get(watch_trade))
        .route("/confirm_entry", post(confirm_entry))
        .route("/trade_executed", post(trade_executed))
        .route("/trade_closed", post(trade_closed))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[derive(Deserialize)]
struct SymbolQuery {
    #[serde(default)]
    symbol: String,
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    symbol: String,
    days: Option<i64>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let setups: serde_json::Map<String, Value> = state
        .reports
        .iter()
        .map(|entry| (entry.key().clone(), json!(entry.setups.len())))
        .collect();

    Json(json!({
        "status": "ok",
        "pairs_analyzed": state.reports.iter().map(|e| e.key().clone()).collect::<Vec<_>>(),
        "pending_trades": state.queue.live_symbols(),
        "watches": state
            .registry
            .all_active()
            .iter()
            .map(|w| w.symbol.clone())
            .collect::<Vec<_>>(),
        "setups": setups,
    }))
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    let symbol = (!query.symbol.is_empty()).then_some(query.symbol.as_str());
    let stats = state.store.stats(symbol, query.days.unwrap_or(30)).await?;
    Ok(Json(serde_json::to_value(stats).map_err(anyhow::Error::from)?))
}

/// Multipart intake from the terminal: four chart frames plus the JSON
/// market-data part. The bundle is cached, archived, and the pipeline is
/// dispatched in the background; the terminal gets `accepted` at once.
async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut h4 = None;
    let mut h1 = None;
    let mut m15 = None;
    let mut m5 = None;
    let mut market_data_raw = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("unreadable field {name}: {e}")))?;
        match name.as_str() {
            "screenshot_h4" => h4 = Some(bytes.to_vec()),
            "screenshot_h1" => h1 = Some(bytes.to_vec()),
            "screenshot_m15" => m15 = Some(bytes.to_vec()),
            "screenshot_m5" => m5 = Some(bytes.to_vec()),
            "market_data" => market_data_raw = Some(bytes.to_vec()),
            other => tracing::debug!("Ignoring unknown multipart field {}", other),
        }
    }

    let (Some(h4), Some(h1), Some(m15), Some(m5)) = (h4, h1, m15, m5) else {
        return Err(AppError::bad_request(
            "expected screenshot_h4, screenshot_h1, screenshot_m15 and screenshot_m5",
        ));
    };
    let market_data_raw =
        market_data_raw.ok_or_else(|| AppError::bad_request("missing market_data field"))?;
    let market_data: MarketData = serde_json::from_slice(&market_data_raw)
        .map_err(|e| AppError::bad_request(format!("invalid market data JSON: {e}")))?;

    let symbol = market_data.symbol.clone();
    if symbol.is_empty() {
        return Err(AppError::bad_request("market data is missing the symbol"));
    }

    tracing::info!(
        "[{}] Analysis request received (H4={}B H1={}B M15={}B M5={}B)",
        symbol,
        h4.len(),
        h1.len(),
        m15.len(),
        m5.len()
    );

    pipeline::archive_screenshots(
        &state,
        &symbol,
        &[
            ("h4", h4.as_slice()),
            ("h1", h1.as_slice()),
            ("m15", m15.as_slice()),
            ("m5", m5.as_slice()),
        ],
    )
    .await;

    state.bundles.insert(
        symbol.clone(),
        AnalysisBundle {
            h4,
            h1,
            m15,
            m5,
            market_data,
            received_at: Utc::now(),
        },
    );

    tokio::spawn(pipeline::run_analysis(state.clone(), symbol.clone()));

    Ok(Json(json!({
        "status": "accepted",
        "symbol": symbol,
        "message": "Analysis started",
    })))
}

/// Re-run the pipeline from the last cached bundle.
async fn scan(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<Value>, AppError> {
    let target = if !query.symbol.is_empty() {
        query.symbol.to_uppercase()
    } else {
        state
            .bundles
            .iter()
            .next()
            .map(|entry| entry.key().clone())
            .unwrap_or_default()
    };

    if !target.is_empty() && state.bundles.contains_key(&target) {
        tokio::spawn(pipeline::run_analysis(state.clone(), target.clone()));
        return Ok(Json(json!({
            "status": "accepted",
            "symbol": target,
            "message": "Re-analysis started",
        })));
    }

    if let Some(report) = state.reports.get(&target) {
        return Ok(Json(json!({
            "status": "cached",
            "symbol": target,
            "message": "Returning last analysis",
            "setups": report.setups.len(),
        })));
    }

    Err(AppError::not_found(
        "no cached bundle; push screenshots from the terminal first",
    ))
}

/// TTL-windowed read of the hand-off queue. Every terminal polling
/// inside the window sees the same entry; nothing is consumed here.
async fn pending_trade(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Json<Value> {
    match state.queue.get(&query.symbol) {
        Some(trade) => Json(json!({ "pending": true, "trade": trade })),
        None => Json(json!({ "pending": false })),
    }
}

/// Current active watch with its zone, for the terminal's zone poller.
async fn watch_trade(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Json<Value> {
    match state.registry.active(&query.symbol) {
        Some(watch) => Json(json!({ "watching": true, "watch": watch })),
        None => Json(json!({ "watching": false })),
    }
}

/// Per-tick entry confirmation: one M1 frame plus the watch coordinates.
/// Held under the per-symbol confirm lock so exactly one mutator runs
/// per watch; a transient model failure does not consume an attempt.
async fn confirm_entry(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut m1 = None;
    let mut trade_id = String::new();
    let mut symbol = String::new();
    let mut current_price: Option<f64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "screenshot_m1" => {
                m1 = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::bad_request(format!("unreadable image: {e}")))?
                        .to_vec(),
                );
            }
            "trade_id" | "symbol" | "bias" | "current_price" | "entry_min" | "entry_max" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(format!("unreadable field {name}: {e}")))?;
                match name.as_str() {
                    "trade_id" => trade_id = text,
                    "symbol" => symbol = text.to_uppercase(),
                    "current_price" => {
                        current_price = Some(text.parse().map_err(|_| {
                            AppError::bad_request("current_price is not a number")
                        })?)
                    }
                    _ => {}
                }
            }
            other => tracing::debug!("Ignoring unknown confirm field {}", other),
        }
    }

    let m1 = m1.ok_or_else(|| AppError::bad_request("missing screenshot_m1"))?;
    if trade_id.is_empty() || symbol.is_empty() {
        return Err(AppError::bad_request("trade_id and symbol are required"));
    }
    let current_price =
        current_price.ok_or_else(|| AppError::bad_request("missing current_price"))?;

    let lock = state.registry.confirm_lock(&symbol);
    let _guard = lock.lock().await;

    let watch = state.registry.validate_attempt(&trade_id, &symbol)?;

    {
        let notifier = state.notifier.clone();
        let ping_watch = watch.clone();
        tokio::spawn(async move {
            notifier.send_zone_reached(&ping_watch, current_price).await;
        });
    }

    match state.engine.confirm_entry(&watch, current_price, &m1).await {
        Err(e) => {
            // Transient: the attempt budget is untouched
            tracing::warn!("[{}] Confirmation attempt not counted: {}", symbol, e);
            Ok(Json(json!({
                "confirmed": false,
                "transient": true,
                "reasoning": e.to_string(),
                "remaining": watch.attempts_remaining(),
                "status": "watching",
            })))
        }
        Ok(verdict) => {
            let outcome = state
                .registry
                .apply_confirmation(&trade_id, &symbol, verdict.confirmed)
                .await?;

            if verdict.confirmed {
                let published = state
                    .queue
                    .publish(PendingTrade::from_watch(&watch, Utc::now()));
                let context = state.watch_context.get(&watch.id).map(|c| c.clone());
                let row = pipeline::queued_trade_row(&watch, context.as_ref());
                if let Err(e) = state.store.log_trade_queued(&row).await {
                    tracing::error!("[{}] Failed to log queued trade: {:#}", symbol, e);
                }

                let notifier = state.notifier.clone();
                let accepted_watch = watch.clone();
                let reasoning = verdict.reasoning.clone();
                tokio::spawn(async move {
                    notifier
                        .send_confirmation_accepted(&accepted_watch, &reasoning)
                        .await;
                    notifier.send_pending_queued(&published).await;
                });
            } else {
                let notifier = state.notifier.clone();
                let rejected_watch = watch.clone();
                let reasoning = verdict.reasoning.clone();
                let remaining = outcome.remaining;
                tokio::spawn(async move {
                    notifier
                        .send_confirmation_rejected(&rejected_watch, &reasoning, remaining)
                        .await;
                });
            }

            Ok(Json(json!({
                "confirmed": verdict.confirmed,
                "reasoning": verdict.reasoning,
                "remaining": outcome.remaining,
                "status": outcome.status.as_str(),
            })))
        }
    }
}

async fn trade_executed(
    State(state): State<AppState>,
    Json(report): Json<TradeExecutionReport>,
) -> Result<Json<Value>, AppError> {
    if report.trade_id.is_empty() {
        return Err(AppError::bad_request("trade_id is required"));
    }
    tracing::info!(
        "[{}] Trade execution report: id={} status={}",
        report.symbol,
        report.trade_id,
        report.status
    );

    state.queue.clear(&report.symbol);
    state
        .store
        .log_trade_executed(
            &report.trade_id,
            &report.status,
            report.actual_entry,
            report.ticket_tp1,
            report.ticket_tp2,
            report.lots_tp1,
            report.lots_tp2,
            &report.error_message,
        )
        .await?;

    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.send_execution_report(&report).await;
    });

    Ok(Json(json!({ "status": "ok", "message": "Execution report received" })))
}

async fn trade_closed(
    State(state): State<AppState>,
    Json(report): Json<TradeCloseReport>,
) -> Result<Json<Value>, AppError> {
    if report.trade_id.is_empty() {
        return Err(AppError::bad_request("trade_id is required"));
    }
    tracing::info!(
        "[{}] Trade close report: id={} reason={} profit={:+.2}",
        report.symbol,
        report.trade_id,
        report.close_reason,
        report.profit
    );

    let was_resolved = state
        .store
        .get_trade(&report.trade_id)
        .await?
        .map(|record| record.is_resolved())
        .unwrap_or(false);

    state
        .store
        .log_trade_closed(
            &report.trade_id,
            report.ticket,
            report.close_price,
            &report.close_reason,
            report.profit,
        )
        .await?;

    // Review once, on the resolving report
    if !was_resolved {
        if let Some(record) = state.store.get_trade(&report.trade_id).await? {
            if record.is_resolved() {
                let engine = state.engine.clone();
                tokio::spawn(async move {
                    engine.post_trade_review(&record).await;
                });
            }
        }
    }

    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.send_close_notice(&report).await;
    });

    Ok(Json(json!({ "status": "ok", "message": "Close report received" })))
}
