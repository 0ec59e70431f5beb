//! The background analysis pipeline: screener -> full analysis ->
//! auto-queue -> notifications. One pipeline runs at a time globally;
//! ingress handlers only dispatch and return.

use chrono::Utc;
use trade_core::{TradeSetup, WatchTrade};
use trade_store::QueuedTrade;
use watch_registry::{WatchError, MIN_WATCHABLE_CHECKLIST};

use crate::{AnalysisBundle, AppState, WatchContext};

/// Run the full pipeline for the symbol's cached bundle.
pub async fn run_analysis(state: AppState, symbol: String) {
    let _pipeline = state.pipeline_lock.lock().await;

    let Some(bundle) = state.bundles.get(&symbol).map(|entry| entry.clone()) else {
        tracing::warn!("[{}] Pipeline dispatched without a cached bundle", symbol);
        return;
    };

    tracing::info!("[{}] Starting analysis pipeline", symbol);
    let date_tag = state.local_date_tag();
    let context = state.engine.context_for(&symbol, &date_tag).await;

    // Tier 1: cheap screener over the intraday frames
    let verdict = state
        .engine
        .screen(
            &symbol,
            &bundle.m15,
            &bundle.m5,
            &bundle.market_data,
            context.as_deref(),
        )
        .await;

    if !verdict.has_setup {
        if let Err(e) = state.store.record_scan_completed(&symbol).await {
            tracing::warn!("[{}] Failed to record scan: {}", symbol, e);
        }
        state
            .notifier
            .send_text(&format!(
                "🔍 {} screener: no setup worth a full analysis.\n{}",
                symbol, verdict.reasoning
            ))
            .await;
        tracing::info!("[{}] Screener skipped full analysis", symbol);
        return;
    }

    // Tier 2: full analysis
    let report = state
        .engine
        .analyze(
            &symbol,
            &bundle.h4,
            &bundle.h1,
            &bundle.m15,
            &bundle.m5,
            &bundle.market_data,
            context.as_deref(),
        )
        .await;

    if let Err(e) = state.store.record_scan_completed(&symbol).await {
        tracing::warn!("[{}] Failed to record scan: {}", symbol, e);
    }
    state.reports.insert(symbol.clone(), report.clone());
    tracing::info!(
        "[{}] Analysis complete: {} setups",
        symbol,
        report.setups.len()
    );

    if report.setups.is_empty() {
        state.notifier.send_no_setups(&report).await;
        return;
    }

    let news_check = state.news.restriction(&symbol).await;
    let news_note = if news_check.blocked {
        Some(format!(
            "NEWS BLOCK ACTIVE — {}: {}. Execution is blocked until the window passes.",
            news_check.event_currency, news_check.event_title
        ))
    } else if news_check.warning {
        Some(news_check.message.clone())
    } else {
        None
    };

    for (index, setup) in report.setups.iter().enumerate() {
        dispatch_setup(&state, &bundle, &report.market_summary, setup, index, news_note.as_deref())
            .await;
    }

    state
        .notifier
        .send_upcoming_events(&symbol, &report.upcoming_events)
        .await;
}

/// Route one setup by checklist band: below the watchable floor it is
/// informational only; between the floor and the auto-queue threshold
/// the human decides via buttons; at or above the threshold it is
/// auto-queued once the risk gate allows.
async fn dispatch_setup(
    state: &AppState,
    bundle: &AnalysisBundle,
    summary: &str,
    setup: &TradeSetup,
    index: usize,
    news_note: Option<&str>,
) {
    let symbol = &bundle.market_data.symbol;
    let points = setup.checklist_points().unwrap_or(0);

    if points < MIN_WATCHABLE_CHECKLIST {
        tracing::info!(
            "[{}] Setup below watchable checklist ({}); not executable",
            symbol,
            setup.checklist_score
        );
        state
            .notifier
            .send_low_quality_setup(symbol, setup, summary)
            .await;
        return;
    }

    if points >= state.config.auto_queue_min_checklist {
        let decision = match state
            .gate
            .check(symbol, setup.bias, bundle.market_data.account_balance)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!("[{}] Risk gate failure: {:#}", symbol, e);
                state
                    .notifier
                    .send_manual_setup(symbol, setup, summary, index, news_note)
                    .await;
                return;
            }
        };

        if decision.allowed {
            match state.registry.create_from_setup(symbol, setup).await {
                Ok(watched) => {
                    remember_watch_context(state, &watched, setup, summary, bundle);
                    state.notifier.send_auto_watch(&watched).await;
                    return;
                }
                Err(WatchError::AlreadyWatching) => {
                    tracing::info!(
                        "[{}] Qualifying setup not auto-queued: watch already active",
                        symbol
                    );
                    state
                        .notifier
                        .send_manual_setup(symbol, setup, summary, index, news_note)
                        .await;
                    return;
                }
                Err(e) => {
                    tracing::warn!("[{}] Auto-queue refused: {}", symbol, e);
                }
            }
        } else {
            state
                .notifier
                .send_gate_blocked(symbol, setup, &decision.reason)
                .await;
            return;
        }
    }

    // Below the threshold (or refused): a manual card with buttons
    state
        .notifier
        .send_manual_setup(symbol, setup, summary, index, news_note)
        .await;
}

pub fn remember_watch_context(
    state: &AppState,
    watched: &WatchTrade,
    setup: &TradeSetup,
    summary: &str,
    bundle: &AnalysisBundle,
) {
    state.watch_context.insert(
        watched.id.clone(),
        WatchContext {
            watch: watched.clone(),
            setup: setup.clone(),
            summary: summary.to_string(),
            session: bundle.market_data.session.clone(),
        },
    );
}

/// Build the durable queued row from a watch and its analysis context.
pub fn queued_trade_row(
    watch: &WatchTrade,
    context: Option<&WatchContext>,
) -> QueuedTrade {
    let mut row = QueuedTrade {
        id: watch.id.clone(),
        symbol: watch.symbol.clone(),
        bias: watch.bias.as_str().to_string(),
        confidence: watch.confidence.as_str().to_string(),
        entry_min: watch.entry_min,
        entry_max: watch.entry_max,
        stop_loss: watch.stop_loss,
        tp1: watch.tp1,
        tp2: watch.tp2,
        sl_pips: watch.sl_pips,
        tp1_pips: watch.tp1_pips,
        tp2_pips: watch.tp2_pips,
        checklist_score: watch.checklist_score.clone(),
        tp1_close_pct: watch.tp1_close_pct as i64,
        ..Default::default()
    };

    if let Some(context) = context {
        let setup = &context.setup;
        row.session = context.session.clone();
        row.market_summary = context.summary.clone();
        row.rr_tp1 = setup.rr_tp1;
        row.rr_tp2 = setup.rr_tp2;
        row.h1_trend = setup.h1_trend.clone();
        row.h4_trend = setup.h4_trend.clone();
        row.d1_trend = setup.d1_trend.clone();
        row.counter_trend = setup.counter_trend;
        row.trend_alignment = setup.trend_alignment.clone();
        row.entry_status = setup.entry_status.as_str().to_string();
        row.entry_distance_pips = setup.entry_distance_pips;
        row.negative_factors = setup.negative_factors.join("; ");
        row.price_zone = setup.price_zone.clone();
    }

    row
}

/// Archive the received screenshots for later inspection:
/// `<data>/screenshots/<date>_<symbol>/<HHMMSS>_<tf>.png`
pub async fn archive_screenshots(state: &AppState, symbol: &str, frames: &[(&str, &[u8])]) {
    let now_local = Utc::now().with_timezone(&state.config.timezone);
    let dir = state
        .config
        .screenshots_dir()
        .join(format!("{}_{}", now_local.format("%Y-%m-%d"), symbol));
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::warn!("[{}] Failed to create archive dir: {}", symbol, e);
        return;
    }

    let stamp = now_local.format("%H%M%S");
    for (tag, bytes) in frames {
        let path = dir.join(format!("{stamp}_{tag}.png"));
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            tracing::warn!("[{}] Failed to archive {}: {}", symbol, tag, e);
        }
    }
}
