pub mod auth;
pub mod config;
pub mod error;
pub mod hooks;
pub mod pipeline;
pub mod public_routes;
pub mod routes;
#[cfg(test)]
mod tests;

use anyhow::Result;
use axum::middleware;
use axum::Router;
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use analysis_engine::{AnalysisEngine, DailyContext};
use llm_client::{AnthropicClient, ModelProvider};
use market_context::{CacheDb, ContextBuilder, ContextConfig, NewsCalendar};
use notifier::{Notifier, NotifierConfig};
use risk_gate::{RiskGate, RiskLimits};
use scheduler::Scheduler;
use trade_core::{get_profile, AnalysisReport, MarketData, TradeSetup, WatchTrade};
use trade_store::TradeStore;
use watch_registry::{TradeQueue, WatchRegistry};

pub use config::Config;
pub use error::AppError;

/// The most recent screenshot bundle for a symbol, kept in memory for
/// `/scan` re-runs.
#[derive(Clone)]
pub struct AnalysisBundle {
    pub h4: Vec<u8>,
    pub h1: Vec<u8>,
    pub m15: Vec<u8>,
    pub m5: Vec<u8>,
    pub market_data: MarketData,
    pub received_at: DateTime<Utc>,
}

/// Originating setup kept alongside a watch so the trade record can be
/// written with full analysis context at publish time, and so Force
/// Execute can rebuild the instruction after a rejection.
#[derive(Clone)]
pub struct WatchContext {
    pub watch: WatchTrade,
    pub setup: TradeSetup,
    pub summary: String,
    pub session: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: TradeStore,
    pub engine: Arc<AnalysisEngine>,
    pub registry: Arc<WatchRegistry>,
    pub queue: Arc<TradeQueue>,
    pub gate: Arc<RiskGate>,
    pub notifier: Arc<Notifier>,
    pub news: NewsCalendar,
    pub context_builder: ContextBuilder,
    pub bundles: Arc<DashMap<String, AnalysisBundle>>,
    pub reports: Arc<DashMap<String, AnalysisReport>>,
    pub watch_context: Arc<DashMap<String, WatchContext>>,
    /// Exactly one full-analysis pipeline runs at a time
    pub pipeline_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Most recent account balance seen from any terminal snapshot.
    pub fn latest_account_balance(&self) -> f64 {
        self.bundles
            .iter()
            .max_by_key(|entry| entry.received_at)
            .map(|entry| entry.market_data.account_balance)
            .unwrap_or(0.0)
    }

    /// Desk-local date tag used as the daily context key.
    pub fn local_date_tag(&self) -> String {
        Utc::now()
            .with_timezone(&self.config.timezone)
            .format("%Y-%m-%d")
            .to_string()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::terminal_routes())
        .merge(public_routes::public_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tracing::info!(
        "Starting trade coordinator on {}:{} (pairs: {})",
        config.host,
        config.port,
        config.active_pairs.join(", ")
    );

    tokio::fs::create_dir_all(&config.data_dir).await?;
    tokio::fs::create_dir_all(config.screenshots_dir()).await?;
    tokio::fs::create_dir_all(config.reports_dir()).await?;

    // Store first: everything else hangs off it
    let store = TradeStore::connect(&config.data_dir.join("trades.db")).await?;
    store.init().await?;
    let swept = store.cleanup_stale_open_trades(config.stale_trade_hours).await?;
    if swept > 0 {
        tracing::info!("Swept {} stale open trades at startup", swept);
    }

    let context_cache = CacheDb::open(&config.data_dir.join("market_context_cache.db")).await?;
    let fundamentals_cache =
        CacheDb::open(&config.data_dir.join("fundamentals_cache.db")).await?;
    let news = NewsCalendar::new(context_cache.clone(), config.news_window_minutes);

    let provider: Option<Arc<dyn ModelProvider>> = match &config.model_api_key {
        Some(key) => {
            tracing::info!("Model provider configured ({})", config.analysis_model);
            Some(Arc::new(AnthropicClient::new(
                key.clone(),
                config.analysis_model.clone(),
            )))
        }
        None => {
            tracing::warn!("No model API key configured; screener escalates, confirmer denies");
            None
        }
    };

    let context_builder = ContextBuilder::new(
        context_cache.clone(),
        ContextConfig {
            api_ninjas_key: config.api_ninjas_key.clone(),
            fred_api_key: config.fred_api_key.clone(),
        },
    );
    let daily_context =
        DailyContext::new(provider.clone(), context_builder.clone(), fundamentals_cache);
    let engine = Arc::new(AnalysisEngine::new(provider, store.clone(), daily_context));

    // Recovery: reseed the registry from persisted watches
    let registry = Arc::new(WatchRegistry::new(store.clone(), config.max_confirmations));
    let persisted = store.load_active_watches().await?;
    let restored = persisted.len();
    for watched in persisted {
        registry.restore(watched);
    }
    if restored > 0 {
        tracing::info!("Restored {} active watches from persistence", restored);
    }

    let queue = Arc::new(TradeQueue::new(config.pending_ttl_secs));
    let gate = Arc::new(RiskGate::new(
        store.clone(),
        news.clone(),
        RiskLimits {
            max_daily_drawdown_pct: config.max_daily_drawdown_pct,
            max_open_trades: config.max_open_trades,
        },
    ));
    let desk_notifier = Arc::new(Notifier::new(&NotifierConfig::from_env()));

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        engine,
        registry: registry.clone(),
        queue,
        gate,
        notifier: desk_notifier.clone(),
        news,
        context_builder,
        bundles: Arc::new(DashMap::new()),
        reports: Arc::new(DashMap::new()),
        watch_context: Arc::new(DashMap::new()),
        pipeline_lock: Arc::new(Mutex::new(())),
    };

    let hub = Arc::new(hooks::Hub::new(state.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let desk_scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        store.clone(),
        hub.clone(),
        config.active_pairs.clone(),
        config.timezone,
        config.screenshots_dir(),
    ));
    let scheduler_task = tokio::spawn(desk_scheduler.run(shutdown_rx.clone()));

    let command_loop = tokio::spawn(
        desk_notifier
            .clone()
            .run_command_loop(hub.clone(), shutdown_rx.clone()),
    );

    startup_notifications(&state, restored).await;

    let listener =
        tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Drain: stop the background tasks, let the in-flight pipeline
    // finish, then close the store.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    command_loop.abort();
    let _guard = state.pipeline_lock.lock().await;
    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Restart ping plus missed-scan alerts for pairs already inside their
/// kill zone with no scan recorded today.
async fn startup_notifications(state: &AppState, restored: usize) {
    state
        .notifier
        .send_restart_ping(&state.config.active_pairs, restored)
        .await;

    let now_local = Utc::now().with_timezone(&state.config.timezone);
    let today = now_local.format("%Y-%m-%d").to_string();

    for symbol in &state.config.active_pairs {
        let profile = get_profile(symbol);
        let hour = now_local.hour();
        if hour < profile.kill_zone_start || hour >= profile.kill_zone_end {
            continue;
        }
        let scanned_today = match state.store.last_scan(symbol).await {
            Ok(Some(info)) => info.scan_date == today,
            _ => false,
        };
        if !scanned_today {
            state.notifier.send_missed_scan(symbol, &today).await;
        }
    }
}
