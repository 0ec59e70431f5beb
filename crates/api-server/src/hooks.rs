//! The coordinator side of the messenger commands and scheduler events.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use notifier::{format, DeskHooks};
use scheduler::SchedulerEvents;
use trade_core::{get_profile, PendingTrade, TradeSetup, WatchTrade};
use trade_store::QueuedTrade;
use watch_registry::{tp1_close_pct_from_checklist, MIN_WATCHABLE_CHECKLIST};

use crate::{pipeline, AppState};

pub struct Hub {
    state: AppState,
}

impl Hub {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn short_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    /// Queue a manually-approved setup: floor-check it, gate it,
    /// publish it, log it.
    async fn queue_manual(
        &self,
        symbol: &str,
        setup: &TradeSetup,
        summary: &str,
        session: &str,
    ) -> Result<String, String> {
        // Sub-floor setups never reach the terminals, even via a stale
        // Execute button.
        if setup.checklist_points().unwrap_or(0) < MIN_WATCHABLE_CHECKLIST {
            return Err(format!(
                "🚫 {} setup checklist {} is below the executable minimum ({}/12).",
                symbol, setup.checklist_score, MIN_WATCHABLE_CHECKLIST
            ));
        }

        let news_check = self.state.news.restriction(symbol).await;
        if news_check.blocked {
            return Err(format!(
                "🚫 {} blocked — news restriction: {} ({})",
                symbol, news_check.event_title, news_check.event_currency
            ));
        }

        let balance = self.state.latest_account_balance();
        let decision = self
            .state
            .gate
            .check(symbol, setup.bias, balance)
            .await
            .map_err(|e| format!("risk gate failure: {e}"))?;
        if !decision.allowed {
            return Err(format!("🚫 {} blocked by risk gate: {}", symbol, decision.reason));
        }

        let trade = PendingTrade {
            id: Self::short_id(),
            symbol: symbol.to_string(),
            bias: setup.bias,
            entry_min: setup.entry_min,
            entry_max: setup.entry_max,
            stop_loss: setup.stop_loss,
            tp1: setup.tp1,
            tp2: setup.tp2,
            sl_pips: setup.sl_pips,
            confidence: setup.confidence,
            tp1_close_pct: tp1_close_pct_from_checklist(setup.checklist_points().unwrap_or(0)),
            queued_at: Utc::now(),
        };
        let published = self.state.queue.publish(trade);

        let row = queued_row_from_setup(&published.id, symbol, setup, summary, session);
        if let Err(e) = self.state.store.log_trade_queued(&row).await {
            tracing::error!("[{}] Failed to log manual trade: {:#}", symbol, e);
        }

        let digits = get_profile(symbol).digits;
        Ok(format::pending_queued_message(&published, digits))
    }
}

#[async_trait]
impl DeskHooks for Hub {
    async fn rescan(&self, symbol: Option<String>) -> Result<String, String> {
        let target = symbol
            .or_else(|| {
                self.state
                    .bundles
                    .iter()
                    .max_by_key(|entry| entry.received_at)
                    .map(|entry| entry.key().clone())
            })
            .ok_or_else(|| {
                "No screenshots available yet. Trigger a scan from the terminal first.".to_string()
            })?;

        if self.state.bundles.contains_key(&target) {
            tokio::spawn(pipeline::run_analysis(self.state.clone(), target.clone()));
            Ok(format!("🔍 Triggering scan for {target}... this may take a minute."))
        } else if let Some(report) = self.state.reports.get(&target) {
            Ok(format!(
                "No fresh bundle for {target}; last analysis had {} setup(s).\n📋 {}",
                report.setups.len(),
                report.market_summary
            ))
        } else {
            Err(format!("No data available for {target}."))
        }
    }

    async fn stats(&self, symbol: Option<String>, days: i64) -> Result<String, String> {
        let stats = self
            .state
            .store
            .stats(symbol.as_deref(), days.clamp(1, 365))
            .await
            .map_err(|e| e.to_string())?;
        Ok(format::stats_message(&stats))
    }

    async fn upcoming_news(&self) -> Result<String, String> {
        let pairs = self.state.config.active_pairs.clone();
        let events = self.state.news.upcoming(&pairs, 24).await;

        if events.is_empty() {
            return Ok(format!(
                "📅 No high-impact news in the next 24h.\nTracked: {}",
                pairs.join(", ")
            ));
        }

        let mut lines = vec!["📰 Upcoming High-Impact News (24h)".to_string(), String::new()];
        for event in events {
            let forecast = if event.forecast.is_empty() {
                String::new()
            } else {
                format!(" (F: {})", event.forecast)
            };
            lines.push(format!(
                "🔴 {} — {}: {}{}",
                event.time.format("%a %H:%M UTC"),
                event.currency,
                event.title,
                forecast
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "⚠️ No trades {} min either side of these events",
            self.state.config.news_window_minutes
        ));
        Ok(lines.join("\n"))
    }

    async fn drawdown(&self) -> Result<String, String> {
        let pnl = self.state.store.daily_pnl().await.map_err(|e| e.to_string())?;
        let balance = self.state.latest_account_balance();
        let limit_pct = self.state.config.max_daily_drawdown_pct;

        let mut lines = vec![
            "📉 Daily Drawdown".to_string(),
            format!(
                "Today's realized P&L: {:+.2} over {} closed trade(s)",
                pnl.daily_pnl, pnl.closed_trades_today
            ),
        ];
        if balance > 0.0 {
            let drawdown_pct = -pnl.daily_pnl.min(0.0) / balance * 100.0;
            lines.push(format!(
                "Drawdown: {:.2}% of {:.0} (limit {:.1}%)",
                drawdown_pct, balance, limit_pct
            ));
            if drawdown_pct >= limit_pct {
                lines.push("🚫 Limit reached — the gate is denying new trades today.".to_string());
            }
        } else {
            lines.push("No account balance seen yet (waiting for terminal data).".to_string());
        }
        Ok(lines.join("\n"))
    }

    async fn reset_open_trades(&self) -> Result<String, String> {
        let closed = self
            .state
            .store
            .force_close_all_open()
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("🧹 Force-closed {closed} open record(s)."))
    }

    async fn status(&self) -> Result<String, String> {
        let mut lines = vec!["📊 Coordinator Status".to_string(), String::new()];

        for symbol in &self.state.config.active_pairs {
            let scan = match self.state.store.last_scan(symbol).await {
                Ok(Some(info)) => format!("last scan {}", info.last_scan_time),
                Ok(None) => "no scans yet".to_string(),
                Err(_) => "scan state unavailable".to_string(),
            };
            let setups = self
                .state
                .reports
                .get(symbol)
                .map(|report| report.setups.len())
                .unwrap_or(0);
            let watch = match self.state.registry.active(symbol) {
                Some(watch) => format!(
                    "watching {} ({}/{} attempts used)",
                    watch.id, watch.confirmations_used, watch.max_confirmations
                ),
                None => "no active watch".to_string(),
            };
            let pending = if self.state.queue.get(symbol).is_some() {
                " | pending trade live"
            } else {
                ""
            };
            lines.push(format!("💱 {symbol}: {setups} setup(s), {scan}, {watch}{pending}"));
        }
        Ok(lines.join("\n"))
    }

    async fn weekly_report(&self) -> Result<String, String> {
        let report = self
            .state
            .store
            .weekly_report(None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format::weekly_message(&report))
    }

    async fn context(&self, symbol: Option<String>) -> Result<String, String> {
        let target = symbol.unwrap_or_else(|| {
            self.state
                .config
                .active_pairs
                .first()
                .cloned()
                .unwrap_or_else(|| "GBPJPY".to_string())
        });
        let profile = get_profile(&target);
        Ok(self.state.context_builder.context_summary(&profile).await)
    }

    async fn execute_setup(&self, symbol: &str, index: usize) -> Result<String, String> {
        let (setup, summary) = {
            let report = self
                .state
                .reports
                .get(symbol)
                .ok_or_else(|| "Setup data no longer available.".to_string())?;
            let setup = report
                .setups
                .get(index)
                .cloned()
                .ok_or_else(|| "Setup data no longer available.".to_string())?;
            (setup, report.market_summary.clone())
        };

        let session = self
            .state
            .bundles
            .get(symbol)
            .map(|bundle| bundle.market_data.session.clone())
            .unwrap_or_default();

        tracing::info!("[{}] Setup {}: EXECUTE selected", symbol, index);
        self.queue_manual(symbol, &setup, &summary, &session).await
    }

    async fn skip_setup(&self, symbol: &str, index: usize) -> Result<String, String> {
        tracing::info!("[{}] Setup {}: SKIP selected", symbol, index);
        Ok(format!("❌ {symbol} setup skipped"))
    }

    async fn force_execute(&self, symbol: &str, trade_id: &str) -> Result<String, String> {
        let context = self
            .state
            .watch_context
            .get(trade_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| "Watch data no longer available for force execute.".to_string())?;

        if context.watch.symbol != symbol {
            return Err("Watch does not belong to that symbol.".to_string());
        }

        // Human override of the model's rejection: same id, so terminals
        // that saw the rejected watch cannot double-execute.
        let published = self
            .state
            .queue
            .publish(PendingTrade::from_watch(&context.watch, Utc::now()));

        let row = pipeline::queued_trade_row(&context.watch, Some(&context));
        if let Err(e) = self.state.store.log_trade_queued(&row).await {
            tracing::error!("[{}] Failed to log forced trade: {:#}", symbol, e);
        }

        tracing::info!("[{}] Force execute for watch {}", symbol, trade_id);
        let digits = get_profile(symbol).digits;
        Ok(format!(
            "⚡ Force execute override\n{}",
            format::pending_queued_message(&published, digits)
        ))
    }

    async fn dismiss_watch(&self, symbol: &str, trade_id: &str) -> Result<String, String> {
        // The watch may already be terminal (that is how the button
        // appears); dropping the stored context is the real cleanup.
        let _ = self.state.registry.dismiss(trade_id, symbol).await;
        self.state.watch_context.remove(trade_id);
        tracing::info!("[{}] Watch {} dismissed", symbol, trade_id);
        Ok(format!("🗑 {symbol} proposal dismissed."))
    }
}

#[async_trait]
impl SchedulerEvents for Hub {
    async fn watch_expired(&self, watch: WatchTrade) {
        self.state.watch_context.remove(&watch.id);
        self.state.notifier.send_expiry(&watch).await;
    }

    async fn missed_scan(&self, symbol: String, date: String) {
        self.state.notifier.send_missed_scan(&symbol, &date).await;
    }

    async fn weekly_report_due(&self) {
        match self.state.store.weekly_report(None).await {
            Ok(report) => {
                self.state
                    .notifier
                    .send_text(&format::weekly_message(&report))
                    .await;
            }
            Err(e) => tracing::warn!("Weekly report query failed: {:#}", e),
        }
    }

    /// The renderer is an external collaborator; when its PDF is already
    /// on disk we forward it, otherwise we send the raw month numbers.
    async fn monthly_report_due(&self, year: i32, month: u32) {
        let path = self
            .state
            .config
            .reports_dir()
            .join(format!("performance_report_{year:04}_{month:02}.pdf"));

        if let Ok(bytes) = tokio::fs::read(&path).await {
            let filename = format!("performance_report_{year:04}_{month:02}.pdf");
            self.state
                .notifier
                .send_document(&filename, bytes, &format!("📄 Monthly report {year}-{month:02}"))
                .await;
            return;
        }

        match self.state.store.monthly_closed(year, month).await {
            Ok(trades) => {
                let wins = trades.iter().filter(|t| t.is_win()).count();
                let pips: f64 = trades.iter().map(|t| t.pnl_pips).sum();
                let summary = json!({
                    "month": format!("{year}-{month:02}"),
                    "closed": trades.len(),
                    "wins": wins,
                    "pnl_pips": pips,
                });
                self.state
                    .notifier
                    .send_text(&format!(
                        "📄 Month {year}-{month:02} closed: {} trades, {} wins, {:+.1} pips.\nNo rendered PDF found; raw numbers: {}",
                        trades.len(),
                        wins,
                        pips,
                        summary
                    ))
                    .await;
            }
            Err(e) => tracing::warn!("Monthly report query failed: {:#}", e),
        }
    }
}

fn queued_row_from_setup(
    id: &str,
    symbol: &str,
    setup: &TradeSetup,
    summary: &str,
    session: &str,
) -> QueuedTrade {
    QueuedTrade {
        id: id.to_string(),
        symbol: symbol.to_string(),
        bias: setup.bias.as_str().to_string(),
        confidence: setup.confidence.as_str().to_string(),
        session: session.to_string(),
        entry_min: setup.entry_min,
        entry_max: setup.entry_max,
        stop_loss: setup.stop_loss,
        tp1: setup.tp1,
        tp2: setup.tp2,
        sl_pips: setup.sl_pips,
        tp1_pips: setup.tp1_pips,
        tp2_pips: setup.tp2_pips,
        rr_tp1: setup.rr_tp1,
        rr_tp2: setup.rr_tp2,
        h1_trend: setup.h1_trend.clone(),
        counter_trend: setup.counter_trend,
        market_summary: summary.to_string(),
        trend_alignment: setup.trend_alignment.clone(),
        d1_trend: setup.d1_trend.clone(),
        h4_trend: setup.h4_trend.clone(),
        entry_status: setup.entry_status.as_str().to_string(),
        entry_distance_pips: setup.entry_distance_pips,
        negative_factors: setup.negative_factors.join("; "),
        price_zone: setup.price_zone.clone(),
        checklist_score: setup.checklist_score.clone(),
        tp1_close_pct: tp1_close_pct_from_checklist(setup.checklist_points().unwrap_or(0)) as i64,
    }
}
