//! Outbound messenger channel and inbound command loop.
//!
//! Every send is best-effort: failures are logged and swallowed so a
//! messenger outage can never stall the trading core.

pub mod format;
pub mod hooks;
pub mod telegram;

use std::sync::Arc;
use tokio::sync::watch;

pub use hooks::DeskHooks;
use telegram::{ButtonRow, TelegramApi, Update};
use trade_core::{
    get_profile, AnalysisReport, PendingTrade, TradeCloseReport, TradeExecutionReport, TradeSetup,
    WatchTrade,
};

/// Messenger credentials; either missing disables the channel.
#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self {
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty()),
            chat_id: std::env::var("TELEGRAM_CHAT_ID").ok().filter(|s| !s.is_empty()),
        }
    }
}

pub struct Notifier {
    api: Option<TelegramApi>,
    chat_id: String,
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Self {
        let api = match (&config.bot_token, &config.chat_id) {
            (Some(token), Some(_)) => {
                tracing::info!("Messenger notifications enabled");
                Some(TelegramApi::new(token))
            }
            _ => {
                tracing::info!(
                    "No messenger configured (set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID)"
                );
                None
            }
        };
        Self {
            api,
            chat_id: config.chat_id.clone().unwrap_or_default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api.is_some()
    }

    /// Send plain text, swallowing any failure.
    pub async fn send_text(&self, text: &str) {
        self.send_with_buttons(text, None).await;
    }

    async fn send_with_buttons(&self, text: &str, buttons: Option<Vec<ButtonRow>>) {
        let Some(api) = &self.api else { return };
        if let Err(e) = api.send_message(&self.chat_id, text, buttons).await {
            tracing::warn!("Failed to send messenger notification: {}", e);
        }
    }

    // -- Analysis surface ----------------------------------------------------

    pub async fn send_no_setups(&self, report: &AnalysisReport) {
        self.send_text(&format::no_setups_message(report)).await;
    }

    /// Manual card with Execute/Skip buttons.
    pub async fn send_manual_setup(
        &self,
        symbol: &str,
        setup: &TradeSetup,
        summary: &str,
        index: usize,
        news_note: Option<&str>,
    ) {
        let digits = get_profile(symbol).digits;
        let mut card = format::setup_card(setup, summary, symbol, digits);
        if let Some(note) = news_note {
            card.push_str(&format!("\n\n⚠️ {note}"));
        }
        let buttons = vec![vec![
            ("✅ Execute".to_string(), format!("execute_{symbol}_{index}")),
            ("❌ Skip".to_string(), format!("skip_{symbol}_{index}")),
        ]];
        self.send_with_buttons(&card, Some(buttons)).await;
    }

    /// Auto-queued card; no buttons, the machine is already watching.
    pub async fn send_auto_watch(&self, watch: &WatchTrade) {
        let digits = get_profile(&watch.symbol).digits;
        self.send_text(&format::auto_watch_card(watch, digits)).await;
    }

    /// Card for a setup below the watchable checklist floor. No buttons:
    /// these are shown for the record and can never reach the terminals.
    pub async fn send_low_quality_setup(&self, symbol: &str, setup: &TradeSetup, summary: &str) {
        let digits = get_profile(symbol).digits;
        let mut card = format::setup_card(setup, summary, symbol, digits);
        card.push_str("\n\n🚫 Checklist below the executable minimum — logged only, not tradeable.");
        self.send_text(&card).await;
    }

    pub async fn send_gate_blocked(&self, symbol: &str, setup: &TradeSetup, reason: &str) {
        self.send_text(&format::gate_blocked_message(symbol, setup, reason))
            .await;
    }

    pub async fn send_upcoming_events(&self, symbol: &str, events: &[String]) {
        if events.is_empty() {
            return;
        }
        let mut msg = format!("📅 {symbol} Upcoming Events:\n");
        for event in events {
            msg.push_str(&format!("• {event}\n"));
        }
        self.send_text(&msg).await;
    }

    // -- Watch lifecycle -----------------------------------------------------

    pub async fn send_zone_reached(&self, watch: &WatchTrade, current_price: f64) {
        let digits = get_profile(&watch.symbol).digits;
        self.send_text(&format::zone_reached_message(watch, current_price, digits))
            .await;
    }

    pub async fn send_confirmation_accepted(&self, watch: &WatchTrade, reasoning: &str) {
        self.send_text(&format::confirmation_accepted_message(watch, reasoning))
            .await;
    }

    /// Rejection note; the final rejection carries the Force Execute /
    /// Dismiss override buttons.
    pub async fn send_confirmation_rejected(
        &self,
        watch: &WatchTrade,
        reasoning: &str,
        remaining: u8,
    ) {
        let text = format::confirmation_rejected_message(watch, reasoning, remaining);
        if remaining == 0 {
            let buttons = vec![vec![
                (
                    "⚡ Force Execute".to_string(),
                    format!("force_{}_{}", watch.symbol, watch.id),
                ),
                (
                    "🗑 Dismiss".to_string(),
                    format!("dismiss_{}_{}", watch.symbol, watch.id),
                ),
            ]];
            self.send_with_buttons(&text, Some(buttons)).await;
        } else {
            self.send_text(&text).await;
        }
    }

    pub async fn send_expiry(&self, watch: &WatchTrade) {
        self.send_text(&format::expiry_message(watch)).await;
    }

    pub async fn send_pending_queued(&self, trade: &PendingTrade) {
        let digits = get_profile(&trade.symbol).digits;
        self.send_text(&format::pending_queued_message(trade, digits))
            .await;
    }

    // -- Trade lifecycle -----------------------------------------------------

    pub async fn send_execution_report(&self, report: &TradeExecutionReport) {
        let digits = get_profile(&report.symbol).digits;
        self.send_text(&format::execution_message(report, digits)).await;
    }

    pub async fn send_close_notice(&self, report: &TradeCloseReport) {
        self.send_text(&format::close_message(report)).await;
    }

    // -- Operational ---------------------------------------------------------

    pub async fn send_restart_ping(&self, pairs: &[String], restored_watches: usize) {
        self.send_text(&format!(
            "🔄 Coordinator restarted\nPairs: {}\nRestored watches: {}",
            pairs.join(", "),
            restored_watches
        ))
        .await;
    }

    pub async fn send_missed_scan(&self, symbol: &str, date: &str) {
        self.send_text(&format!(
            "⚠️ {symbol}: no scan received for {date} and the kill zone has started.\nCheck the terminal connection."
        ))
        .await;
    }

    pub async fn send_document(&self, filename: &str, bytes: Vec<u8>, caption: &str) {
        let Some(api) = &self.api else { return };
        if let Err(e) = api.send_document(&self.chat_id, filename, bytes, caption).await {
            tracing::warn!("Failed to send document {}: {}", filename, e);
        }
    }

    // -- Command loop --------------------------------------------------------

    /// Long-poll for commands until shutdown. Runs as its own task.
    pub async fn run_command_loop(
        self: Arc<Self>,
        hooks: Arc<dyn DeskHooks>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(api) = self.api.clone() else {
            tracing::info!("Messenger command loop disabled (not configured)");
            return;
        };
        let authorized_chat: i64 = self.chat_id.parse().unwrap_or(0);
        let mut offset = 0i64;
        tracing::info!("Messenger command loop started");

        loop {
            tokio::select! {
                result = api.get_updates(offset, 30) => {
                    let updates = match result {
                        Ok(updates) => updates,
                        Err(e) => {
                            tracing::warn!("getUpdates failed: {}; backing off", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                            continue;
                        }
                    };
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(&api, authorized_chat, &hooks, update).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Messenger command loop stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_update(
        &self,
        api: &TelegramApi,
        authorized_chat: i64,
        hooks: &Arc<dyn DeskHooks>,
        update: Update,
    ) {
        if let Some(message) = update.message {
            if message.chat.id != authorized_chat {
                tracing::warn!("Ignoring command from unauthorized chat {}", message.chat.id);
                return;
            }
            let Some(text) = message.text else { return };
            if !text.starts_with('/') {
                return;
            }
            let reply = self.dispatch_command(hooks, &text).await;
            self.send_text(&reply).await;
            return;
        }

        if let Some(callback) = update.callback_query {
            if let Err(e) = api.answer_callback(&callback.id).await {
                tracing::debug!("answerCallbackQuery failed: {}", e);
            }
            if let Some(message) = &callback.message {
                if message.chat.id != authorized_chat {
                    return;
                }
                // Retire the buttons so a double-tap cannot re-fire
                let _ = api.clear_buttons(message.chat.id, message.message_id).await;
            }
            let Some(data) = callback.data else { return };
            let reply = self.dispatch_callback(hooks, &data).await;
            self.send_text(&reply).await;
        }
    }

    async fn dispatch_command(&self, hooks: &Arc<dyn DeskHooks>, text: &str) -> String {
        let mut parts = text.split_whitespace();
        let command = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        let result = match command {
            "/scan" => hooks.rescan(args.first().map(|s| s.to_uppercase())).await,
            "/stats" => {
                let mut symbol = None;
                let mut days = 30i64;
                for arg in &args {
                    match arg.parse::<i64>() {
                        Ok(n) => days = n,
                        Err(_) => symbol = Some(arg.to_uppercase()),
                    }
                }
                hooks.stats(symbol, days).await
            }
            "/news" => hooks.upcoming_news().await,
            "/drawdown" => hooks.drawdown().await,
            "/reset" => hooks.reset_open_trades().await,
            "/status" => hooks.status().await,
            "/report" => hooks.weekly_report().await,
            "/context" => hooks.context(args.first().map(|s| s.to_uppercase())).await,
            "/backtest" => Ok(
                "🧪 Replay runs in the external backtest harness; point it at the trades database."
                    .to_string(),
            ),
            "/help" | "/start" => Ok(format::help_message()),
            other => Ok(format!("Unknown command {other}. Try /help.")),
        };

        result.unwrap_or_else(|e| format!("❌ {e}"))
    }

    async fn dispatch_callback(&self, hooks: &Arc<dyn DeskHooks>, data: &str) -> String {
        let result = match parse_callback(data) {
            Some(CallbackAction::Execute { symbol, index }) => {
                hooks.execute_setup(&symbol, index).await
            }
            Some(CallbackAction::Skip { symbol, index }) => hooks.skip_setup(&symbol, index).await,
            Some(CallbackAction::Force { symbol, trade_id }) => {
                hooks.force_execute(&symbol, &trade_id).await
            }
            Some(CallbackAction::Dismiss { symbol, trade_id }) => {
                hooks.dismiss_watch(&symbol, &trade_id).await
            }
            None => Ok(format!("Unrecognized action: {data}")),
        };
        result.unwrap_or_else(|e| format!("❌ {e}"))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackAction {
    Execute { symbol: String, index: usize },
    Skip { symbol: String, index: usize },
    Force { symbol: String, trade_id: String },
    Dismiss { symbol: String, trade_id: String },
}

fn parse_callback(data: &str) -> Option<CallbackAction> {
    let mut parts = data.splitn(3, '_');
    let action = parts.next()?;
    let symbol = parts.next()?.to_string();
    let tail = parts.next()?.to_string();

    match action {
        "execute" => Some(CallbackAction::Execute {
            symbol,
            index: tail.parse().ok()?,
        }),
        "skip" => Some(CallbackAction::Skip {
            symbol,
            index: tail.parse().ok()?,
        }),
        "force" => Some(CallbackAction::Force {
            symbol,
            trade_id: tail,
        }),
        "dismiss" => Some(CallbackAction::Dismiss {
            symbol,
            trade_id: tail,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_grammar_round_trip() {
        assert_eq!(
            parse_callback("execute_GBPJPY_0"),
            Some(CallbackAction::Execute {
                symbol: "GBPJPY".into(),
                index: 0
            })
        );
        assert_eq!(
            parse_callback("skip_EURUSD_2"),
            Some(CallbackAction::Skip {
                symbol: "EURUSD".into(),
                index: 2
            })
        );
        assert_eq!(
            parse_callback("force_GBPJPY_abcd1234"),
            Some(CallbackAction::Force {
                symbol: "GBPJPY".into(),
                trade_id: "abcd1234".into()
            })
        );
        assert_eq!(
            parse_callback("dismiss_GBPJPY_abcd1234"),
            Some(CallbackAction::Dismiss {
                symbol: "GBPJPY".into(),
                trade_id: "abcd1234".into()
            })
        );
        assert_eq!(parse_callback("bogus_data"), None);
        assert_eq!(parse_callback("execute_GBPJPY_notanumber"), None);
    }

    #[test]
    fn unconfigured_notifier_is_disabled() {
        let notifier = Notifier::new(&NotifierConfig::default());
        assert!(!notifier.is_enabled());
    }
}
