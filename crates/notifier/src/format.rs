//! Message formatting for the messenger surface.

use trade_core::{
    fmt_price, AnalysisReport, Confidence, Direction, PendingTrade, TradeCloseReport,
    TradeExecutionReport, TradeSetup, WatchTrade,
};
use trade_store::{StatsSummary, WeeklyReport};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━";

fn direction_emoji(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "🟢",
        Direction::Short => "🔴",
    }
}

fn confidence_emoji(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "🔥",
        Confidence::MediumHigh => "📈",
        Confidence::Medium => "⚠️",
        Confidence::Low => "❓",
    }
}

/// Card for one proposed setup. Used both for manual cards (with
/// Execute/Skip buttons attached by the caller) and as the body of
/// auto-watch announcements.
pub fn setup_card(setup: &TradeSetup, summary: &str, symbol: &str, digits: u32) -> String {
    let mut lines = vec![
        format!(
            "{} {} {} Setup ({})",
            direction_emoji(setup.bias),
            symbol,
            setup.bias.label(),
            capitalize(&setup.timeframe_type),
        ),
        RULE.to_string(),
    ];

    if !setup.h1_trend.is_empty() {
        lines.push(format!("📈 H1 Trend: {}", setup.h1_trend.to_uppercase()));
    }
    if !setup.price_zone.is_empty() {
        lines.push(format!("📍 Zone: {}", setup.price_zone.to_uppercase()));
    }
    if !setup.checklist_score.is_empty() {
        lines.push(format!("📋 Checklist: {}", setup.checklist_score));
    }
    if setup.counter_trend {
        lines.push("⚠️ COUNTER-TREND TRADE".to_string());
    }

    lines.push(String::new());
    lines.push(format!(
        "📍 Entry: {} - {}",
        fmt_price(setup.entry_min, digits),
        fmt_price(setup.entry_max, digits)
    ));
    lines.push(format!(
        "🔴 SL: {} ({:.0} pips)",
        fmt_price(setup.stop_loss, digits),
        setup.sl_pips
    ));
    lines.push(format!(
        "🎯 TP1: {} ({:.0} pips)",
        fmt_price(setup.tp1, digits),
        setup.tp1_pips
    ));
    lines.push(format!(
        "🎯 TP2: {} ({:.0} pips) — runner",
        fmt_price(setup.tp2, digits),
        setup.tp2_pips
    ));
    lines.push(format!(
        "📊 R:R: 1:{:.1} (TP1) | 1:{:.1} (TP2)",
        setup.rr_tp1, setup.rr_tp2
    ));
    lines.push(format!(
        "{} Confidence: {}",
        confidence_emoji(setup.confidence),
        setup.confidence.as_str().to_uppercase()
    ));

    if !setup.confluence.is_empty() {
        lines.push(String::new());
        lines.push("Confluence:".to_string());
        for reason in &setup.confluence {
            lines.push(format!("• {reason}"));
        }
    }
    if !setup.negative_factors.is_empty() {
        lines.push("Against:".to_string());
        for factor in &setup.negative_factors {
            lines.push(format!("• {factor}"));
        }
    }

    if let Some(warning) = &setup.news_warning {
        lines.push(String::new());
        lines.push(format!("⚠️ {warning}"));
    }

    if !summary.is_empty() {
        lines.push(String::new());
        lines.push(format!("📋 Summary: {summary}"));
    }

    lines.join("\n")
}

pub fn auto_watch_card(watch: &WatchTrade, digits: u32) -> String {
    format!(
        "👁 {} auto-watching {} {}\n{}\nZone: {} - {} | SL: {} ({:.0} pips)\nTP1: {} (close {}%) | TP2: {}\nChecklist: {} | Confidence: {}\nThe terminal will request M1 confirmation when price reaches the zone ({} attempts).",
        direction_emoji(watch.bias),
        watch.symbol,
        watch.bias.label(),
        RULE,
        fmt_price(watch.entry_min, digits),
        fmt_price(watch.entry_max, digits),
        fmt_price(watch.stop_loss, digits),
        watch.sl_pips,
        fmt_price(watch.tp1, digits),
        watch.tp1_close_pct,
        fmt_price(watch.tp2, digits),
        watch.checklist_score,
        watch.confidence.as_str().to_uppercase(),
        watch.max_confirmations,
    )
}

pub fn no_setups_message(report: &AnalysisReport) -> String {
    let mut msg = format!(
        "🔍 {} Analysis Complete\n{}\n\n❌ No valid trade setups identified.\n\n",
        report.symbol, RULE
    );
    if !report.h1_trend_analysis.is_empty() {
        msg.push_str(&format!("📈 H1 Trend: {}\n\n", report.h1_trend_analysis));
    }
    msg.push_str(&format!("📋 {}\n", report.market_summary));
    if !report.primary_scenario.is_empty() {
        msg.push_str(&format!("\n📈 Primary: {}\n", report.primary_scenario));
    }
    if !report.alternative_scenario.is_empty() {
        msg.push_str(&format!("📉 Alternative: {}\n", report.alternative_scenario));
    }
    if !report.upcoming_events.is_empty() {
        msg.push_str("\n📅 Upcoming events:\n");
        for event in &report.upcoming_events {
            msg.push_str(&format!("• {event}\n"));
        }
    }
    msg
}

pub fn gate_blocked_message(symbol: &str, setup: &TradeSetup, reason: &str) -> String {
    format!(
        "🚫 {} {} setup blocked by risk gate\n{}\nRule: {}\nChecklist was {} — the setup is logged but will not be queued.",
        symbol,
        setup.bias.label(),
        RULE,
        reason,
        setup.checklist_score,
    )
}

pub fn zone_reached_message(watch: &WatchTrade, current_price: f64, digits: u32) -> String {
    format!(
        "📡 {} price {} reached watch zone {} - {}\nRunning M1 confirmation (attempt {}/{})...",
        watch.symbol,
        fmt_price(current_price, digits),
        fmt_price(watch.entry_min, digits),
        fmt_price(watch.entry_max, digits),
        watch.confirmations_used + 1,
        watch.max_confirmations,
    )
}

pub fn confirmation_accepted_message(watch: &WatchTrade, reasoning: &str) -> String {
    format!(
        "✅ {} {} entry CONFIRMED\n{}\n{}\nTrade {} handed to the terminals.",
        watch.symbol,
        watch.bias.label(),
        RULE,
        reasoning,
        watch.id,
    )
}

pub fn confirmation_rejected_message(
    watch: &WatchTrade,
    reasoning: &str,
    remaining: u8,
) -> String {
    let tail = if remaining > 0 {
        format!("Still watching — {remaining} attempt(s) left.")
    } else {
        "Watch rejected — confirmation attempts exhausted.".to_string()
    };
    format!(
        "❌ {} {} entry rejected on M1\n{}\n{}\n{}",
        watch.symbol,
        watch.bias.label(),
        RULE,
        reasoning,
        tail,
    )
}

pub fn expiry_message(watch: &WatchTrade) -> String {
    format!(
        "⏰ {} watch {} expired at kill-zone end (unfilled {} {})",
        watch.symbol,
        watch.id,
        watch.bias.label(),
        watch.checklist_score,
    )
}

pub fn execution_message(report: &TradeExecutionReport, digits: u32) -> String {
    match report.status.as_str() {
        "pending" => format!(
            "⏳ {} Limit Orders Placed\n{}\n🆔 Trade: {}\n📍 Limit entry: {}\n🔴 SL: {}\n🎯 TP1: {} ({:.2} lots) — order #{}\n🎯 TP2: {} ({:.2} lots) — order #{}\nWaiting for price to reach the zone...",
            report.symbol,
            RULE,
            report.trade_id,
            fmt_price(report.actual_entry, digits),
            fmt_price(report.actual_sl, digits),
            fmt_price(report.actual_tp1, digits),
            report.lots_tp1,
            report.ticket_tp1,
            fmt_price(report.actual_tp2, digits),
            report.lots_tp2,
            report.ticket_tp2,
        ),
        "executed" => format!(
            "✅ {} Trade Executed\n{}\n🆔 Trade: {}\n💰 Entry: {}\n🔴 SL: {}\n🎯 TP1: {} ({:.2} lots) — ticket #{}\n🎯 TP2: {} ({:.2} lots) — ticket #{}",
            report.symbol,
            RULE,
            report.trade_id,
            fmt_price(report.actual_entry, digits),
            fmt_price(report.actual_sl, digits),
            fmt_price(report.actual_tp1, digits),
            report.lots_tp1,
            report.ticket_tp1,
            fmt_price(report.actual_tp2, digits),
            report.lots_tp2,
            report.ticket_tp2,
        ),
        _ => format!(
            "❌ {} Trade Failed\n{}\n🆔 Trade: {}\n⚠️ {}",
            report.symbol, RULE, report.trade_id, report.error_message,
        ),
    }
}

pub fn close_message(report: &TradeCloseReport) -> String {
    let reason_emoji = match report.close_reason.as_str() {
        "tp1" => "🎯",
        "tp2" => "🎯🎯",
        "sl" => "🔴",
        "manual" => "✋",
        "cancelled" => "➖",
        _ => "❓",
    };
    let pnl_emoji = if report.profit >= 0.0 { "🟢" } else { "🔴" };
    format!(
        "{} {} Position Closed — {}\n{}\n🆔 Trade: {}\n💰 Close: {}\n{} Profit: {:+.2}",
        reason_emoji,
        report.symbol,
        report.close_reason.to_uppercase(),
        RULE,
        report.trade_id,
        report.close_price,
        pnl_emoji,
        report.profit,
    )
}

pub fn pending_queued_message(trade: &PendingTrade, digits: u32) -> String {
    format!(
        "✅ {} {} trade queued for the terminals\nTrade ID: {}\nEntry: {} - {}\nSL: {} | TP1: {} | TP2: {}\n⏳ Broadcasting for the hand-off window...",
        trade.symbol,
        trade.bias.label(),
        trade.id,
        fmt_price(trade.entry_min, digits),
        fmt_price(trade.entry_max, digits),
        fmt_price(trade.stop_loss, digits),
        fmt_price(trade.tp1, digits),
        fmt_price(trade.tp2, digits),
    )
}

pub fn stats_message(stats: &StatsSummary) -> String {
    if stats.total_trades == 0 {
        return format!(
            "📊 No trades in the last {} days for {}.",
            stats.period_days, stats.symbol
        );
    }

    let pnl_emoji = if stats.total_pnl_pips >= 0.0 { "🟢" } else { "🔴" };
    let mut lines = vec![
        format!("📊 Performance — {} ({}d)", stats.symbol, stats.period_days),
        RULE.to_string(),
        String::new(),
        format!(
            "Trades: {} closed | {} open | {} failed",
            stats.closed_trades, stats.open_trades, stats.failed_trades
        ),
        format!(
            "✅ Wins: {} ({} full + {} partial)",
            stats.wins, stats.full_wins, stats.partial_wins
        ),
        format!("❌ Losses: {}", stats.losses),
        format!("🎯 Win rate: {:.0}%", stats.win_rate),
        String::new(),
        format!(
            "{} P&L: {:+.1} pips | {:+.2} money",
            pnl_emoji, stats.total_pnl_pips, stats.total_pnl_money
        ),
        format!("📈 Avg win: {:+.1} pips", stats.avg_win_pips),
        format!("📉 Avg loss: {:.1} pips", stats.avg_loss_pips),
    ];

    if stats.pair_stats.len() > 1 {
        lines.push(String::new());
        lines.push("💱 Per pair:".to_string());
        for (symbol, pair) in &stats.pair_stats {
            lines.push(format!(
                "  {}: {}/{}W ({:.0}%) | {:+.1} pips",
                symbol, pair.wins, pair.closed, pair.win_rate, pair.pnl_pips
            ));
        }
    }
    if !stats.confidence_stats.is_empty() {
        lines.push(String::new());
        lines.push("🔥 By confidence:".to_string());
        for (confidence, bucket) in &stats.confidence_stats {
            lines.push(format!(
                "  {}: {}/{}W ({:.0}%)",
                confidence.to_uppercase(),
                bucket.wins,
                bucket.total,
                bucket.win_rate
            ));
        }
    }

    lines.push(String::new());
    lines.push("Usage: /stats [SYMBOL] [DAYS]".to_string());
    lines.join("\n")
}

pub fn weekly_message(report: &WeeklyReport) -> String {
    if report.total == 0 {
        return "📊 Weekly report: no closed trades in the last 7 days.".to_string();
    }

    let mut lines = vec![
        "📊 Weekly Performance Report".to_string(),
        RULE.to_string(),
        format!(
            "{} closed | {} wins / {} losses ({:.0}%) | {:+.1} pips",
            report.total, report.wins, report.losses, report.win_rate, report.total_pnl_pips
        ),
    ];

    for (label, buckets) in [
        ("By checklist", &report.by_checklist),
        ("By confidence", &report.by_confidence),
        ("By entry status", &report.by_entry_status),
        ("By price zone", &report.by_price_zone),
    ] {
        if buckets.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("{label}:"));
        for (key, bucket) in buckets.iter() {
            lines.push(format!(
                "  {}: {}/{}W ({:.0}%) {:+.1}p",
                key, bucket.wins, bucket.total, bucket.win_rate, bucket.pnl_pips
            ));
        }
    }

    lines.join("\n")
}

pub fn help_message() -> String {
    [
        "🤖 FX Desk Coordinator",
        RULE,
        "",
        "Commands:",
        "/scan [SYMBOL] - re-run the last cached bundle",
        "/stats [SYMBOL] [DAYS] - performance stats",
        "/news - upcoming high-impact events",
        "/drawdown - today's P&L vs the daily limit",
        "/reset - force-close all open records",
        "/status - active watches and last scans",
        "/report - weekly performance report",
        "/context [SYMBOL] - macro context snapshot",
        "/backtest - replay harness pointer",
        "/help - this message",
        "",
        "Qualifying setups are auto-watched; the terminal asks for M1",
        "confirmation when price reaches the zone. Rejections offer a",
        "Force Execute override.",
    ]
    .join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trade_core::WatchStatus;

    fn setup() -> TradeSetup {
        serde_json::from_value(serde_json::json!({
            "bias": "long",
            "entry_min": 191.2, "entry_max": 191.4,
            "stop_loss": 190.9, "sl_pips": 30.0,
            "tp1": 191.8, "tp1_pips": 20.0,
            "tp2": 192.4, "tp2_pips": 40.0,
            "rr_tp1": 0.7, "rr_tp2": 1.3,
            "confidence": "high",
            "confluence": ["BOS on M15", "Asian sweep"],
            "checklist_score": "10/12",
            "h1_trend": "bullish",
            "price_zone": "discount",
            "timeframe_type": "intraday"
        }))
        .unwrap()
    }

    fn watch() -> WatchTrade {
        WatchTrade {
            id: "abcd1234".into(),
            symbol: "GBPJPY".into(),
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
            confluence: vec!["BOS on M15".into()],
            checklist_score: "10/12".into(),
            tp1_close_pct: 40,
            created_at: Utc::now(),
            max_confirmations: 3,
            confirmations_used: 1,
            status: WatchStatus::Watching,
        }
    }

    #[test]
    fn setup_card_uses_pair_digits() {
        let card = setup_card(&setup(), "London momentum", "GBPJPY", 3);
        assert!(card.contains("GBPJPY LONG Setup (Intraday)"));
        assert!(card.contains("191.200 - 191.400"));
        assert!(card.contains("Checklist: 10/12"));
        assert!(card.contains("• BOS on M15"));
        assert!(card.contains("London momentum"));
    }

    #[test]
    fn zone_reached_shows_attempt_counter() {
        let msg = zone_reached_message(&watch(), 191.35, 3);
        assert!(msg.contains("attempt 2/3"));
        assert!(msg.contains("191.350"));
    }

    #[test]
    fn rejection_message_distinguishes_final_attempt() {
        let still = confirmation_rejected_message(&watch(), "no reaction at zone", 1);
        assert!(still.contains("1 attempt(s) left"));
        let done = confirmation_rejected_message(&watch(), "momentum through zone", 0);
        assert!(done.contains("exhausted"));
    }

    #[test]
    fn execution_message_covers_all_statuses() {
        let mut report = TradeExecutionReport {
            trade_id: "abcd1234".into(),
            symbol: "GBPJPY".into(),
            status: "executed".into(),
            actual_entry: 191.31,
            ..Default::default()
        };
        assert!(execution_message(&report, 3).contains("Trade Executed"));
        report.status = "pending".into();
        assert!(execution_message(&report, 3).contains("Limit Orders"));
        report.status = "failed".into();
        report.error_message = "not enough margin".into();
        assert!(execution_message(&report, 3).contains("not enough margin"));
    }

    #[test]
    fn stats_message_handles_empty_period() {
        let stats = StatsSummary {
            period_days: 30,
            symbol: "ALL".into(),
            ..Default::default()
        };
        assert!(stats_message(&stats).contains("No trades"));
    }
}
