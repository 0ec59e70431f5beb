use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable trade row. Append-first, then mutated through the lifecycle:
/// queued -> pending/executed -> closed (or failed).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub bias: String,
    pub confidence: String,
    pub session: String,

    // Planned levels
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub sl_pips: f64,
    pub tp1_pips: f64,
    pub tp2_pips: f64,
    pub rr_tp1: f64,
    pub rr_tp2: f64,

    // Execution
    pub status: String,
    pub actual_entry: f64,
    pub ticket_tp1: i64,
    pub ticket_tp2: i64,
    pub lots_tp1: f64,
    pub lots_tp2: f64,
    /// Terminal's reason when the placement failed
    pub error_message: String,

    // Outcomes
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub sl_hit: bool,
    pub close_price_tp1: f64,
    pub close_price_tp2: f64,
    pub pnl_pips: f64,
    pub pnl_money: f64,
    pub outcome: String,

    // Timestamps (ISO 8601 UTC)
    pub created_at: Option<String>,
    pub executed_at: Option<String>,
    pub closed_at: Option<String>,

    // Analysis context, carried for later regression of outcomes
    pub h1_trend: String,
    pub counter_trend: bool,
    pub market_summary: String,
    pub trend_alignment: String,
    pub d1_trend: String,
    pub h4_trend: String,
    pub entry_status: String,
    pub entry_distance_pips: f64,
    pub negative_factors: String,
    pub price_zone: String,
    pub checklist_score: String,
    pub tp1_close_pct: i64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        matches!(self.outcome.as_str(), "full_win" | "partial_win")
    }

    /// A record is resolved once the runner question is settled
    pub fn is_resolved(&self) -> bool {
        self.sl_hit || (self.tp1_hit && self.tp2_hit) || self.outcome == "cancelled"
    }
}

/// New row inserted when a trade is queued for the terminal
#[derive(Debug, Clone, Default)]
pub struct QueuedTrade {
    pub id: String,
    pub symbol: String,
    pub bias: String,
    pub confidence: String,
    pub session: String,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub sl_pips: f64,
    pub tp1_pips: f64,
    pub tp2_pips: f64,
    pub rr_tp1: f64,
    pub rr_tp2: f64,
    pub h1_trend: String,
    pub counter_trend: bool,
    pub market_summary: String,
    pub trend_alignment: String,
    pub d1_trend: String,
    pub h4_trend: String,
    pub entry_status: String,
    pub entry_distance_pips: f64,
    pub negative_factors: String,
    pub price_zone: String,
    pub checklist_score: String,
    pub tp1_close_pct: i64,
}

/// (timestamp, date) of the most recent completed scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanInfo {
    pub last_scan_time: String,
    pub scan_date: String,
}

/// Today's realized P&L
#[derive(Debug, Clone, Serialize)]
pub struct DailyPnl {
    pub daily_pnl: f64,
    pub closed_trades_today: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PairBreakdown {
    pub total: i64,
    pub closed: i64,
    pub wins: i64,
    pub win_rate: f64,
    pub pnl_pips: f64,
    pub pnl_money: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WinBucket {
    pub wins: i64,
    pub total: i64,
    pub pnl_pips: f64,
    pub win_rate: f64,
}

/// Aggregated performance over a lookback window
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSummary {
    pub period_days: i64,
    pub symbol: String,
    pub total_trades: i64,
    pub open_trades: i64,
    pub closed_trades: i64,
    pub failed_trades: i64,
    pub cancelled_trades: i64,
    pub wins: i64,
    pub full_wins: i64,
    pub partial_wins: i64,
    pub losses: i64,
    pub win_rate: f64,
    pub total_pnl_pips: f64,
    pub total_pnl_money: f64,
    pub avg_win_pips: f64,
    pub avg_loss_pips: f64,
    pub pair_stats: BTreeMap<String, PairBreakdown>,
    pub confidence_stats: BTreeMap<String, WinBucket>,
    pub session_stats: BTreeMap<String, WinBucket>,
}

/// Win-rate breakdown used as model feedback and the weekly summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct WeeklyReport {
    pub total: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: f64,
    pub total_pnl_pips: f64,
    pub by_checklist: BTreeMap<String, WinBucket>,
    pub by_confidence: BTreeMap<String, WinBucket>,
    pub by_entry_status: BTreeMap<String, WinBucket>,
    pub by_trend_alignment: BTreeMap<String, WinBucket>,
    pub by_price_zone: BTreeMap<String, WinBucket>,
    pub by_bias: BTreeMap<String, WinBucket>,
}

/// Screener pass/skip counts over a lookback window
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScreeningStats {
    pub period_days: i64,
    pub total_screens: i64,
    pub setups_flagged: i64,
    pub skipped: i64,
    pub flag_rate: f64,
}

/// Short prose insight written after a trade closes
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostTradeReview {
    pub trade_id: String,
    pub symbol: String,
    pub review: String,
    pub created_at: String,
}
