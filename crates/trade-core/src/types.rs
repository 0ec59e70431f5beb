use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// OHLCV bar as sent by the terminal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OhlcBar {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub close: f64,
    #[serde(default)]
    pub volume: i64,
}

/// Chart timeframes exchanged with the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    H4,
    H1,
    M15,
    M5,
    M1,
}

impl Timeframe {
    /// Tag used in multipart field names and archive filenames
    pub fn tag(&self) -> &'static str {
        match self {
            Timeframe::H4 => "h4",
            Timeframe::H1 => "h1",
            Timeframe::M15 => "m15",
            Timeframe::M5 => "m5",
            Timeframe::M1 => "m1",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "h4" => Some(Timeframe::H4),
            "h1" => Some(Timeframe::H1),
            "m15" => Some(Timeframe::M15),
            "m5" => Some(Timeframe::M5),
            "m1" => Some(Timeframe::M1),
            _ => None,
        }
    }
}

/// Snapshot of one symbol at one time, immutable once received.
///
/// The terminal sends sparse JSON; every field defaults so a partial
/// payload still deserializes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketData {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub spread_pips: f64,
    #[serde(default)]
    pub rsi_h4: f64,
    #[serde(default)]
    pub rsi_h1: f64,
    #[serde(default)]
    pub rsi_m15: f64,
    #[serde(default)]
    pub rsi_m5: f64,
    #[serde(default)]
    pub atr_h1: f64,
    #[serde(default)]
    pub atr_m15: f64,
    #[serde(default)]
    pub atr_m5: f64,
    #[serde(default)]
    pub daily_high: f64,
    #[serde(default)]
    pub daily_low: f64,
    #[serde(default)]
    pub daily_range_pips: f64,
    #[serde(default)]
    pub prev_day_high: f64,
    #[serde(default)]
    pub prev_day_low: f64,
    #[serde(default)]
    pub prev_day_close: f64,
    #[serde(default)]
    pub prev_week_high: f64,
    #[serde(default)]
    pub prev_week_low: f64,
    #[serde(default)]
    pub asian_high: f64,
    #[serde(default)]
    pub asian_low: f64,
    #[serde(default)]
    pub account_balance: f64,
    #[serde(default)]
    pub ohlc_h1: Vec<OhlcBar>,
    #[serde(default)]
    pub ohlc_m15: Vec<OhlcBar>,
    #[serde(default)]
    pub ohlc_m5: Vec<OhlcBar>,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(CoreError::Parse(format!("unknown direction: {other}"))),
        }
    }
}

/// Confidence tier assigned by the full-analysis tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    MediumHigh,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::MediumHigh => "medium_high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "high" => Ok(Confidence::High),
            "medium_high" => Ok(Confidence::MediumHigh),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(CoreError::Parse(format!("unknown confidence: {other}"))),
        }
    }
}

/// Where price sits relative to the proposed entry zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    AtZone,
    Approaching,
    RequiresPullback,
}

impl Default for EntryStatus {
    fn default() -> Self {
        EntryStatus::Approaching
    }
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::AtZone => "at_zone",
            EntryStatus::Approaching => "approaching",
            EntryStatus::RequiresPullback => "requires_pullback",
        }
    }
}

/// An opinion produced by the full-analysis tier. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub bias: Direction,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub sl_pips: f64,
    pub tp1: f64,
    pub tp1_pips: f64,
    pub tp2: f64,
    pub tp2_pips: f64,
    pub rr_tp1: f64,
    pub rr_tp2: f64,
    #[serde(default)]
    pub confluence: Vec<String>,
    #[serde(default)]
    pub negative_factors: Vec<String>,
    #[serde(default)]
    pub invalidation: String,
    #[serde(default)]
    pub timeframe_type: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub news_warning: Option<String>,
    #[serde(default)]
    pub counter_trend: bool,
    #[serde(default)]
    pub h1_trend: String,
    #[serde(default)]
    pub h4_trend: String,
    #[serde(default)]
    pub d1_trend: String,
    #[serde(default)]
    pub trend_alignment: String,
    #[serde(default)]
    pub price_zone: String,
    #[serde(default)]
    pub entry_status: EntryStatus,
    #[serde(default)]
    pub entry_distance_pips: f64,
    /// Quality checklist in "k/n" form, e.g. "9/12"
    #[serde(default)]
    pub checklist_score: String,
}

impl TradeSetup {
    /// Numerator of the "k/n" checklist score, if parseable
    pub fn checklist_points(&self) -> Option<u32> {
        let (k, _) = self.checklist_score.split_once('/')?;
        k.trim().parse().ok()
    }
}

/// Output of one full-analysis run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub symbol: String,
    #[serde(default = "default_digits")]
    pub digits: u32,
    #[serde(default)]
    pub setups: Vec<TradeSetup>,
    #[serde(default)]
    pub h1_trend_analysis: String,
    #[serde(default)]
    pub market_summary: String,
    #[serde(default)]
    pub primary_scenario: String,
    #[serde(default)]
    pub alternative_scenario: String,
    #[serde(default)]
    pub fundamental_bias: String,
    #[serde(default)]
    pub upcoming_events: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

fn default_digits() -> u32 {
    3
}

/// Watch-trade lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Watching,
    Confirmed,
    Rejected,
    Expired,
}

impl WatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchStatus::Watching => "watching",
            WatchStatus::Confirmed => "confirmed",
            WatchStatus::Rejected => "rejected",
            WatchStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "watching" => Ok(WatchStatus::Watching),
            "confirmed" => Ok(WatchStatus::Confirmed),
            "rejected" => Ok(WatchStatus::Rejected),
            "expired" => Ok(WatchStatus::Expired),
            other => Err(CoreError::Parse(format!("unknown watch status: {other}"))),
        }
    }

    /// Terminal states are removed from persistence
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WatchStatus::Watching)
    }
}

/// The active candidacy derived from a qualifying setup.
///
/// Created only after the risk gate allows and the checklist clears the
/// auto-queue threshold; mutated only by the watch registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchTrade {
    pub id: String,
    pub symbol: String,
    pub bias: Direction,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub sl_pips: f64,
    pub tp1_pips: f64,
    pub tp2_pips: f64,
    pub confidence: Confidence,
    /// At most three phrases, fed to the confirmation prompt
    pub confluence: Vec<String>,
    pub checklist_score: String,
    /// Percentage of the position closed at TP1
    pub tp1_close_pct: u8,
    pub created_at: DateTime<Utc>,
    pub max_confirmations: u8,
    pub confirmations_used: u8,
    pub status: WatchStatus,
}

impl WatchTrade {
    pub fn attempts_remaining(&self) -> u8 {
        self.max_confirmations.saturating_sub(self.confirmations_used)
    }
}

/// An approved instruction on the hand-off queue. Lives for one TTL
/// window and may be observed by several terminals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTrade {
    pub id: String,
    pub symbol: String,
    pub bias: Direction,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub sl_pips: f64,
    pub confidence: Confidence,
    pub tp1_close_pct: u8,
    pub queued_at: DateTime<Utc>,
}

impl PendingTrade {
    pub fn from_watch(watch: &WatchTrade, queued_at: DateTime<Utc>) -> Self {
        Self {
            id: watch.id.clone(),
            symbol: watch.symbol.clone(),
            bias: watch.bias,
            entry_min: watch.entry_min,
            entry_max: watch.entry_max,
            stop_loss: watch.stop_loss,
            tp1: watch.tp1,
            tp2: watch.tp2,
            sl_pips: watch.sl_pips,
            confidence: watch.confidence,
            tp1_close_pct: watch.tp1_close_pct,
            queued_at,
        }
    }
}

/// Confirmation from the terminal after orders are placed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeExecutionReport {
    pub trade_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub ticket_tp1: i64,
    #[serde(default)]
    pub ticket_tp2: i64,
    #[serde(default)]
    pub lots_tp1: f64,
    #[serde(default)]
    pub lots_tp2: f64,
    #[serde(default)]
    pub actual_entry: f64,
    #[serde(default)]
    pub actual_sl: f64,
    #[serde(default)]
    pub actual_tp1: f64,
    #[serde(default)]
    pub actual_tp2: f64,
    /// "executed", "pending" (limit order placed) or "failed"
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_message: String,
}

/// Report from the terminal when a position closes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeCloseReport {
    pub trade_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub ticket: i64,
    #[serde(default)]
    pub close_price: f64,
    /// "tp1", "tp2", "sl", "manual", "cancelled"
    #[serde(default)]
    pub close_reason: String,
    /// Monetary P&L for this specific ticket
    #[serde(default)]
    pub profit: f64,
}

/// Compact decision from the screener tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenerVerdict {
    #[serde(default)]
    pub has_setup: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub h1_trend: String,
    #[serde(default)]
    pub market_summary: String,
}

/// Decision from the per-tick entry-confirmation tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmVerdict {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// Format a price with the pair's decimal digits
pub fn fmt_price(price: f64, digits: u32) -> String {
    format!("{:.*}", digits as usize, price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_data_tolerates_sparse_payloads() {
        let md: MarketData = serde_json::from_str(r#"{"symbol":"GBPJPY","bid":192.105}"#).unwrap();
        assert_eq!(md.symbol, "GBPJPY");
        assert_eq!(md.bid, 192.105);
        assert_eq!(md.account_balance, 0.0);
        assert!(md.ohlc_m5.is_empty());
    }

    #[test]
    fn checklist_points_parse() {
        let mut setup: TradeSetup = serde_json::from_value(serde_json::json!({
            "bias": "long",
            "entry_min": 191.2, "entry_max": 191.4,
            "stop_loss": 190.9, "sl_pips": 30.0,
            "tp1": 191.8, "tp1_pips": 20.0,
            "tp2": 192.4, "tp2_pips": 40.0,
            "rr_tp1": 1.0, "rr_tp2": 2.0,
            "confidence": "medium_high",
            "checklist_score": "9/12"
        }))
        .unwrap();
        assert_eq!(setup.checklist_points(), Some(9));
        setup.checklist_score = "garbage".into();
        assert_eq!(setup.checklist_points(), None);
    }

    #[test]
    fn watch_status_round_trip() {
        for s in [
            WatchStatus::Watching,
            WatchStatus::Confirmed,
            WatchStatus::Rejected,
            WatchStatus::Expired,
        ] {
            assert_eq!(WatchStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(WatchStatus::Watching.is_terminal() == false);
        assert!(WatchStatus::Expired.is_terminal());
    }

    #[test]
    fn price_formatting_uses_pair_digits() {
        assert_eq!(fmt_price(192.1049, 3), "192.105");
        assert_eq!(fmt_price(1.08005, 5), "1.08005");
        assert_eq!(fmt_price(2411.5, 2), "2411.50");
    }
}
