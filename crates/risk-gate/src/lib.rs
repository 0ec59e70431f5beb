//! Pre-trade risk gate.
//!
//! A pure decision function over current state: every candidate, whether
//! auto-queued or manually executed, passes through `check` before a
//! watch or pending trade is created. First deny wins; an allow carries
//! an empty reason. The gate itself never mutates anything.

use anyhow::Result;
use serde::Serialize;

use market_context::NewsCalendar;
use trade_core::{split_currencies, Direction};
use trade_store::TradeStore;

#[cfg(test)]
mod tests;

/// Tunable limits, loaded from configuration at startup
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_daily_drawdown_pct: f64,
    pub max_open_trades: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_drawdown_pct: 3.0,
            max_open_trades: 2,
        }
    }
}

/// Which rule denied the candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    NewsWindow,
    DailyDrawdown,
    MaxOpenTrades,
    Correlation,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
    pub rule: Option<GateRule>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            rule: None,
        }
    }

    fn deny(rule: GateRule, reason: String) -> Self {
        Self {
            allowed: false,
            reason,
            rule: Some(rule),
        }
    }
}

pub struct RiskGate {
    store: TradeStore,
    news: NewsCalendar,
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(store: TradeStore, news: NewsCalendar, limits: RiskLimits) -> Self {
        Self {
            store,
            news,
            limits,
        }
    }

    /// Evaluate the candidate in rule order: news window, daily
    /// drawdown, open-trade count, currency correlation.
    pub async fn check(
        &self,
        symbol: &str,
        direction: Direction,
        account_balance: f64,
    ) -> Result<GateDecision> {
        // 1. News window
        let restriction = self.news.restriction(symbol).await;
        if restriction.blocked {
            return Ok(GateDecision::deny(
                GateRule::NewsWindow,
                format!(
                    "News restriction: {} ({})",
                    restriction.event_title, restriction.event_currency
                ),
            ));
        }

        // 2. Daily drawdown
        if account_balance > 0.0 {
            let pnl = self.store.daily_pnl().await?;
            let drawdown = -pnl.daily_pnl.min(0.0);
            let drawdown_pct = drawdown / account_balance * 100.0;
            if drawdown_pct >= self.limits.max_daily_drawdown_pct {
                return Ok(GateDecision::deny(
                    GateRule::DailyDrawdown,
                    format!(
                        "Daily drawdown {:.1}% at or above limit {:.1}%",
                        drawdown_pct, self.limits.max_daily_drawdown_pct
                    ),
                ));
            }
        }

        let open = self.store.open_trades().await?;

        // 3. Max open trades
        if open.len() >= self.limits.max_open_trades {
            return Ok(GateDecision::deny(
                GateRule::MaxOpenTrades,
                format!(
                    "{} trades already open (limit {})",
                    open.len(),
                    self.limits.max_open_trades
                ),
            ));
        }

        // 4. Currency correlation
        let open_positions: Vec<(String, String)> = open
            .iter()
            .map(|t| (t.symbol.clone(), t.bias.clone()))
            .collect();
        if let Some(conflict) = correlation_conflict(&open_positions, symbol, direction) {
            return Ok(GateDecision::deny(GateRule::Correlation, conflict));
        }

        Ok(GateDecision::allow())
    }
}

/// Detect overlapping directional currency exposure via a different
/// symbol. Long GBPJPY means long GBP and short JPY; a second long-GBP
/// position through another pair doubles the GBP bet. Same-symbol
/// overlap is position sizing, not correlation, and is not flagged.
pub fn correlation_conflict(
    open_positions: &[(String, String)],
    symbol: &str,
    direction: Direction,
) -> Option<String> {
    let (base, quote) = split_currencies(symbol);
    let (new_base_dir, new_quote_dir) = match direction {
        Direction::Long => ("long", "short"),
        Direction::Short => ("short", "long"),
    };

    let mut conflicts = Vec::new();

    for (open_symbol, open_bias) in open_positions {
        if open_symbol == symbol {
            continue;
        }
        let (open_base, open_quote) = split_currencies(open_symbol);
        let (open_base_dir, open_quote_dir) = match open_bias.as_str() {
            "long" => ("long", "short"),
            _ => ("short", "long"),
        };

        for (open_currency, open_dir) in [(open_base, open_base_dir), (open_quote, open_quote_dir)] {
            if open_currency == base && open_dir == new_base_dir {
                conflicts.push(format!("{base} already {new_base_dir} via {open_symbol}"));
            }
            if open_currency == quote && open_dir == new_quote_dir {
                conflicts.push(format!("{quote} already {new_quote_dir} via {open_symbol}"));
            }
        }
    }

    if conflicts.is_empty() {
        None
    } else {
        Some(format!("Correlation risk: {}", conflicts.join("; ")))
    }
}
