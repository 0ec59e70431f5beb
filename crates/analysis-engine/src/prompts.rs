//! Prompt builders for the three model tiers.
//!
//! The static parts are emitted as cache-marked system blocks so the
//! provider can deduplicate the prefix across repeated calls; only the
//! per-call market payload varies.

use trade_core::{fmt_price, MarketData, PairProfile, WatchTrade};

/// Static prefix for the cheap screener tier.
pub fn screener_system(profile: &PairProfile) -> String {
    format!(
        "You are an FX screener for {symbol}. You receive two intraday charts \
(M15 and M5) plus a market data snapshot and today's macro context. Decide \
quickly whether the current picture is worth a full institutional analysis.

A setup is worth escalating when there is a plausible directional edge: a \
liquidity sweep, a break of structure toward an untested zone, a clean trend \
continuation pullback, or price approaching a well-defined supply/demand zone. \
Ranging chop with no structure is not worth escalating.

Respond with JSON only, exactly this shape:
{{
  \"has_setup\": true or false,
  \"reasoning\": \"one or two sentences\",
  \"h1_trend\": \"bullish\" or \"bearish\" or \"ranging\",
  \"market_summary\": \"one sentence on current conditions\"
}}",
        symbol = profile.symbol
    )
}

/// Static prefix for the full-analysis tier, parameterised per pair.
pub fn analysis_system(profile: &PairProfile) -> String {
    format!(
        "You are a senior institutional FX analyst specializing in {specialization}. \
You are analyzing live {symbol} charts sent from a broker terminal.

## CONTEXT
- Pair: {symbol} (prices quoted to {digits} decimals, typical spread {spread})
- Key sessions: {sessions}
- Risk per trade: 1%, targeting minimum 1:2 R:R
- The desk trades market structure: BOS, ChoCH, order blocks, FVGs, liquidity sweeps
- TP strategy: a fraction is closed at TP1, the runner goes to TP2 with the stop moved to breakeven

## YOUR TASK
Analyze the four charts (H4, H1, M15, M5) top-down:

### Market Structure (priority: high)
- Trend direction per timeframe (H4 -> H1 -> M15 -> M5)
- Key swing highs/lows with exact price levels
- Break of structure (BOS) / change of character (ChoCH) locations

### Key Levels (be precise with prices)
- Institutional liquidity zones (equal highs/lows, stop hunts)
- Order blocks and supply/demand zones
- Fair value gaps and untested points of interest

### Quality Checklist
Score every setup against this 12-point checklist and report it as \"k/12\":
1. H4 and H1 trend agree with the trade direction
2. D1 context does not oppose the trade
3. Entry zone is an untested order block or FVG
4. Liquidity was swept before the entry signal
5. BOS or ChoCH confirms on M15
6. M5 shows a clean trigger pattern
7. R:R to TP1 is at least 1:1
8. R:R to TP2 is at least 1:2
9. Entry is not chasing (price has not already left the zone)
10. No high-impact news inside the hold window
11. Macro context supports or is neutral to the direction
12. Spread and session conditions are acceptable

### Trade Setups
For EACH valid setup provide EXACTLY this JSON structure:
{{
  \"setups\": [
    {{
      \"bias\": \"long\" or \"short\",
      \"entry_min\": price, \"entry_max\": price,
      \"stop_loss\": price, \"sl_pips\": number,
      \"tp1\": price, \"tp1_pips\": number,
      \"tp2\": price, \"tp2_pips\": number,
      \"rr_tp1\": number, \"rr_tp2\": number,
      \"confluence\": [\"reason1\", \"reason2\", \"reason3\"],
      \"negative_factors\": [\"factor1\"],
      \"invalidation\": \"description\",
      \"timeframe_type\": \"scalp\" or \"intraday\" or \"swing\",
      \"confidence\": \"high\" or \"medium_high\" or \"medium\" or \"low\",
      \"news_warning\": \"description or null\",
      \"counter_trend\": true or false,
      \"h1_trend\": \"bullish\" or \"bearish\" or \"ranging\",
      \"h4_trend\": \"bullish\" or \"bearish\" or \"ranging\",
      \"d1_trend\": \"bullish\" or \"bearish\" or \"ranging\",
      \"trend_alignment\": \"aligned count like 3/4 plus a short note\",
      \"price_zone\": \"discount\" or \"premium\" or \"equilibrium\",
      \"entry_status\": \"at_zone\" or \"approaching\" or \"requires_pullback\",
      \"entry_distance_pips\": number,
      \"checklist_score\": \"k/12\"
    }}
  ],
  \"h1_trend_analysis\": \"short H1 structure read\",
  \"market_summary\": \"2-3 sentence summary\",
  \"primary_scenario\": \"description\",
  \"alternative_scenario\": \"description\",
  \"fundamental_bias\": \"bullish_{base_lower}\" or \"bearish_{base_lower}\" or \"neutral\",
  \"upcoming_events\": [\"event1\", \"event2\"]
}}

## RULES
- No setup is better than a bad setup. Return an empty setups array if there is no clear edge
- Prioritize setups with 3+ confluence factors
- Consider the {symbol} spread ({spread}) in SL/TP calculations
- Flag any setup near high-impact news events
- Always respond with valid JSON matching the structure above, nothing else",
        symbol = profile.symbol,
        digits = profile.digits,
        spread = profile.typical_spread,
        sessions = profile.key_sessions,
        specialization = profile.specialization,
        base_lower = profile.base_currency.to_lowercase(),
    )
}

/// Per-call market payload for screener and full analysis. OHLC arrays
/// are summarised in the display block and attached in full separately.
pub fn market_data_block(market_data: &MarketData, include_ohlc: bool) -> String {
    let mut display = serde_json::json!({
        "symbol": market_data.symbol,
        "session": market_data.session,
        "timestamp": market_data.timestamp,
        "bid": market_data.bid,
        "ask": market_data.ask,
        "spread_pips": market_data.spread_pips,
        "rsi": {
            "h4": market_data.rsi_h4,
            "h1": market_data.rsi_h1,
            "m15": market_data.rsi_m15,
            "m5": market_data.rsi_m5,
        },
        "atr": {
            "h1": market_data.atr_h1,
            "m15": market_data.atr_m15,
            "m5": market_data.atr_m5,
        },
        "daily_high": market_data.daily_high,
        "daily_low": market_data.daily_low,
        "daily_range_pips": market_data.daily_range_pips,
        "prev_day": {
            "high": market_data.prev_day_high,
            "low": market_data.prev_day_low,
            "close": market_data.prev_day_close,
        },
        "prev_week": {
            "high": market_data.prev_week_high,
            "low": market_data.prev_week_low,
        },
        "asian_session": {
            "high": market_data.asian_high,
            "low": market_data.asian_low,
        },
        "account_balance": market_data.account_balance,
    });

    display["ohlc_bar_counts"] = serde_json::json!({
        "h1_bars": market_data.ohlc_h1.len(),
        "m15_bars": market_data.ohlc_m15.len(),
        "m5_bars": market_data.ohlc_m5.len(),
    });

    let mut block = format!(
        "--- Market Data ---\n{}",
        serde_json::to_string_pretty(&display).unwrap_or_default()
    );

    if include_ohlc {
        let ohlc = serde_json::json!({
            "ohlc_h1": market_data.ohlc_h1,
            "ohlc_m15": market_data.ohlc_m15,
            "ohlc_m5": market_data.ohlc_m5,
        });
        block.push_str("\n\n--- Full OHLC Data ---\n");
        block.push_str(&ohlc.to_string());
    }

    block
}

/// Fast per-tick confirmation of a watched zone from one M1 chart.
pub fn confirm_system(symbol: &str) -> String {
    format!(
        "You are confirming an entry trigger for {symbol} from a single M1 chart. \
The higher-timeframe analysis already approved this trade; your only job is to \
judge whether the M1 price action at the zone supports entering RIGHT NOW: \
rejection wicks, a micro break of structure in the trade direction, or clear \
absorption at the level. Momentum punching straight through the zone, or no \
reaction at all, means do not enter.

Respond with JSON only:
{{ \"confirmed\": true or false, \"reasoning\": \"one sentence\" }}"
    )
}

pub fn confirm_user_text(watch: &WatchTrade, current_price: f64, digits: u32) -> String {
    let mut text = format!(
        "Proposed trade: {} {} in zone {} - {}\nStop: {} | TP1: {} | TP2: {}\nCurrent price: {}\nConfidence at analysis time: {}",
        watch.symbol,
        watch.bias.label(),
        fmt_price(watch.entry_min, digits),
        fmt_price(watch.entry_max, digits),
        fmt_price(watch.stop_loss, digits),
        fmt_price(watch.tp1, digits),
        fmt_price(watch.tp2, digits),
        fmt_price(current_price, digits),
        watch.confidence.as_str(),
    );
    if !watch.confluence.is_empty() {
        text.push_str("\nOriginal confluence:");
        for reason in &watch.confluence {
            text.push_str(&format!("\n- {reason}"));
        }
    }
    text.push_str("\n\nJudge the M1 chart above and answer with the JSON shape only.");
    text
}

/// Tier-0 fundamentals sweep, executed with the provider's web search.
pub fn fundamentals_prompt(profile: &PairProfile) -> String {
    let queries = profile
        .search_queries
        .iter()
        .map(|q| format!("\"{q}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Use web search to build today's fundamentals brief for {symbol}. \
Search for {queries}. Cover: current {base} drivers (max 3 bullets), current \
{quote} drivers (max 3 bullets), scheduled high-impact events in the next 24h, \
and the overall fundamental bias. Keep the whole brief under 300 words of \
plain text. No JSON, no markdown headers.",
        symbol = profile.symbol,
        base = profile.base_currency,
        quote = profile.quote_currency,
    )
}

/// Short post-trade review prompt; the output feeds future analyses.
pub fn review_prompt(record: &trade_store::TradeRecord) -> String {
    format!(
        "A {symbol} {bias} trade just closed with outcome {outcome} \
({pnl_pips:+.1} pips). Planned zone {entry_min}-{entry_max}, SL {sl_pips} pips, \
checklist {checklist}, confidence {confidence}, entry status {entry_status}, \
price zone {price_zone}, trend alignment {trend_alignment}. \
Write a 2-3 sentence review of what this outcome suggests about the setup \
quality criteria, to be fed back into future analyses. Plain text only.",
        symbol = record.symbol,
        bias = record.bias,
        outcome = record.outcome,
        pnl_pips = record.pnl_pips,
        entry_min = record.entry_min,
        entry_max = record.entry_max,
        sl_pips = record.sl_pips,
        checklist = record.checklist_score,
        confidence = record.confidence,
        entry_status = record.entry_status,
        price_zone = record.price_zone,
        trend_alignment = record.trend_alignment,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use trade_core::get_profile;

    #[test]
    fn analysis_system_is_pair_parameterised() {
        let prompt = analysis_system(&get_profile("GBPJPY"));
        assert!(prompt.contains("GBPJPY"));
        assert!(prompt.contains("3 decimals"));
        assert!(prompt.contains("bullish_gbp"));
        assert!(prompt.contains("k/12"));

        let gold = analysis_system(&get_profile("XAUUSD"));
        assert!(gold.contains("bullish_xau"));
    }

    #[test]
    fn market_block_omits_ohlc_for_screener() {
        let md = MarketData {
            symbol: "GBPJPY".into(),
            bid: 192.105,
            ohlc_m5: vec![Default::default(); 20],
            ..Default::default()
        };
        let screener = market_data_block(&md, false);
        assert!(screener.contains("\"m5_bars\": 20"));
        assert!(!screener.contains("Full OHLC"));

        let full = market_data_block(&md, true);
        assert!(full.contains("Full OHLC"));
    }
}
