use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use trade_core::PairProfile;

use crate::{adapters, CacheDb};

/// Keys for the paid/keyed context sources; both optional.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub api_ninjas_key: Option<String>,
    pub fred_api_key: Option<String>,
}

/// Composes the four context adapters into one prompt block.
#[derive(Clone)]
pub struct ContextBuilder {
    client: Client,
    cache: CacheDb,
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(cache: CacheDb, config: ContextConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            cache,
            config,
        }
    }

    async fn fetch_all(
        &self,
        profile: &PairProfile,
    ) -> (Option<Value>, Option<Value>, Option<Value>, Option<Value>) {
        let base = profile.base_currency.as_str();
        let quote = profile.quote_currency.as_str();

        tokio::join!(
            adapters::fetch_positioning(&self.client, &self.cache, base, quote),
            adapters::fetch_retail_sentiment(&self.client, &self.cache, &profile.symbol),
            adapters::fetch_rate_differential(
                &self.client,
                &self.cache,
                base,
                quote,
                self.config.api_ninjas_key.as_deref(),
                self.config.fred_api_key.as_deref(),
            ),
            adapters::fetch_intermarket(&self.client, &self.cache, base, quote),
        )
    }

    /// Build the macro/sentiment block injected into the analysis prompt.
    /// Returns `None` when every adapter came back empty.
    pub async fn build_context(&self, profile: &PairProfile) -> Option<String> {
        let (positioning, sentiment, rates, intermarket) = self.fetch_all(profile).await;

        let symbol = &profile.symbol;
        let base = &profile.base_currency;
        let quote = &profile.quote_currency;
        let mut sections: Vec<String> = Vec::new();

        if let Some(positioning) = &positioning {
            let mut lines = Vec::new();
            for label in ["base", "quote"] {
                let Some(entry) = positioning.get(label) else { continue };
                let currency = entry.get("currency").and_then(Value::as_str).unwrap_or("?");
                let net = entry.get("net_speculator").and_then(Value::as_i64).unwrap_or(0);
                let change = entry.get("net_change").and_then(Value::as_i64).unwrap_or(0);
                let shift = entry
                    .get("positioning_shift")
                    .and_then(Value::as_str)
                    .unwrap_or("unchanged");
                let bias = if net > 0 { "bullish" } else { "bearish" };
                lines.push(format!(
                    "  {currency}: speculators net {net:+} ({bias}, WoW change: {change:+} {shift})"
                ));
            }
            if !lines.is_empty() {
                sections.push(format!(
                    "Institutional Positioning (weekly futures):\n{}",
                    lines.join("\n")
                ));
            }
        }

        if let Some(sentiment) = &sentiment {
            let pct_long = sentiment.get("pct_long").and_then(Value::as_f64).unwrap_or(50.0);
            let pct_short = sentiment.get("pct_short").and_then(Value::as_f64).unwrap_or(50.0);
            let crowd = sentiment.get("crowd_bias").and_then(Value::as_str).unwrap_or("neutral");
            let contrarian = sentiment
                .get("contrarian_signal")
                .and_then(Value::as_str)
                .unwrap_or("neutral");
            sections.push(format!(
                "Retail Sentiment:\n  {symbol}: {pct_long:.0}% long / {pct_short:.0}% short \
                 (crowd {crowd}, contrarian signal: {contrarian})"
            ));
        }

        if let Some(rates) = &rates {
            if let Some(spread) = rates.get("spread_bps").and_then(Value::as_i64) {
                let base_bank = rates.get("base_bank").and_then(Value::as_str).unwrap_or(base);
                let quote_bank = rates.get("quote_bank").and_then(Value::as_str).unwrap_or(quote);
                let base_rate = rates.get("base_rate").and_then(Value::as_f64).unwrap_or(0.0);
                let quote_rate = rates.get("quote_rate").and_then(Value::as_f64).unwrap_or(0.0);
                let status = rates
                    .get("carry_trade_status")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                sections.push(format!(
                    "Interest Rate Differential:\n  {base_bank}: {base_rate:.2}% | {quote_bank}: {quote_rate:.2}%\n  \
                     Spread: {spread:+} bps. Carry trade: {status}"
                ));
            }
        }

        if let Some(intermarket) = &intermarket {
            let mut lines = Vec::new();
            if let Some(map) = intermarket.as_object() {
                for (name, indicator) in map {
                    let Some(price) = indicator.get("price").and_then(Value::as_f64) else {
                        continue;
                    };
                    let change = indicator
                        .get("daily_change_pct")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    let trend = indicator.get("trend").and_then(Value::as_str).unwrap_or("?");
                    let display = title_case(name);
                    lines.push(format!(
                        "  {display}: {price:.2} ({change:+.2}% today, 5d trend: {trend})"
                    ));
                }
            }
            let risk = intermarket
                .get("risk_sentiment")
                .and_then(Value::as_str)
                .unwrap_or("mixed");
            lines.push(format!("  Overall risk sentiment: {risk}"));
            if let Some(gold_bias) = intermarket.get("gold_bias").and_then(Value::as_str) {
                lines.push(format!("  Gold macro bias: {gold_bias}"));
            }
            sections.push(format!("Intermarket Indicators:\n{}", lines.join("\n")));
        }

        if sections.is_empty() {
            tracing::info!("[{}] No market context data available", symbol);
            return None;
        }

        let mut context = format!(
            "## MACRO & SENTIMENT CONTEXT (live data)\n{}",
            sections.join("\n\n")
        );

        context.push_str("\n\nUse the above as additional confluence:");
        context.push_str("\n- If positioning opposes your chart bias, lower confidence by one tier");
        context
            .push_str("\n- If retail is 65%+ one-sided, the contrarian signal supports the opposite direction");

        if base == "XAU" {
            context.push_str(
                "\n- Gold: USD index is inversely correlated. Strong USD = bearish gold. Rising VIX = bullish gold",
            );
            context.push_str("\n- Gold: rising real yields = bearish gold");
        } else {
            if quote == "JPY" {
                context.push_str(&format!(
                    "\n- If Nikkei is risk-off, JPY strengthens, bearish for {symbol}"
                ));
            }
            if rates
                .as_ref()
                .map(|r| r.get("spread_bps").is_some())
                .unwrap_or(false)
            {
                context.push_str("\n- If the carry trade is weakening, favor shorter-term setups over swings");
            }
            if base == "GBP" {
                context.push_str("\n- FTSE 100 rallying supports GBP strength");
            }
            if base == "EUR" {
                context.push_str("\n- DAX rallying supports EUR via risk-on sentiment");
            }
        }

        context.push_str("\nDo NOT override chart-based structure analysis. Use this as a tiebreaker or confidence adjuster.");

        tracing::info!(
            "[{}] Market context built: {} chars, {} sections",
            symbol,
            context.len(),
            sections.len()
        );
        Some(context)
    }

    /// Human-readable summary for the messenger `/context` command.
    pub async fn context_summary(&self, profile: &PairProfile) -> String {
        let (positioning, sentiment, rates, intermarket) = self.fetch_all(profile).await;

        let mut lines = vec![format!("{} Market Context", profile.symbol), "─".repeat(25), String::new()];

        match &positioning {
            Some(positioning) => {
                lines.push("Institutional positioning:".to_string());
                for label in ["base", "quote"] {
                    if let Some(entry) = positioning.get(label) {
                        let currency = entry.get("currency").and_then(Value::as_str).unwrap_or("?");
                        let net = entry.get("net_speculator").and_then(Value::as_i64).unwrap_or(0);
                        let change = entry.get("net_change").and_then(Value::as_i64).unwrap_or(0);
                        lines.push(format!("  {currency}: net {net:+} (WoW: {change:+})"));
                    }
                }
            }
            None => lines.push("Institutional positioning: unavailable".to_string()),
        }

        match &sentiment {
            Some(s) => {
                let pct_long = s.get("pct_long").and_then(Value::as_f64).unwrap_or(50.0);
                let pct_short = s.get("pct_short").and_then(Value::as_f64).unwrap_or(50.0);
                let contrarian = s.get("contrarian_signal").and_then(Value::as_str).unwrap_or("neutral");
                lines.push(String::new());
                lines.push(format!(
                    "Retail sentiment: {pct_long:.0}% long / {pct_short:.0}% short (contrarian: {contrarian})"
                ));
            }
            None => lines.push("Retail sentiment: unavailable".to_string()),
        }

        match &rates {
            Some(r) if r.get("spread_bps").is_some() => {
                let spread = r.get("spread_bps").and_then(Value::as_i64).unwrap_or(0);
                let status = r.get("carry_trade_status").and_then(Value::as_str).unwrap_or("?");
                lines.push(String::new());
                lines.push(format!("Rate differential: {spread:+} bps ({status})"));
            }
            _ => lines.push("Rate differential: unavailable".to_string()),
        }

        match &intermarket {
            Some(im) => {
                let risk = im.get("risk_sentiment").and_then(Value::as_str).unwrap_or("mixed");
                lines.push(String::new());
                lines.push(format!("Intermarket ({risk}):"));
                if let Some(map) = im.as_object() {
                    for (name, indicator) in map {
                        let Some(price) = indicator.get("price").and_then(Value::as_f64) else {
                            continue;
                        };
                        let change = indicator
                            .get("daily_change_pct")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0);
                        lines.push(format!("  {}: {:.2} ({:+.2}%)", title_case(name), price, change));
                    }
                }
            }
            None => lines.push("Intermarket: unavailable".to_string()),
        }

        lines.push(String::new());
        lines.push("Data is cached and refreshes automatically".to_string());
        lines.join("\n")
    }
}

fn title_case(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
