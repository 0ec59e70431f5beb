//! External data feeds the charts cannot show: institutional positioning,
//! retail sentiment, central-bank rate differential and intermarket
//! indicators. Every adapter degrades to `None` on failure and caches
//! with its own horizon.

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

use crate::CacheDb;

const POSITIONING_URL: &str = "https://publicreporting.cftc.gov/resource/jun7-fc8e.json";
const SENTIMENT_URL: &str = "https://www.myfxbook.com/api/get-community-outlook.json";
const INTEREST_RATE_URL: &str = "https://api.api-ninjas.com/v1/interestrate";
const FRED_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

fn futures_contract(currency: &str) -> Option<&'static str> {
    match currency {
        "GBP" => Some("BRITISH POUND STERLING"),
        "JPY" => Some("JAPANESE YEN"),
        "EUR" => Some("EURO FX"),
        "USD" => Some("U.S. DOLLAR INDEX"),
        "AUD" => Some("AUSTRALIAN DOLLAR"),
        "CAD" => Some("CANADIAN DOLLAR"),
        "CHF" => Some("SWISS FRANC"),
        "NZD" => Some("NEW ZEALAND DOLLAR"),
        "XAU" => Some("GOLD"),
        _ => None,
    }
}

fn central_bank(currency: &str) -> Option<&'static str> {
    match currency {
        "GBP" => Some("Bank of England"),
        "JPY" => Some("Bank of Japan"),
        "EUR" => Some("European Central Bank"),
        "USD" => Some("Federal Reserve"),
        "AUD" => Some("Reserve Bank of Australia"),
        "CAD" => Some("Bank of Canada"),
        "CHF" => Some("Swiss National Bank"),
        "NZD" => Some("Reserve Bank of New Zealand"),
        _ => None,
    }
}

fn fred_series(currency: &str) -> Option<&'static str> {
    match currency {
        "GBP" => Some("BOERUKM"),
        "EUR" => Some("ECBMLFR"),
        "USD" => Some("FEDFUNDS"),
        "JPY" => Some("IRSTCB01JPM156N"),
        _ => None,
    }
}

fn carry_status(spread_bps: i64) -> &'static str {
    if spread_bps >= 400 {
        "strong"
    } else if spread_bps >= 250 {
        "moderate"
    } else if spread_bps >= 100 {
        "weakening"
    } else {
        "minimal"
    }
}

/// Weekly speculator positioning for both legs of the pair. Cached 24 h;
/// the source publishes weekly.
pub async fn fetch_positioning(
    client: &Client,
    cache: &CacheDb,
    base: &str,
    quote: &str,
) -> Option<Value> {
    let cache_key = format!("positioning_{base}_{quote}_{}", Utc::now().format("%Y-%m-%d"));
    if let Some(cached) = cache.get(&cache_key, 24.0).await {
        return Some(cached);
    }

    let mut result = serde_json::Map::new();

    for (label, currency) in [("base", base), ("quote", quote)] {
        let Some(contract) = futures_contract(currency) else {
            continue;
        };

        let response = client
            .get(POSITIONING_URL)
            .query(&[
                ("$where", format!("contract_market_name like '%{contract}%'")),
                ("$order", "report_date_as_yyyy_mm_dd DESC".to_string()),
                ("$limit", "2".to_string()),
            ])
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await;

        let reports: Vec<Value> = match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
            Ok(resp) => {
                tracing::warn!("Positioning fetch for {} returned {}", currency, resp.status());
                continue;
            }
            Err(e) => {
                tracing::warn!("Positioning fetch for {} failed: {}", currency, e);
                continue;
            }
        };

        let Some(latest) = reports.first() else { continue };
        let spec_long = int_field(latest, "noncomm_positions_long_all");
        let spec_short = int_field(latest, "noncomm_positions_short_all");
        let net = spec_long - spec_short;

        let mut entry = json!({
            "currency": currency,
            "net_speculator": net,
            "spec_long": spec_long,
            "spec_short": spec_short,
            "report_date": latest.get("report_date_as_yyyy_mm_dd").cloned().unwrap_or(Value::Null),
        });

        if let Some(prev) = reports.get(1) {
            let prev_net =
                int_field(prev, "noncomm_positions_long_all") - int_field(prev, "noncomm_positions_short_all");
            let change = net - prev_net;
            entry["net_change"] = json!(change);
            entry["positioning_shift"] = json!(if change > 0 {
                "increasing_long"
            } else if change < 0 {
                "increasing_short"
            } else {
                "unchanged"
            });
        }

        tracing::info!("Positioning {}: net {:+}", currency, net);
        result.insert(label.to_string(), entry);
    }

    if result.is_empty() {
        return None;
    }
    let value = Value::Object(result);
    cache.set(&cache_key, &value).await;
    Some(value)
}

/// Retail long/short split for the pair, read as a contrarian indicator.
/// Cached 4 h.
pub async fn fetch_retail_sentiment(client: &Client, cache: &CacheDb, symbol: &str) -> Option<Value> {
    let cache_key = format!("sentiment_{symbol}_{}", Utc::now().format("%Y-%m-%d"));
    if let Some(cached) = cache.get(&cache_key, 4.0).await {
        return Some(cached);
    }

    let data: Value = match client
        .get(SENTIMENT_URL)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp.json().await.ok()?,
        Ok(resp) => {
            tracing::warn!("Sentiment fetch returned {}", resp.status());
            return None;
        }
        Err(e) => {
            tracing::warn!("Sentiment fetch failed: {}", e);
            return None;
        }
    };

    let symbols = data.get("symbols")?.as_array()?;
    let item = symbols.iter().find(|item| {
        item.get("name")
            .and_then(Value::as_str)
            .map(|name| name.to_uppercase().replace('/', "") == symbol)
            .unwrap_or(false)
    })?;

    let pct_long = float_field(item, "longPercentage");
    let pct_short = float_field(item, "shortPercentage");

    let value = json!({
        "symbol": symbol,
        "pct_long": pct_long,
        "pct_short": pct_short,
        "crowd_bias": if pct_long > 55.0 { "long" } else if pct_short > 55.0 { "short" } else { "neutral" },
        "contrarian_signal": if pct_short >= 65.0 { "bullish" } else if pct_long >= 65.0 { "bearish" } else { "neutral" },
    });

    tracing::info!(
        "Sentiment {}: {:.0}% long / {:.0}% short",
        symbol,
        pct_long,
        pct_short
    );
    cache.set(&cache_key, &value).await;
    Some(value)
}

/// Central-bank rate differential (carry attractiveness). Primary source
/// needs an API key; a free series endpoint fills the gaps. Cached 24 h.
/// Gold has no central bank, so metal pairs skip this adapter.
pub async fn fetch_rate_differential(
    client: &Client,
    cache: &CacheDb,
    base: &str,
    quote: &str,
    api_ninjas_key: Option<&str>,
    fred_api_key: Option<&str>,
) -> Option<Value> {
    if base == "XAU" || quote == "XAU" {
        return None;
    }

    let cache_key = format!("rates_{base}_{quote}_{}", Utc::now().format("%Y-%m-%d"));
    if let Some(cached) = cache.get(&cache_key, 24.0).await {
        return Some(cached);
    }

    let mut base_rate: Option<f64> = None;
    let mut quote_rate: Option<f64> = None;

    if let Some(key) = api_ninjas_key {
        if let Ok(resp) = client
            .get(INTEREST_RATE_URL)
            .header("X-Api-Key", key)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            if let Ok(data) = resp.json::<Value>().await {
                let banks = data
                    .get("central_bank_rates")
                    .and_then(Value::as_array)
                    .cloned()
                    .or_else(|| data.as_array().cloned())
                    .unwrap_or_default();
                for bank in &banks {
                    let name = bank.get("central_bank").and_then(Value::as_str).unwrap_or("");
                    let rate = float_field(bank, "rate_pct");
                    if let Some(expected) = central_bank(base) {
                        if name.to_lowercase().contains(&expected.to_lowercase()) {
                            base_rate = Some(rate);
                        }
                    }
                    if let Some(expected) = central_bank(quote) {
                        if name.to_lowercase().contains(&expected.to_lowercase()) {
                            quote_rate = Some(rate);
                        }
                    }
                }
            }
        }
    }

    // Free fallback for whichever leg is still missing
    for (slot, currency) in [(&mut base_rate, base), (&mut quote_rate, quote)] {
        if slot.is_some() {
            continue;
        }
        let Some(series) = fred_series(currency) else { continue };
        let mut query = vec![
            ("series_id", series.to_string()),
            ("sort_order", "desc".to_string()),
            ("limit", "1".to_string()),
            ("file_type", "json".to_string()),
        ];
        if let Some(key) = fred_api_key {
            query.push(("api_key", key.to_string()));
        }

        let response = client
            .get(FRED_URL)
            .query(&query)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;
        let Ok(resp) = response else { continue };
        let Ok(data) = resp.json::<Value>().await else { continue };
        let rate = data
            .pointer("/observations/0/value")
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<f64>().ok());
        if let Some(rate) = rate {
            tracing::info!("Fallback {} rate: {:.2}%", currency, rate);
            *slot = Some(rate);
        }
    }

    let (base_rate, quote_rate) = (base_rate?, quote_rate?);
    let spread_bps = ((base_rate - quote_rate) * 100.0).round() as i64;
    let value = json!({
        "base_currency": base,
        "quote_currency": quote,
        "base_bank": central_bank(base).unwrap_or(""),
        "quote_bank": central_bank(quote).unwrap_or(""),
        "base_rate": base_rate,
        "quote_rate": quote_rate,
        "spread_bps": spread_bps,
        "carry_trade_status": carry_status(spread_bps),
    });

    tracing::info!(
        "Rate diff {}/{}: {:+} bps ({})",
        base,
        quote,
        spread_bps,
        carry_status(spread_bps)
    );
    cache.set(&cache_key, &value).await;
    Some(value)
}

fn intermarket_tickers(base: &str, quote: &str) -> Vec<(&'static str, &'static str)> {
    let mut tickers = vec![("dxy", "DX-Y.NYB"), ("us_10y_yield", "^TNX")];
    let currencies = [base, quote];

    if currencies.contains(&"JPY") {
        tickers.push(("nikkei_225", "^N225"));
    }
    if currencies.contains(&"GBP") {
        tickers.push(("ftse_100", "^FTSE"));
    }
    if currencies.contains(&"EUR") {
        tickers.push(("dax", "^GDAXI"));
    }
    if currencies.contains(&"XAU") {
        tickers.push(("gold_etf", "GLD"));
        tickers.push(("vix", "^VIX"));
    }
    if currencies.contains(&"AUD") {
        tickers.push(("asx_200", "^AXJO"));
    }
    if currencies.contains(&"CAD") {
        tickers.push(("oil_wti", "CL=F"));
    }
    tickers
}

/// Pair-relevant indices and yields with a derived risk-on/off read.
/// Cached 2 h; the key rotates with the two-hour block so intraday moves
/// show up.
pub async fn fetch_intermarket(
    client: &Client,
    cache: &CacheDb,
    base: &str,
    quote: &str,
) -> Option<Value> {
    use chrono::Timelike;
    let now = Utc::now();
    let cache_key = format!(
        "intermarket_{base}_{quote}_{}_{}",
        now.format("%Y-%m-%d"),
        now.hour() / 2
    );
    if let Some(cached) = cache.get(&cache_key, 2.0).await {
        return Some(cached);
    }

    let mut result = serde_json::Map::new();

    for (name, ticker) in intermarket_tickers(base, quote) {
        let response = client
            .get(format!("{YAHOO_CHART_URL}/{ticker}"))
            .query(&[("interval", "1d"), ("range", "5d")])
            .header("User-Agent", "Mozilla/5.0 (compatible; pairdesk/1.0)")
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;

        let Ok(resp) = response else { continue };
        let Ok(data) = resp.json::<Value>().await else { continue };

        let meta = data.pointer("/chart/result/0/meta").cloned().unwrap_or(Value::Null);
        let price = float_field(&meta, "regularMarketPrice");
        let prev_close = {
            let v = float_field(&meta, "chartPreviousClose");
            if v != 0.0 { v } else { float_field(&meta, "previousClose") }
        };

        let closes: Vec<f64> = data
            .pointer("/chart/result/0/indicators/quote/0/close")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        let change_pct = if price != 0.0 && prev_close != 0.0 {
            (price - prev_close) / prev_close * 100.0
        } else {
            0.0
        };

        let (five_day_change, trend) = if closes.len() >= 5 && closes[0] != 0.0 {
            let change = (closes[closes.len() - 1] - closes[0]) / closes[0] * 100.0;
            let trend = if change > 0.5 {
                "up"
            } else if change < -0.5 {
                "down"
            } else {
                "flat"
            };
            (change, trend)
        } else {
            (0.0, "unknown")
        };

        result.insert(
            name.to_string(),
            json!({
                "price": price,
                "daily_change_pct": change_pct,
                "five_day_change_pct": five_day_change,
                "trend": trend,
            }),
        );
    }

    if result.is_empty() {
        return None;
    }

    // Risk read from the equity indices that responded
    let equity_indices = ["nikkei_225", "ftse_100", "dax", "asx_200"];
    let mut bullish = 0;
    let mut bearish = 0;
    for idx in equity_indices {
        let change = result
            .get(idx)
            .map(|v| float_field(v, "daily_change_pct"))
            .unwrap_or(0.0);
        if change > 0.3 {
            bullish += 1;
        } else if change < -0.3 {
            bearish += 1;
        }
    }
    result.insert(
        "risk_sentiment".to_string(),
        json!(if bullish >= 2 {
            "risk_on"
        } else if bearish >= 2 {
            "risk_off"
        } else {
            "mixed"
        }),
    );

    if [base, quote].contains(&"XAU") {
        let dxy_chg = result.get("dxy").map(|v| float_field(v, "daily_change_pct")).unwrap_or(0.0);
        let vix_chg = result.get("vix").map(|v| float_field(v, "daily_change_pct")).unwrap_or(0.0);
        let bias = if dxy_chg < -0.3 || vix_chg > 3.0 {
            "bullish (USD weak / fear rising)"
        } else if dxy_chg > 0.3 && vix_chg < -3.0 {
            "bearish (USD strong / calm markets)"
        } else {
            "neutral"
        };
        result.insert("gold_bias".to_string(), json!(bias));
    }

    let value = Value::Object(result);
    cache.set(&cache_key, &value).await;
    Some(value)
}

fn int_field(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0)
}

fn float_field(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carry_status_thresholds() {
        assert_eq!(carry_status(465), "strong");
        assert_eq!(carry_status(300), "moderate");
        assert_eq!(carry_status(120), "weakening");
        assert_eq!(carry_status(40), "minimal");
    }

    #[test]
    fn intermarket_ticker_selection_is_pair_aware() {
        let jpy = intermarket_tickers("GBP", "JPY");
        assert!(jpy.iter().any(|(n, _)| *n == "nikkei_225"));
        assert!(jpy.iter().any(|(n, _)| *n == "ftse_100"));

        let gold = intermarket_tickers("XAU", "USD");
        assert!(gold.iter().any(|(n, _)| *n == "vix"));
        assert!(!gold.iter().any(|(n, _)| *n == "nikkei_225"));
    }

    #[test]
    fn numeric_fields_accept_strings() {
        let v = serde_json::json!({"a": "42", "b": 7, "c": "3.5"});
        assert_eq!(int_field(&v, "a"), 42);
        assert_eq!(int_field(&v, "b"), 7);
        assert_eq!(float_field(&v, "c"), 3.5);
        assert_eq!(float_field(&v, "missing"), 0.0);
    }
}
