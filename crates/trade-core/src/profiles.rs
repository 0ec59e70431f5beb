//! Per-symbol configuration profiles.
//!
//! Known pairs get a curated profile; unknown symbols fall back to
//! defaults inferred from the symbol name.

/// Static per-pair configuration
#[derive(Debug, Clone)]
pub struct PairProfile {
    pub symbol: String,
    /// Decimal digits for price formatting
    pub digits: u32,
    pub typical_spread: String,
    pub key_sessions: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub specialization: String,
    /// Kill-zone boundaries in the desk's local wall-clock hours
    pub kill_zone_start: u32,
    pub kill_zone_end: u32,
    /// Web-search hints for the daily context fetcher
    pub search_queries: Vec<String>,
}

impl PairProfile {
    fn known(
        symbol: &str,
        digits: u32,
        typical_spread: &str,
        key_sessions: &str,
        base: &str,
        quote: &str,
        specialization: &str,
        kill_zone: (u32, u32),
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            digits,
            typical_spread: typical_spread.to_string(),
            key_sessions: key_sessions.to_string(),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            specialization: specialization.to_string(),
            kill_zone_start: kill_zone.0,
            kill_zone_end: kill_zone.1,
            search_queries: vec![
                format!("{symbol} forecast today"),
                format!("{base} news today"),
                format!("{quote} news today"),
                format!("forex economic calendar today {base} {quote}"),
            ],
        }
    }
}

/// Get the profile for a symbol. Unknown symbols get inferred defaults.
pub fn get_profile(symbol: &str) -> PairProfile {
    match symbol {
        "GBPJPY" => PairProfile::known(
            symbol,
            3,
            "2-3 pips",
            "London Kill Zone (08:00-11:00 local)",
            "GBP",
            "JPY",
            "GBPJPY London Kill Zone — Asian range sweep patterns",
            (8, 20),
        ),
        "EURUSD" => PairProfile::known(
            symbol,
            5,
            "0.5-1.5 pips",
            "London & NY overlap",
            "EUR",
            "USD",
            "major EUR pairs",
            (8, 21),
        ),
        "GBPUSD" => PairProfile::known(
            symbol,
            5,
            "1-2 pips",
            "London & NY overlap",
            "GBP",
            "USD",
            "major GBP pairs",
            (8, 21),
        ),
        "XAUUSD" => PairProfile::known(
            symbol,
            2,
            "2-4 pips",
            "London & NY overlap",
            "XAU",
            "USD",
            "gold / precious metals",
            (8, 21),
        ),
        "USDJPY" => PairProfile::known(
            symbol,
            3,
            "1-2 pips",
            "Tokyo & NY overlap",
            "USD",
            "JPY",
            "JPY crosses",
            (2, 17),
        ),
        "EURJPY" => PairProfile::known(
            symbol,
            3,
            "2-3 pips",
            "London & Tokyo overlap",
            "EUR",
            "JPY",
            "JPY crosses",
            (8, 20),
        ),
        _ => infer_profile(symbol),
    }
}

/// Defaults inferred from the symbol name for pairs without a curated entry
fn infer_profile(symbol: &str) -> PairProfile {
    let is_jpy = symbol.ends_with("JPY");
    let is_gold = symbol.starts_with("XAU");

    let (base, quote) = split_currencies(symbol);

    let digits = if is_gold { 2 } else if is_jpy { 3 } else { 5 };
    let typical_spread = if is_gold {
        "2-4 pips"
    } else if is_jpy {
        "2-3 pips"
    } else {
        "1-2 pips"
    };

    PairProfile {
        symbol: symbol.to_string(),
        digits,
        typical_spread: typical_spread.to_string(),
        key_sessions: "London & NY overlap".to_string(),
        base_currency: base.clone(),
        quote_currency: quote.clone(),
        specialization: "forex pairs".to_string(),
        kill_zone_start: 8,
        kill_zone_end: 20,
        search_queries: vec![
            format!("{symbol} forecast today"),
            format!("{base} news today"),
            format!("{quote} news today"),
            format!("forex economic calendar today {base} {quote}"),
        ],
    }
}

/// Split a 6-letter symbol into (base, quote) currency codes
pub fn split_currencies(symbol: &str) -> (String, String) {
    if symbol.len() >= 6 {
        (symbol[..3].to_string(), symbol[3..6].to_string())
    } else {
        (symbol.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pair_profile() {
        let p = get_profile("GBPJPY");
        assert_eq!(p.digits, 3);
        assert_eq!(p.base_currency, "GBP");
        assert_eq!(p.quote_currency, "JPY");
        assert_eq!((p.kill_zone_start, p.kill_zone_end), (8, 20));
        assert!(p.search_queries.iter().any(|q| q.contains("GBPJPY")));
    }

    #[test]
    fn unknown_jpy_cross_inferred() {
        let p = get_profile("CADJPY");
        assert_eq!(p.digits, 3);
        assert_eq!(p.base_currency, "CAD");
        assert_eq!(p.quote_currency, "JPY");
        assert_eq!((p.kill_zone_start, p.kill_zone_end), (8, 20));
    }

    #[test]
    fn unknown_gold_symbol_inferred() {
        let p = get_profile("XAUEUR");
        assert_eq!(p.digits, 2);
        assert_eq!(p.base_currency, "XAU");
    }

    #[test]
    fn unknown_major_inferred() {
        let p = get_profile("AUDUSD");
        assert_eq!(p.digits, 5);
        assert_eq!(p.quote_currency, "USD");
    }
}
