//! JSON extraction from model responses.
//!
//! Responses arrive as fenced code blocks, bare JSON, or JSON buried in
//! prose; the ladder tries each in turn. Individual setups that fail to
//! deserialize are skipped rather than sinking the whole report.

use serde_json::Value;

use trade_core::{AnalysisReport, ConfirmVerdict, ScreenerVerdict, TradeSetup};

/// Extract the first JSON object from a model response.
pub fn extract_json(raw: &str) -> Option<Value> {
    let text = raw.trim();

    // Fenced code block
    if text.contains("```") {
        for part in text.split("```") {
            let mut cleaned = part.trim();
            if let Some(rest) = cleaned.strip_prefix("json") {
                cleaned = rest.trim();
            }
            if cleaned.starts_with('{') {
                if let Ok(value) = serde_json::from_str(cleaned) {
                    return Some(value);
                }
            }
        }
    }

    // Direct parse
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    // Outermost braces in surrounding prose
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        if let Ok(value) = serde_json::from_str(&text[start..=end]) {
            return Some(value);
        }
    }

    None
}

/// Build an `AnalysisReport` from a parsed full-analysis response.
pub fn parse_report(parsed: &Value, symbol: &str, digits: u32, raw: &str) -> AnalysisReport {
    let mut setups: Vec<TradeSetup> = Vec::new();
    if let Some(raw_setups) = parsed.get("setups").and_then(Value::as_array) {
        for raw_setup in raw_setups {
            match serde_json::from_value::<TradeSetup>(raw_setup.clone()) {
                Ok(setup) => setups.push(setup),
                Err(e) => tracing::warn!("[{}] Failed to parse setup: {}", symbol, e),
            }
        }
    }

    AnalysisReport {
        symbol: symbol.to_string(),
        digits,
        setups,
        h1_trend_analysis: str_field(parsed, "h1_trend_analysis"),
        market_summary: str_field(parsed, "market_summary"),
        primary_scenario: str_field(parsed, "primary_scenario"),
        alternative_scenario: str_field(parsed, "alternative_scenario"),
        fundamental_bias: {
            let bias = str_field(parsed, "fundamental_bias");
            if bias.is_empty() {
                "neutral".to_string()
            } else {
                bias
            }
        },
        upcoming_events: parsed
            .get("upcoming_events")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        raw_response: raw.to_string(),
    }
}

pub fn parse_screener(parsed: &Value) -> Option<ScreenerVerdict> {
    let has_setup = parsed.get("has_setup")?.as_bool()?;
    Some(ScreenerVerdict {
        has_setup,
        reasoning: str_field(parsed, "reasoning"),
        h1_trend: str_field(parsed, "h1_trend"),
        market_summary: str_field(parsed, "market_summary"),
    })
}

pub fn parse_confirm(parsed: &Value) -> Option<ConfirmVerdict> {
    let confirmed = parsed.get("confirmed")?.as_bool()?;
    Some(ConfirmVerdict {
        confirmed,
        reasoning: str_field(parsed, "reasoning"),
    })
}

/// Clamp prose to roughly `max_words` words.
pub fn clamp_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.trim().to_string()
    } else {
        words[..max_words].join(" ")
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETUP_JSON: &str = r#"{
        "setups": [{
            "bias": "long",
            "entry_min": 191.2, "entry_max": 191.4,
            "stop_loss": 190.9, "sl_pips": 30.0,
            "tp1": 191.8, "tp1_pips": 20.0,
            "tp2": 192.4, "tp2_pips": 40.0,
            "rr_tp1": 0.7, "rr_tp2": 1.3,
            "confidence": "high",
            "checklist_score": "10/12"
        }],
        "market_summary": "Strong London momentum.",
        "fundamental_bias": "bullish_gbp"
    }"#;

    #[test]
    fn extracts_from_fenced_block() {
        let raw = format!("Here is my analysis:\n```json\n{SETUP_JSON}\n```\nDone.");
        let parsed = extract_json(&raw).unwrap();
        assert_eq!(parsed["fundamental_bias"], "bullish_gbp");
    }

    #[test]
    fn extracts_bare_json() {
        assert!(extract_json(SETUP_JSON).is_some());
    }

    #[test]
    fn extracts_embedded_in_prose() {
        let raw = format!("Sure thing. {SETUP_JSON} Let me know.");
        assert!(extract_json(&raw).is_some());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{ broken: json").is_none());
    }

    #[test]
    fn report_keeps_good_setups_and_drops_bad_ones() {
        let mut parsed = extract_json(SETUP_JSON).unwrap();
        // Second setup is missing required fields
        parsed["setups"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"bias": "short"}));

        let report = parse_report(&parsed, "GBPJPY", 3, "raw");
        assert_eq!(report.setups.len(), 1);
        assert_eq!(report.market_summary, "Strong London momentum.");
        assert_eq!(report.symbol, "GBPJPY");
    }

    #[test]
    fn missing_bias_defaults_neutral() {
        let parsed = extract_json(r#"{"setups": [], "market_summary": "flat"}"#).unwrap();
        let report = parse_report(&parsed, "GBPJPY", 3, "");
        assert_eq!(report.fundamental_bias, "neutral");
    }

    #[test]
    fn screener_requires_boolean_verdict() {
        let good = extract_json(r#"{"has_setup": false, "reasoning": "chop"}"#).unwrap();
        assert!(!parse_screener(&good).unwrap().has_setup);

        let bad = extract_json(r#"{"reasoning": "no verdict"}"#).unwrap();
        assert!(parse_screener(&bad).is_none());
    }

    #[test]
    fn confirm_requires_boolean_verdict() {
        let good = extract_json(r#"{"confirmed": true, "reasoning": "clean rejection"}"#).unwrap();
        assert!(parse_confirm(&good).unwrap().confirmed);
        let bad = extract_json(r#"{"reasoning": "maybe"}"#).unwrap();
        assert!(parse_confirm(&bad).is_none());
    }

    #[test]
    fn clamp_caps_word_count() {
        let long = "word ".repeat(500);
        let clamped = clamp_words(&long, 300);
        assert_eq!(clamped.split_whitespace().count(), 300);
        assert_eq!(clamp_words("short text", 300), "short text");
    }
}
