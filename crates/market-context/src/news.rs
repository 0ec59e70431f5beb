//! High-impact news calendar.
//!
//! Funded-account rules forbid opening positions within a couple of
//! minutes of a high-impact release for either leg of the pair; the gate
//! consults this module before queueing anything. A fetch failure leaves
//! the calendar empty, which fails open on that rule.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::Value;

use trade_core::get_profile;

use crate::CacheDb;

const CALENDAR_URL: &str = "https://nfs.faireconomy.media/ff_calendar_thisweek.json";
const CALENDAR_CACHE_HOURS: f64 = 1.0;

/// One high-impact calendar entry
#[derive(Debug, Clone)]
pub struct NewsEvent {
    pub title: String,
    pub currency: String,
    pub time: DateTime<Utc>,
    pub forecast: String,
}

/// Verdict for the news-window gate rule
#[derive(Debug, Clone, Default)]
pub struct NewsRestriction {
    pub blocked: bool,
    pub warning: bool,
    pub message: String,
    pub event_title: String,
    pub event_currency: String,
}

#[derive(Clone)]
pub struct NewsCalendar {
    client: Client,
    cache: CacheDb,
    /// Half-width of the blocking window around each event, in minutes
    window_minutes: i64,
}

impl NewsCalendar {
    pub fn new(cache: CacheDb, window_minutes: i64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            cache,
            window_minutes,
        }
    }

    async fn high_impact_events(&self) -> Vec<NewsEvent> {
        let cache_key = "news_calendar_week";
        let raw = match self.cache.get(cache_key, CALENDAR_CACHE_HOURS).await {
            Some(cached) => cached,
            None => {
                let fetched = match self.fetch_calendar().await {
                    Some(value) => value,
                    None => return Vec::new(),
                };
                self.cache.set(cache_key, &fetched).await;
                fetched
            }
        };

        let Some(entries) = raw.as_array() else {
            return Vec::new();
        };

        entries
            .iter()
            .filter(|entry| {
                entry
                    .get("impact")
                    .and_then(Value::as_str)
                    .map(|impact| impact.eq_ignore_ascii_case("high"))
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let time = entry
                    .get("date")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
                    .with_timezone(&Utc);
                Some(NewsEvent {
                    title: entry.get("title").and_then(Value::as_str).unwrap_or("").to_string(),
                    currency: entry
                        .get("country")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_uppercase(),
                    time,
                    forecast: entry
                        .get("forecast")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                })
            })
            .collect()
    }

    async fn fetch_calendar(&self) -> Option<Value> {
        match self.client.get(CALENDAR_URL).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                tracing::warn!("News calendar fetch returned {}", resp.status());
                None
            }
            Err(e) => {
                tracing::warn!("News calendar fetch failed: {}", e);
                None
            }
        }
    }

    /// Check whether `symbol` is inside a blocking window right now.
    pub async fn restriction(&self, symbol: &str) -> NewsRestriction {
        let profile = get_profile(symbol);
        let events = self.high_impact_events().await;
        evaluate_restriction(
            &events,
            &profile.base_currency,
            &profile.quote_currency,
            Utc::now(),
            self.window_minutes,
        )
    }

    /// High-impact events for the given symbols within `hours_ahead`.
    pub async fn upcoming(&self, symbols: &[String], hours_ahead: i64) -> Vec<NewsEvent> {
        let currencies: Vec<String> = symbols
            .iter()
            .flat_map(|symbol| {
                let profile = get_profile(symbol);
                [profile.base_currency, profile.quote_currency]
            })
            .collect();

        let now = Utc::now();
        let horizon = now + Duration::hours(hours_ahead);
        let mut events: Vec<NewsEvent> = self
            .high_impact_events()
            .await
            .into_iter()
            .filter(|event| currencies.contains(&event.currency))
            .filter(|event| event.time >= now && event.time <= horizon)
            .collect();
        events.sort_by_key(|event| event.time);
        events
    }
}

/// Pure window check, separated from fetching for tests.
fn evaluate_restriction(
    events: &[NewsEvent],
    base: &str,
    quote: &str,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> NewsRestriction {
    let warn_horizon = Duration::minutes(30);

    for event in events {
        if event.currency != base && event.currency != quote {
            continue;
        }
        let distance = event.time - now;
        let abs_minutes = distance.num_seconds().abs() as f64 / 60.0;

        if abs_minutes <= window_minutes as f64 {
            return NewsRestriction {
                blocked: true,
                warning: false,
                message: format!(
                    "High-impact {} event within the restricted window ({}m either side)",
                    event.currency, window_minutes
                ),
                event_title: event.title.clone(),
                event_currency: event.currency.clone(),
            };
        }

        if distance > Duration::zero() && distance <= warn_horizon {
            return NewsRestriction {
                blocked: false,
                warning: true,
                message: format!(
                    "{}: {} in {} min",
                    event.currency,
                    event.title,
                    distance.num_minutes()
                ),
                event_title: event.title.clone(),
                event_currency: event.currency.clone(),
            };
        }
    }

    NewsRestriction::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(currency: &str, offset_minutes: i64) -> NewsEvent {
        NewsEvent {
            title: "Rate Decision".to_string(),
            currency: currency.to_string(),
            time: Utc::now() + Duration::minutes(offset_minutes),
            forecast: String::new(),
        }
    }

    #[test]
    fn blocks_inside_window_either_side() {
        let now = Utc::now();
        for offset in [-1, 0, 1] {
            let verdict = evaluate_restriction(&[event("GBP", offset)], "GBP", "JPY", now, 2);
            assert!(verdict.blocked, "offset {offset} should block");
        }
    }

    #[test]
    fn warns_before_but_outside_window() {
        let verdict = evaluate_restriction(&[event("JPY", 20)], "GBP", "JPY", Utc::now(), 2);
        assert!(!verdict.blocked);
        assert!(verdict.warning);
        assert!(verdict.message.contains("JPY"));
    }

    #[test]
    fn unrelated_currency_is_clear() {
        let verdict = evaluate_restriction(&[event("USD", 0)], "GBP", "JPY", Utc::now(), 2);
        assert!(!verdict.blocked);
        assert!(!verdict.warning);
    }

    #[test]
    fn empty_calendar_fails_open() {
        let verdict = evaluate_restriction(&[], "GBP", "JPY", Utc::now(), 2);
        assert!(!verdict.blocked);
    }
}
