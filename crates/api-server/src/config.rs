use chrono_tz::Tz;
use std::path::PathBuf;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for the terminal endpoints; empty disables auth
    pub api_key: String,
    pub model_api_key: Option<String>,
    pub analysis_model: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_daily_drawdown_pct: f64,
    pub max_open_trades: usize,
    pub active_pairs: Vec<String>,
    pub data_dir: PathBuf,
    /// Checklist numerator at or above which setups are auto-watched
    pub auto_queue_min_checklist: u32,
    pub pending_ttl_secs: i64,
    pub max_confirmations: u8,
    pub stale_trade_hours: i64,
    pub news_window_minutes: i64,
    pub api_ninjas_key: Option<String>,
    pub fred_api_key: Option<String>,
    /// Desk-local zone for kill-zone arithmetic
    pub timezone: Tz,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let active_pairs = env_or("ACTIVE_PAIRS", "GBPJPY")
            .split(',')
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();

        let timezone = env_or("DESK_TIMEZONE", "Europe/Berlin")
            .parse()
            .unwrap_or(chrono_tz::Europe::Berlin);

        Self {
            api_key: std::env::var("API_KEY").unwrap_or_default(),
            model_api_key: std::env::var("ANTHROPIC_API_KEY").ok().filter(|v| !v.is_empty()),
            analysis_model: env_or("ANALYSIS_MODEL", "claude-opus-4-20250514"),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000),
            log_level: env_or("LOG_LEVEL", "info"),
            max_daily_drawdown_pct: env_parse("MAX_DAILY_DRAWDOWN_PCT", 3.0),
            max_open_trades: env_parse("MAX_OPEN_TRADES", 2),
            active_pairs,
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            auto_queue_min_checklist: env_parse("AUTO_QUEUE_MIN_CHECKLIST", 7),
            pending_ttl_secs: env_parse("PENDING_TRADE_TTL_SECS", 60),
            max_confirmations: env_parse("MAX_CONFIRMATIONS", 3),
            stale_trade_hours: env_parse("STALE_TRADE_MAX_AGE_HOURS", 24),
            news_window_minutes: env_parse("NEWS_WINDOW_MINUTES", 2),
            api_ninjas_key: std::env::var("API_NINJAS_KEY").ok().filter(|v| !v.is_empty()),
            fred_api_key: std::env::var("FRED_API_KEY").ok().filter(|v| !v.is_empty()),
            timezone,
        }
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_dir.join("screenshots")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}
