use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

struct MemoryEntry {
    data: Value,
    fetched_at: DateTime<Utc>,
}

/// Two-level cache for external context data: an in-memory map in front
/// of a small SQLite mirror so entries survive restarts.
#[derive(Clone)]
pub struct CacheDb {
    pool: SqlitePool,
    memory: Arc<DashMap<String, MemoryEntry>>,
}

impl CacheDb {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            memory: Arc::new(DashMap::new()),
        };
        db.init().await?;
        Ok(db)
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self {
            pool,
            memory: Arc::new(DashMap::new()),
        };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS context_cache (
                cache_key TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a cached value if it is younger than `max_age_hours`.
    pub async fn get(&self, key: &str, max_age_hours: f64) -> Option<Value> {
        let max_age_secs = (max_age_hours * 3600.0) as i64;

        if let Some(entry) = self.memory.get(key) {
            if (Utc::now() - entry.fetched_at).num_seconds() <= max_age_secs {
                return Some(entry.data.clone());
            }
        }

        let row: (String, String) = sqlx::query_as(
            "SELECT data_json, fetched_at FROM context_cache WHERE cache_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()?;

        let (data_json, fetched_at) = row;
        let fetched = DateTime::parse_from_rfc3339(&fetched_at)
            .ok()?
            .with_timezone(&Utc);
        if (Utc::now() - fetched).num_seconds() > max_age_secs {
            return None;
        }

        let value: Value = serde_json::from_str(&data_json).ok()?;
        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                data: value.clone(),
                fetched_at: fetched,
            },
        );
        Some(value)
    }

    /// Store a value in memory and the persistent mirror. Write failures
    /// are logged and swallowed; a cold cache only costs a re-fetch.
    pub async fn set(&self, key: &str, value: &Value) {
        let now = Utc::now();
        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                data: value.clone(),
                fetched_at: now,
            },
        );

        let result = sqlx::query(
            "INSERT OR REPLACE INTO context_cache (cache_key, data_json, fetched_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::debug!("Cache write error for {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_within_horizon() {
        let cache = CacheDb::open_memory().await.unwrap();
        cache.set("rates_GBP_JPY", &json!({"spread_bps": 465})).await;

        let hit = cache.get("rates_GBP_JPY", 24.0).await.unwrap();
        assert_eq!(hit["spread_bps"], 465);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = CacheDb::open_memory().await.unwrap();
        cache.set("sentiment_GBPJPY", &json!({"pct_long": 62})).await;

        // Age the entry past a 4-hour horizon in both layers
        cache.memory.remove("sentiment_GBPJPY");
        let old = (Utc::now() - chrono::Duration::hours(5)).to_rfc3339();
        sqlx::query("UPDATE context_cache SET fetched_at = ? WHERE cache_key = ?")
            .bind(&old)
            .bind("sentiment_GBPJPY")
            .execute(&cache.pool)
            .await
            .unwrap();

        assert!(cache.get("sentiment_GBPJPY", 4.0).await.is_none());
    }

    #[tokio::test]
    async fn unknown_key_is_a_miss() {
        let cache = CacheDb::open_memory().await.unwrap();
        assert!(cache.get("nope", 24.0).await.is_none());
    }
}
