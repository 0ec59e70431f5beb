use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;

use trade_core::{Confidence, Direction, WatchStatus, WatchTrade};

use crate::models::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    bias TEXT NOT NULL,
    confidence TEXT NOT NULL DEFAULT '',
    session TEXT NOT NULL DEFAULT '',

    entry_min REAL NOT NULL DEFAULT 0,
    entry_max REAL NOT NULL DEFAULT 0,
    stop_loss REAL NOT NULL DEFAULT 0,
    tp1 REAL NOT NULL DEFAULT 0,
    tp2 REAL NOT NULL DEFAULT 0,
    sl_pips REAL NOT NULL DEFAULT 0,
    tp1_pips REAL NOT NULL DEFAULT 0,
    tp2_pips REAL NOT NULL DEFAULT 0,
    rr_tp1 REAL NOT NULL DEFAULT 0,
    rr_tp2 REAL NOT NULL DEFAULT 0,

    status TEXT NOT NULL DEFAULT 'queued',
    actual_entry REAL NOT NULL DEFAULT 0,
    ticket_tp1 INTEGER NOT NULL DEFAULT 0,
    ticket_tp2 INTEGER NOT NULL DEFAULT 0,
    lots_tp1 REAL NOT NULL DEFAULT 0,
    lots_tp2 REAL NOT NULL DEFAULT 0,

    tp1_hit INTEGER NOT NULL DEFAULT 0,
    tp2_hit INTEGER NOT NULL DEFAULT 0,
    sl_hit INTEGER NOT NULL DEFAULT 0,
    close_price_tp1 REAL NOT NULL DEFAULT 0,
    close_price_tp2 REAL NOT NULL DEFAULT 0,
    pnl_pips REAL NOT NULL DEFAULT 0,
    pnl_money REAL NOT NULL DEFAULT 0,
    outcome TEXT NOT NULL DEFAULT 'open',

    created_at TEXT,
    executed_at TEXT,
    closed_at TEXT,

    h1_trend TEXT NOT NULL DEFAULT '',
    counter_trend INTEGER NOT NULL DEFAULT 0,
    market_summary TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
CREATE INDEX IF NOT EXISTS idx_trades_created ON trades(created_at);

CREATE TABLE IF NOT EXISTS scan_metadata (
    symbol TEXT PRIMARY KEY,
    last_scan_time TEXT NOT NULL,
    scan_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watch_trades (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    bias TEXT NOT NULL,
    entry_min REAL NOT NULL DEFAULT 0,
    entry_max REAL NOT NULL DEFAULT 0,
    stop_loss REAL NOT NULL DEFAULT 0,
    tp1 REAL NOT NULL DEFAULT 0,
    tp2 REAL NOT NULL DEFAULT 0,
    sl_pips REAL NOT NULL DEFAULT 0,
    tp1_pips REAL NOT NULL DEFAULT 0,
    tp2_pips REAL NOT NULL DEFAULT 0,
    confidence TEXT NOT NULL DEFAULT 'medium',
    confluence_json TEXT NOT NULL DEFAULT '[]',
    checklist_score TEXT NOT NULL DEFAULT '',
    tp1_close_pct INTEGER NOT NULL DEFAULT 50,
    max_confirmations INTEGER NOT NULL DEFAULT 3,
    confirmations_used INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'watching',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS screener_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    has_setup INTEGER NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_trade_reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    review TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Additive migrations; "duplicate column" failures mean the column is
/// already there and are ignored.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE trades ADD COLUMN trend_alignment TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN d1_trend TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN h4_trend TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN entry_status TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN entry_distance_pips REAL NOT NULL DEFAULT 0",
    "ALTER TABLE trades ADD COLUMN negative_factors TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN price_zone TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN checklist_score TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE trades ADD COLUMN tp1_close_pct INTEGER NOT NULL DEFAULT 50",
    "ALTER TABLE trades ADD COLUMN error_message TEXT NOT NULL DEFAULT ''",
];

const TRADE_COLUMNS: &str = "id, symbol, bias, confidence, session, \
     entry_min, entry_max, stop_loss, tp1, tp2, \
     sl_pips, tp1_pips, tp2_pips, rr_tp1, rr_tp2, \
     status, actual_entry, ticket_tp1, ticket_tp2, lots_tp1, lots_tp2, \
     tp1_hit, tp2_hit, sl_hit, close_price_tp1, close_price_tp2, \
     pnl_pips, pnl_money, outcome, created_at, executed_at, closed_at, \
     h1_trend, counter_trend, market_summary, trend_alignment, d1_trend, \
     h4_trend, entry_status, entry_distance_pips, negative_factors, \
     price_zone, checklist_score, tp1_close_pct, error_message";

/// SQLite-backed persistence for trades, watches and scan metadata.
///
/// WAL journal mode; readers run concurrently, writes are serialised by
/// the engine and retried briefly when the database is busy.
#[derive(Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables and apply additive migrations. Idempotent.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;

        for migration in MIGRATIONS {
            if let Err(e) = sqlx::query(migration).execute(&self.pool).await {
                let msg = e.to_string();
                if !msg.contains("duplicate column name") {
                    return Err(e.into());
                }
            }
        }

        tracing::info!("Trade store initialized");
        Ok(())
    }

    // -- Scan metadata -------------------------------------------------------

    pub async fn record_scan_completed(&self, symbol: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR REPLACE INTO scan_metadata (symbol, last_scan_time, scan_date) VALUES (?, ?, ?)",
        )
        .bind(symbol)
        .bind(now.to_rfc3339())
        .bind(now.format("%Y-%m-%d").to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_scan(&self, symbol: &str) -> Result<Option<ScanInfo>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT last_scan_time, scan_date FROM scan_metadata WHERE symbol = ?")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(last_scan_time, scan_date)| ScanInfo {
            last_scan_time,
            scan_date,
        }))
    }

    // -- Watch persistence ---------------------------------------------------

    pub async fn persist_watch(&self, watch: &WatchTrade) -> Result<()> {
        let confluence_json = serde_json::to_string(&watch.confluence)?;
        with_busy_retry(|| {
            sqlx::query(
                "INSERT OR REPLACE INTO watch_trades \
                 (id, symbol, bias, entry_min, entry_max, stop_loss, tp1, tp2, \
                  sl_pips, tp1_pips, tp2_pips, confidence, confluence_json, \
                  checklist_score, tp1_close_pct, max_confirmations, \
                  confirmations_used, status, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&watch.id)
            .bind(&watch.symbol)
            .bind(watch.bias.as_str())
            .bind(watch.entry_min)
            .bind(watch.entry_max)
            .bind(watch.stop_loss)
            .bind(watch.tp1)
            .bind(watch.tp2)
            .bind(watch.sl_pips)
            .bind(watch.tp1_pips)
            .bind(watch.tp2_pips)
            .bind(watch.confidence.as_str())
            .bind(&confluence_json)
            .bind(&watch.checklist_score)
            .bind(watch.tp1_close_pct as i64)
            .bind(watch.max_confirmations as i64)
            .bind(watch.confirmations_used as i64)
            .bind(watch.status.as_str())
            .bind(watch.created_at.to_rfc3339())
            .execute(&self.pool)
        })
        .await?;
        tracing::debug!("[{}] Watch {} persisted ({})", watch.symbol, watch.id, watch.status.as_str());
        Ok(())
    }

    pub async fn delete_watch(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM watch_trades WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_watch_status(&self, id: &str, status: WatchStatus) -> Result<()> {
        sqlx::query("UPDATE watch_trades SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load watches still in `watching`; used only at start-up to reseed
    /// the registry. Rows that fail to decode are skipped with a warning.
    pub async fn load_active_watches(&self) -> Result<Vec<WatchTrade>> {
        let rows: Vec<WatchRow> = sqlx::query_as(
            "SELECT id, symbol, bias, entry_min, entry_max, stop_loss, tp1, tp2, \
             sl_pips, tp1_pips, tp2_pips, confidence, confluence_json, \
             checklist_score, tp1_close_pct, max_confirmations, \
             confirmations_used, status, created_at \
             FROM watch_trades WHERE status = 'watching'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut watches = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode() {
                Ok(watch) => watches.push(watch),
                Err(e) => tracing::warn!("Skipping undecodable persisted watch: {}", e),
            }
        }
        Ok(watches)
    }

    // -- Trade lifecycle -----------------------------------------------------

    /// Insert the queued row. Idempotent on id (`INSERT OR IGNORE`).
    pub async fn log_trade_queued(&self, trade: &QueuedTrade) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        with_busy_retry(|| {
            sqlx::query(
                "INSERT OR IGNORE INTO trades \
                 (id, symbol, bias, confidence, session, \
                  entry_min, entry_max, stop_loss, tp1, tp2, \
                  sl_pips, tp1_pips, tp2_pips, rr_tp1, rr_tp2, \
                  status, created_at, h1_trend, counter_trend, market_summary, \
                  trend_alignment, d1_trend, h4_trend, entry_status, \
                  entry_distance_pips, negative_factors, price_zone, \
                  checklist_score, tp1_close_pct) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                         'queued', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&trade.id)
            .bind(&trade.symbol)
            .bind(&trade.bias)
            .bind(&trade.confidence)
            .bind(&trade.session)
            .bind(trade.entry_min)
            .bind(trade.entry_max)
            .bind(trade.stop_loss)
            .bind(trade.tp1)
            .bind(trade.tp2)
            .bind(trade.sl_pips)
            .bind(trade.tp1_pips)
            .bind(trade.tp2_pips)
            .bind(trade.rr_tp1)
            .bind(trade.rr_tp2)
            .bind(&now)
            .bind(&trade.h1_trend)
            .bind(trade.counter_trend)
            .bind(&trade.market_summary)
            .bind(&trade.trend_alignment)
            .bind(&trade.d1_trend)
            .bind(&trade.h4_trend)
            .bind(&trade.entry_status)
            .bind(trade.entry_distance_pips)
            .bind(&trade.negative_factors)
            .bind(&trade.price_zone)
            .bind(&trade.checklist_score)
            .bind(trade.tp1_close_pct)
            .execute(&self.pool)
        })
        .await?;
        tracing::info!("[{}] Trade {} logged as queued", trade.symbol, trade.id);
        Ok(())
    }

    /// Advance the row when the terminal confirms placement. The
    /// terminal's failure reason is kept on failed executions.
    pub async fn log_trade_executed(
        &self,
        trade_id: &str,
        status: &str,
        actual_entry: f64,
        ticket_tp1: i64,
        ticket_tp2: i64,
        lots_tp1: f64,
        lots_tp2: f64,
        error_message: &str,
    ) -> Result<()> {
        let outcome = match status {
            "executed" | "pending" => "open",
            other => other,
        };
        let now = Utc::now().to_rfc3339();

        with_busy_retry(|| {
            sqlx::query(
                "UPDATE trades SET \
                 status = ?, outcome = ?, actual_entry = ?, \
                 ticket_tp1 = ?, ticket_tp2 = ?, lots_tp1 = ?, lots_tp2 = ?, \
                 executed_at = ?, error_message = ? \
                 WHERE id = ?",
            )
            .bind(status)
            .bind(outcome)
            .bind(actual_entry)
            .bind(ticket_tp1)
            .bind(ticket_tp2)
            .bind(lots_tp1)
            .bind(lots_tp2)
            .bind(&now)
            .bind(error_message)
            .bind(trade_id)
            .execute(&self.pool)
        })
        .await?;
        tracing::info!("Trade {} updated to {}", trade_id, status);
        Ok(())
    }

    /// Apply a close report.
    ///
    /// Monetary P&L accumulates on every report. Pip P&L and the outcome
    /// are derived exactly once, when the report resolves the record:
    /// SL hit, both TPs hit, or cancellation. A late report after
    /// resolution therefore still moves money but never re-transitions.
    pub async fn log_trade_closed(
        &self,
        trade_id: &str,
        _ticket: i64,
        close_price: f64,
        close_reason: &str,
        profit: f64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let query = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?");
        let trade: Option<TradeRecord> = sqlx::query_as(&query)
            .bind(trade_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(trade) = trade else {
            tracing::warn!("Trade {} not found for close update", trade_id);
            return Ok(());
        };

        let already_resolved = trade.is_resolved();

        let mut tp1_hit = trade.tp1_hit;
        let mut tp2_hit = trade.tp2_hit;
        let mut sl_hit = trade.sl_hit;
        let mut close_price_tp1 = trade.close_price_tp1;
        let mut close_price_tp2 = trade.close_price_tp2;

        match close_reason {
            "tp1" => {
                tp1_hit = true;
                close_price_tp1 = close_price;
            }
            "tp2" => {
                tp2_hit = true;
                close_price_tp2 = close_price;
            }
            "sl" => sl_hit = true,
            _ => {}
        }

        let pnl_money = trade.pnl_money + profit;
        let resolved =
            sl_hit || (tp1_hit && tp2_hit) || close_reason == "cancelled";

        let (pnl_pips, outcome, status, closed_at) = if resolved && !already_resolved {
            let (pips, outcome) = if sl_hit && !tp1_hit && !tp2_hit {
                (-trade.sl_pips, "loss")
            } else if tp1_hit && tp2_hit {
                (trade.tp1_pips + trade.tp2_pips, "full_win")
            } else if tp1_hit && sl_hit {
                // Runner stopped at breakeven after TP1 by contract, so
                // the net result is the TP1 leg alone.
                (trade.tp1_pips, "partial_win")
            } else if close_reason == "cancelled" {
                (0.0, "cancelled")
            } else {
                (trade.pnl_pips, "closed")
            };
            (
                pips,
                outcome.to_string(),
                "closed".to_string(),
                Some(Utc::now().to_rfc3339()),
            )
        } else {
            (
                trade.pnl_pips,
                trade.outcome.clone(),
                trade.status.clone(),
                trade.closed_at.clone(),
            )
        };

        sqlx::query(
            "UPDATE trades SET \
             tp1_hit = ?, tp2_hit = ?, sl_hit = ?, \
             close_price_tp1 = ?, close_price_tp2 = ?, \
             pnl_money = ?, pnl_pips = ?, outcome = ?, status = ?, closed_at = ? \
             WHERE id = ?",
        )
        .bind(tp1_hit)
        .bind(tp2_hit)
        .bind(sl_hit)
        .bind(close_price_tp1)
        .bind(close_price_tp2)
        .bind(pnl_money)
        .bind(pnl_pips)
        .bind(&outcome)
        .bind(&status)
        .bind(&closed_at)
        .bind(trade_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Trade {}: {} (profit={:+.2}, outcome={})",
            trade_id,
            close_reason,
            profit,
            outcome
        );
        Ok(())
    }

    /// Force-close `open` records older than the threshold. Handles
    /// terminals that never reported a close (manual close, restart).
    pub async fn cleanup_stale_open_trades(&self, max_age_hours: i64) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::hours(max_age_hours)).to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE trades SET status = 'closed', outcome = 'closed', closed_at = ? \
             WHERE outcome = 'open' AND created_at < ?",
        )
        .bind(&now)
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            tracing::info!(
                "Cleaned up {} stale open trades (older than {}h)",
                result.rows_affected(),
                max_age_hours
            );
        }
        Ok(result.rows_affected())
    }

    /// Force-close every open record, regardless of age. Used by /reset.
    pub async fn force_close_all_open(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE trades SET status = 'closed', outcome = 'closed', closed_at = ? \
             WHERE outcome = 'open'",
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -- Queries -------------------------------------------------------------

    pub async fn get_trade(&self, id: &str) -> Result<Option<TradeRecord>> {
        let query = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?");
        Ok(sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn recent_trades(&self, limit: i64, symbol: Option<&str>) -> Result<Vec<TradeRecord>> {
        let rows = match symbol {
            Some(sym) => {
                let query = format!(
                    "SELECT {TRADE_COLUMNS} FROM trades WHERE symbol = ? \
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query_as(&query)
                    .bind(sym)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query =
                    format!("SELECT {TRADE_COLUMNS} FROM trades ORDER BY created_at DESC LIMIT ?");
                sqlx::query_as(&query).bind(limit).fetch_all(&self.pool).await?
            }
        };
        Ok(rows)
    }

    pub async fn open_trades(&self) -> Result<Vec<TradeRecord>> {
        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE outcome = 'open' AND status IN ('executed', 'pending')"
        );
        Ok(sqlx::query_as(&query).fetch_all(&self.pool).await?)
    }

    pub async fn recent_closed_for_pair(&self, symbol: &str, limit: i64) -> Result<Vec<TradeRecord>> {
        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE symbol = ? AND status = 'closed' \
             ORDER BY closed_at DESC LIMIT ?"
        );
        Ok(sqlx::query_as(&query)
            .bind(symbol)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn monthly_closed(&self, year: i32, month: u32) -> Result<Vec<TradeRecord>> {
        let prefix = format!("{year:04}-{month:02}");
        let query = format!(
            "SELECT {TRADE_COLUMNS} FROM trades \
             WHERE status = 'closed' AND closed_at LIKE ? ORDER BY closed_at"
        );
        Ok(sqlx::query_as(&query)
            .bind(format!("{prefix}%"))
            .fetch_all(&self.pool)
            .await?)
    }

    /// Today's realized P&L, used by the daily-drawdown gate rule.
    pub async fn daily_pnl(&self) -> Result<DailyPnl> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let row: (f64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(pnl_money), 0.0), COUNT(*) \
             FROM trades WHERE closed_at LIKE ? AND status = 'closed'",
        )
        .bind(format!("{today}%"))
        .fetch_one(&self.pool)
        .await?;
        Ok(DailyPnl {
            daily_pnl: row.0,
            closed_trades_today: row.1,
        })
    }

    pub async fn stats(&self, symbol: Option<&str>, days: i64) -> Result<StatsSummary> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let rows: Vec<TradeRecord> = match symbol {
            Some(sym) => {
                let query = format!(
                    "SELECT {TRADE_COLUMNS} FROM trades \
                     WHERE created_at >= ? AND symbol = ? ORDER BY created_at DESC"
                );
                sqlx::query_as(&query)
                    .bind(&cutoff)
                    .bind(sym)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {TRADE_COLUMNS} FROM trades \
                     WHERE created_at >= ? ORDER BY created_at DESC"
                );
                sqlx::query_as(&query).bind(&cutoff).fetch_all(&self.pool).await?
            }
        };

        let mut summary = StatsSummary {
            period_days: days,
            symbol: symbol.unwrap_or("ALL").to_string(),
            total_trades: rows.len() as i64,
            ..Default::default()
        };

        if rows.is_empty() {
            return Ok(summary);
        }

        let closed: Vec<&TradeRecord> = rows.iter().filter(|r| r.status == "closed").collect();
        summary.open_trades = rows.iter().filter(|r| r.outcome == "open").count() as i64;
        summary.failed_trades = rows.iter().filter(|r| r.status == "failed").count() as i64;
        summary.cancelled_trades = rows.iter().filter(|r| r.outcome == "cancelled").count() as i64;
        summary.closed_trades = closed.len() as i64;
        summary.full_wins = closed.iter().filter(|r| r.outcome == "full_win").count() as i64;
        summary.partial_wins = closed.iter().filter(|r| r.outcome == "partial_win").count() as i64;
        summary.wins = summary.full_wins + summary.partial_wins;
        summary.losses = closed.iter().filter(|r| r.outcome == "loss").count() as i64;
        summary.win_rate = percentage(summary.wins, summary.closed_trades);
        summary.total_pnl_pips = closed.iter().map(|r| r.pnl_pips).sum();
        summary.total_pnl_money = closed.iter().map(|r| r.pnl_money).sum();

        let win_pips: Vec<f64> = closed.iter().filter(|r| r.is_win()).map(|r| r.pnl_pips).collect();
        let loss_pips: Vec<f64> = closed
            .iter()
            .filter(|r| r.outcome == "loss")
            .map(|r| r.pnl_pips)
            .collect();
        summary.avg_win_pips = mean(&win_pips);
        summary.avg_loss_pips = mean(&loss_pips);

        for row in &rows {
            let entry = summary.pair_stats.entry(row.symbol.clone()).or_default();
            entry.total += 1;
            if row.status == "closed" {
                entry.closed += 1;
                entry.pnl_pips += row.pnl_pips;
                entry.pnl_money += row.pnl_money;
                if row.is_win() {
                    entry.wins += 1;
                }
            }
        }
        for entry in summary.pair_stats.values_mut() {
            entry.win_rate = percentage(entry.wins, entry.closed);
        }

        summary.confidence_stats = bucket_closed(&closed, |r| Some(r.confidence.clone()));
        summary.session_stats = bucket_closed(&closed, |r| Some(r.session.clone()));

        Ok(summary)
    }

    /// Win-rate buckets over the last 7 days, fed back into the
    /// full-analysis prompt and the weekly summary.
    pub async fn weekly_report(&self, symbol: Option<&str>) -> Result<WeeklyReport> {
        let cutoff = (Utc::now() - Duration::days(7)).to_rfc3339();
        let rows: Vec<TradeRecord> = match symbol {
            Some(sym) => {
                let query = format!(
                    "SELECT {TRADE_COLUMNS} FROM trades \
                     WHERE created_at >= ? AND status = 'closed' AND symbol = ?"
                );
                sqlx::query_as(&query)
                    .bind(&cutoff)
                    .bind(sym)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {TRADE_COLUMNS} FROM trades \
                     WHERE created_at >= ? AND status = 'closed'"
                );
                sqlx::query_as(&query).bind(&cutoff).fetch_all(&self.pool).await?
            }
        };

        let closed: Vec<&TradeRecord> = rows.iter().collect();
        let mut report = WeeklyReport {
            total: closed.len() as i64,
            wins: closed.iter().filter(|r| r.is_win()).count() as i64,
            losses: closed.iter().filter(|r| r.outcome == "loss").count() as i64,
            total_pnl_pips: closed.iter().map(|r| r.pnl_pips).sum(),
            ..Default::default()
        };
        report.win_rate = percentage(report.wins, report.total);

        report.by_checklist = bucket_closed(&closed, |r| checklist_bucket(&r.checklist_score));
        report.by_confidence = bucket_closed(&closed, |r| Some(r.confidence.clone()));
        report.by_entry_status = bucket_closed(&closed, |r| Some(r.entry_status.clone()));
        report.by_trend_alignment =
            bucket_closed(&closed, |r| Some(r.trend_alignment.chars().take(3).collect()));
        report.by_price_zone = bucket_closed(&closed, |r| Some(r.price_zone.clone()));
        report.by_bias = bucket_closed(&closed, |r| Some(r.bias.clone()));

        Ok(report)
    }

    // -- Screener log --------------------------------------------------------

    pub async fn log_screener_decision(
        &self,
        symbol: &str,
        has_setup: bool,
        reasoning: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO screener_log (symbol, has_setup, reasoning, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(has_setup)
        .bind(reasoning)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn screening_stats(&self, days: i64) -> Result<ScreeningStats> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let (total, flagged): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(has_setup), 0) FROM screener_log WHERE created_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(ScreeningStats {
            period_days: days,
            total_screens: total,
            setups_flagged: flagged,
            skipped: total - flagged,
            flag_rate: percentage(flagged, total),
        })
    }

    // -- Post-trade reviews --------------------------------------------------

    pub async fn record_post_trade_review(
        &self,
        trade_id: &str,
        symbol: &str,
        review: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO post_trade_reviews (trade_id, symbol, review, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(trade_id)
        .bind(symbol)
        .bind(review)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_reviews(&self, symbol: &str, limit: i64) -> Result<Vec<PostTradeReview>> {
        Ok(sqlx::query_as(
            "SELECT trade_id, symbol, review, created_at FROM post_trade_reviews \
             WHERE symbol = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn bucket_closed(
    closed: &[&TradeRecord],
    key_fn: impl Fn(&TradeRecord) -> Option<String>,
) -> BTreeMap<String, WinBucket> {
    let mut buckets: BTreeMap<String, WinBucket> = BTreeMap::new();
    for record in closed {
        let Some(key) = key_fn(record) else { continue };
        if key.is_empty() {
            continue;
        }
        let bucket = buckets.entry(key).or_default();
        bucket.total += 1;
        bucket.pnl_pips += record.pnl_pips;
        if record.is_win() {
            bucket.wins += 1;
        }
    }
    for bucket in buckets.values_mut() {
        bucket.win_rate = percentage(bucket.wins, bucket.total);
    }
    buckets
}

fn checklist_bucket(score: &str) -> Option<String> {
    let (k, _) = score.split_once('/')?;
    let points: u32 = k.trim().parse().ok()?;
    Some(match points {
        10.. => "10-12",
        7..=9 => "7-9",
        4..=6 => "4-6",
        _ => "0-3",
    }
    .to_string())
}

/// Raw persisted watch row; decoded into the domain type after load
#[derive(sqlx::FromRow)]
struct WatchRow {
    id: String,
    symbol: String,
    bias: String,
    entry_min: f64,
    entry_max: f64,
    stop_loss: f64,
    tp1: f64,
    tp2: f64,
    sl_pips: f64,
    tp1_pips: f64,
    tp2_pips: f64,
    confidence: String,
    confluence_json: String,
    checklist_score: String,
    tp1_close_pct: i64,
    max_confirmations: i64,
    confirmations_used: i64,
    status: String,
    created_at: String,
}

impl WatchRow {
    fn decode(self) -> Result<WatchTrade> {
        Ok(WatchTrade {
            bias: Direction::parse(&self.bias)?,
            confidence: Confidence::parse(&self.confidence)?,
            confluence: serde_json::from_str(&self.confluence_json)?,
            status: WatchStatus::parse(&self.status)?,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)?
                .with_timezone(&Utc),
            tp1_close_pct: self.tp1_close_pct as u8,
            max_confirmations: self.max_confirmations as u8,
            confirmations_used: self.confirmations_used as u8,
            id: self.id,
            symbol: self.symbol,
            entry_min: self.entry_min,
            entry_max: self.entry_max,
            stop_loss: self.stop_loss,
            tp1: self.tp1,
            tp2: self.tp2,
            sl_pips: self.sl_pips,
            tp1_pips: self.tp1_pips,
            tp2_pips: self.tp2_pips,
            checklist_score: self.checklist_score,
        })
    }
}

/// Retry briefly when SQLite reports the database busy or locked.
async fn with_busy_retry<T, F, Fut>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let msg = e.to_string();
                let busy = msg.contains("database is locked") || msg.contains("database is busy");
                if !busy || attempt >= 3 {
                    return Err(e);
                }
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
            }
        }
    }
}
