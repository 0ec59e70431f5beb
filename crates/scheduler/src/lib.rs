//! Time-driven transitions: kill-zone expiry, missed-scan alerts,
//! weekly/monthly report dispatch, daily flag resets and screenshot
//! retention. One cooperative task, one wake per minute; the system is
//! not tick-latency-sensitive at this layer.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use trade_core::{get_profile, WatchTrade};
use trade_store::TradeStore;
use watch_registry::WatchRegistry;

#[cfg(test)]
mod tests;

const TICK_SECS: u64 = 60;
const SCREENSHOT_RETENTION_DAYS: i64 = 30;
/// Missed-scan alert window after kill-zone start, in minutes
const MISSED_SCAN_WINDOW_MIN: u32 = 30;

/// Side effects the scheduler dispatches; implemented by the coordinator
/// so the loop itself stays free of messenger and report plumbing.
#[async_trait]
pub trait SchedulerEvents: Send + Sync {
    async fn watch_expired(&self, watch: WatchTrade);
    async fn missed_scan(&self, symbol: String, date: String);
    async fn weekly_report_due(&self);
    async fn monthly_report_due(&self, year: i32, month: u32);
}

struct TickState {
    alerted_today: HashSet<String>,
    alert_date: Option<NaiveDate>,
    weekly_sent: bool,
    monthly_sent: bool,
    retention_swept: Option<NaiveDate>,
}

pub struct Scheduler {
    registry: Arc<WatchRegistry>,
    store: TradeStore,
    events: Arc<dyn SchedulerEvents>,
    pairs: Vec<String>,
    tz: Tz,
    screenshots_dir: PathBuf,
    state: Mutex<TickState>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<WatchRegistry>,
        store: TradeStore,
        events: Arc<dyn SchedulerEvents>,
        pairs: Vec<String>,
        tz: Tz,
        screenshots_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            pairs,
            tz,
            screenshots_dir,
            state: Mutex::new(TickState {
                alerted_today: HashSet::new(),
                alert_date: None,
                weekly_sent: false,
                monthly_sent: false,
                retention_swept: None,
            }),
        }
    }

    /// Run until the shutdown signal flips. The in-flight tick finishes
    /// before the loop returns.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            "Scheduler started ({} pairs, zone {})",
            self.pairs.len(),
            self.tz
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_local = chrono::Utc::now().with_timezone(&self.tz);
                    self.tick(now_local).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Scheduler draining on shutdown");
                        return;
                    }
                }
            }
        }
    }

    /// One wake, evaluated against the desk-local wall clock.
    pub async fn tick(&self, now_local: DateTime<Tz>) {
        let today = now_local.date_naive();
        let hour = now_local.hour();
        let minute = now_local.minute();

        // Daily resets at the first tick of a new local date
        {
            let mut state = self.state.lock().await;
            if state.alert_date != Some(today) {
                state.alerted_today.clear();
                state.alert_date = Some(today);
            }
            if now_local.weekday() != Weekday::Sun {
                state.weekly_sent = false;
            }
            if now_local.day() != 1 {
                state.monthly_sent = false;
            }
        }

        // 1. Kill-zone expiry
        for symbol in &self.pairs {
            if let Some(expired) = self.registry.expire_if_past(symbol, hour).await {
                self.events.watch_expired(expired).await;
            }
        }

        // 2. Missed-scan warnings shortly after kill-zone start
        for symbol in &self.pairs {
            let profile = get_profile(symbol);
            if hour != profile.kill_zone_start || minute >= MISSED_SCAN_WINDOW_MIN {
                continue;
            }

            let already_alerted = {
                let state = self.state.lock().await;
                state.alerted_today.contains(symbol)
            };
            if already_alerted {
                continue;
            }

            let date_tag = today.format("%Y-%m-%d").to_string();
            let scanned_today = match self.store.last_scan(symbol).await {
                Ok(Some(info)) => info.scan_date == date_tag,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!("[{}] last_scan query failed: {}", symbol, e);
                    continue;
                }
            };

            if !scanned_today {
                self.state.lock().await.alerted_today.insert(symbol.clone());
                self.events.missed_scan(symbol.clone(), date_tag).await;
            }
        }

        // 3. Weekly report, Sunday evening
        if now_local.weekday() == Weekday::Sun && hour >= 19 {
            let due = {
                let mut state = self.state.lock().await;
                !std::mem::replace(&mut state.weekly_sent, true)
            };
            if due {
                self.events.weekly_report_due().await;
            }
        }

        // 4. Monthly report for the previous month, 1st at 08:00
        if now_local.day() == 1 && hour >= 8 {
            let due = {
                let mut state = self.state.lock().await;
                !std::mem::replace(&mut state.monthly_sent, true)
            };
            if due {
                let (year, month) = previous_month(today);
                self.events.monthly_report_due(year, month).await;
            }
        }

        // 5. Screenshot retention, once per local day
        let sweep_due = {
            let mut state = self.state.lock().await;
            if state.retention_swept == Some(today) {
                false
            } else {
                state.retention_swept = Some(today);
                true
            }
        };
        if sweep_due {
            self.sweep_screenshots(today).await;
        }
    }

    /// Delete screenshot archive folders older than the retention window.
    /// Folder names start with the capture date: `YYYY-MM-DD_SYMBOL`.
    async fn sweep_screenshots(&self, today: NaiveDate) {
        let cutoff = today - Duration::days(SCREENSHOT_RETENTION_DAYS);
        let Ok(mut entries) = tokio::fs::read_dir(&self.screenshots_dir).await else {
            return;
        };

        let mut removed = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(date_part) = name.get(..10) else { continue };
            let Ok(dir_date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
                continue;
            };
            if dir_date < cutoff {
                if tokio::fs::remove_dir_all(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} screenshot folders older than {} days", removed, SCREENSHOT_RETENTION_DAYS);
        }
    }
}

fn previous_month(today: NaiveDate) -> (i32, u32) {
    if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    }
}
