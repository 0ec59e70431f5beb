use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Europe::Berlin;
use std::sync::Arc;
use tokio::sync::Mutex;

use trade_core::WatchTrade;
use trade_store::TradeStore;
use watch_registry::WatchRegistry;

use crate::{Scheduler, SchedulerEvents};

#[derive(Default)]
struct RecordedEvents {
    expired: Vec<String>,
    missed_scans: Vec<(String, String)>,
    weekly: usize,
    monthly: Vec<(i32, u32)>,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<RecordedEvents>,
}

#[async_trait]
impl SchedulerEvents for Recorder {
    async fn watch_expired(&self, watch: WatchTrade) {
        self.events.lock().await.expired.push(watch.id);
    }
    async fn missed_scan(&self, symbol: String, date: String) {
        self.events.lock().await.missed_scans.push((symbol, date));
    }
    async fn weekly_report_due(&self) {
        self.events.lock().await.weekly += 1;
    }
    async fn monthly_report_due(&self, year: i32, month: u32) {
        self.events.lock().await.monthly.push((year, month));
    }
}

async fn build_scheduler(pairs: Vec<&str>) -> (Arc<Scheduler>, Arc<Recorder>, Arc<WatchRegistry>, TradeStore) {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();
    let registry = Arc::new(WatchRegistry::new(store.clone(), 3));
    let recorder = Arc::new(Recorder::default());
    let tmp = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        store.clone(),
        recorder.clone(),
        pairs.into_iter().map(String::from).collect(),
        Berlin,
        tmp.into_path(),
    ));
    (scheduler, recorder, registry, store)
}

fn setup_json(score: &str) -> trade_core::TradeSetup {
    serde_json::from_value(serde_json::json!({
        "bias": "long",
        "entry_min": 191.2, "entry_max": 191.4,
        "stop_loss": 190.9, "sl_pips": 30.0,
        "tp1": 191.8, "tp1_pips": 20.0,
        "tp2": 192.4, "tp2_pips": 40.0,
        "rr_tp1": 0.7, "rr_tp2": 1.3,
        "confidence": "high",
        "checklist_score": score
    }))
    .unwrap()
}

#[tokio::test]
async fn expiry_fires_once_at_first_tick_past_kill_zone_end() {
    let (scheduler, recorder, registry, _store) = build_scheduler(vec!["GBPJPY"]).await;
    let watch = registry
        .create_from_setup("GBPJPY", &setup_json("10/12"))
        .await
        .unwrap();

    // 19:59 local: still inside the kill zone
    let before = Berlin.with_ymd_and_hms(2026, 8, 3, 19, 59, 0).unwrap();
    scheduler.tick(before).await;
    assert!(recorder.events.lock().await.expired.is_empty());

    // 20:00 local: expired, notification fires
    let at_end = Berlin.with_ymd_and_hms(2026, 8, 3, 20, 0, 30).unwrap();
    scheduler.tick(at_end).await;
    assert_eq!(recorder.events.lock().await.expired, vec![watch.id.clone()]);

    // Next tick finds nothing left to expire
    let after = Berlin.with_ymd_and_hms(2026, 8, 3, 20, 1, 30).unwrap();
    scheduler.tick(after).await;
    assert_eq!(recorder.events.lock().await.expired.len(), 1);
}

#[tokio::test]
async fn missed_scan_alert_fires_once_per_symbol_and_day() {
    let (scheduler, recorder, _registry, store) = build_scheduler(vec!["GBPJPY", "EURUSD"]).await;

    // EURUSD scanned today; GBPJPY was not
    store.record_scan_completed("EURUSD").await.unwrap();
    sqlx::query("UPDATE scan_metadata SET scan_date = ? WHERE symbol = 'EURUSD'")
        .bind("2026-08-03")
        .execute(store.pool())
        .await
        .unwrap();

    // 08:10 local, inside the alert window after kill-zone start
    let morning = Berlin.with_ymd_and_hms(2026, 8, 3, 8, 10, 0).unwrap();
    scheduler.tick(morning).await;
    {
        let events = recorder.events.lock().await;
        assert_eq!(events.missed_scans, vec![("GBPJPY".to_string(), "2026-08-03".to_string())]);
    }

    // Another tick in the window: deduplicated
    let later = Berlin.with_ymd_and_hms(2026, 8, 3, 8, 20, 0).unwrap();
    scheduler.tick(later).await;
    assert_eq!(recorder.events.lock().await.missed_scans.len(), 1);

    // Outside the 30-minute window: nothing new
    let outside = Berlin.with_ymd_and_hms(2026, 8, 3, 8, 45, 0).unwrap();
    scheduler.tick(outside).await;
    assert_eq!(recorder.events.lock().await.missed_scans.len(), 1);

    // Next day the dedup set resets; now neither pair has scanned
    let next_day = Berlin.with_ymd_and_hms(2026, 8, 4, 8, 5, 0).unwrap();
    scheduler.tick(next_day).await;
    let events = recorder.events.lock().await;
    assert_eq!(events.missed_scans.len(), 3);
    assert!(events
        .missed_scans
        .contains(&("GBPJPY".to_string(), "2026-08-04".to_string())));
}

#[tokio::test]
async fn weekly_report_latches_on_sunday_evening() {
    let (scheduler, recorder, _registry, _store) = build_scheduler(vec!["GBPJPY"]).await;

    // Sunday 2026-08-02, 19:01 local
    let sunday = Berlin.with_ymd_and_hms(2026, 8, 2, 19, 1, 0).unwrap();
    scheduler.tick(sunday).await;
    scheduler.tick(sunday + chrono::Duration::minutes(1)).await;
    assert_eq!(recorder.events.lock().await.weekly, 1);

    // Monday clears the latch; next Sunday fires again
    let monday = Berlin.with_ymd_and_hms(2026, 8, 3, 19, 1, 0).unwrap();
    scheduler.tick(monday).await;
    let next_sunday = Berlin.with_ymd_and_hms(2026, 8, 9, 19, 1, 0).unwrap();
    scheduler.tick(next_sunday).await;
    assert_eq!(recorder.events.lock().await.weekly, 2);
}

#[tokio::test]
async fn monthly_report_targets_previous_month() {
    let (scheduler, recorder, _registry, _store) = build_scheduler(vec!["GBPJPY"]).await;

    let first = Berlin.with_ymd_and_hms(2026, 9, 1, 8, 2, 0).unwrap();
    scheduler.tick(first).await;
    scheduler.tick(first + chrono::Duration::minutes(5)).await;
    {
        let events = recorder.events.lock().await;
        assert_eq!(events.monthly, vec![(2026, 8)]);
    }

    // January rolls back to December of the previous year
    let january = Berlin.with_ymd_and_hms(2027, 1, 1, 8, 2, 0).unwrap();
    // A tick on another day resets the latch first
    scheduler.tick(Berlin.with_ymd_and_hms(2026, 9, 2, 8, 2, 0).unwrap()).await;
    scheduler.tick(january).await;
    let events = recorder.events.lock().await;
    assert_eq!(events.monthly.last(), Some(&(2026, 12)));
}

#[tokio::test]
async fn screenshot_retention_removes_only_old_folders() {
    let store = TradeStore::connect_memory().await.unwrap();
    store.init().await.unwrap();
    let registry = Arc::new(WatchRegistry::new(store.clone(), 3));
    let recorder = Arc::new(Recorder::default());

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_path_buf();
    std::fs::create_dir(dir.join("2026-06-01_GBPJPY")).unwrap();
    std::fs::create_dir(dir.join("2026-08-01_GBPJPY")).unwrap();
    std::fs::create_dir(dir.join("not-a-date")).unwrap();

    let scheduler = Scheduler::new(
        registry,
        store,
        recorder,
        vec!["GBPJPY".to_string()],
        Berlin,
        dir.clone(),
    );

    let now = Berlin.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
    scheduler.tick(now).await;

    assert!(!dir.join("2026-06-01_GBPJPY").exists());
    assert!(dir.join("2026-08-01_GBPJPY").exists());
    assert!(dir.join("not-a-date").exists());
}
