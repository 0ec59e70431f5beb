use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use trade_core::{TradeSetup, WatchStatus, WatchTrade};
use trade_store::TradeStore;

/// Checklist floor below which a setup may never become a watch or a
/// pending trade, regardless of the auto-queue threshold. The manual
/// execute path enforces the same floor.
pub const MIN_WATCHABLE_CHECKLIST: u32 = 4;

/// Stable reasons surfaced as 404 bodies by the ingress layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("no active watch for symbol")]
    NotFound,

    #[error("watch id mismatch")]
    IdMismatch,

    #[error("watch is not in watching state")]
    NotWatching,

    #[error("confirmation attempts exhausted")]
    AttemptsExhausted,

    #[error("symbol already has an active watch")]
    AlreadyWatching,

    #[error("checklist score below watchable minimum")]
    ChecklistTooLow,
}

/// Result of applying one real confirmation verdict
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub confirmed: bool,
    pub status: WatchStatus,
    pub remaining: u8,
}

/// Owner of all active watches: one `watching` entry per symbol, sole
/// mutator of the state machine. Every transition is persisted; readers
/// get clones.
pub struct WatchRegistry {
    store: TradeStore,
    watches: DashMap<String, WatchTrade>,
    confirm_locks: DashMap<String, Arc<Mutex<()>>>,
    max_confirmations: u8,
}

impl WatchRegistry {
    pub fn new(store: TradeStore, max_confirmations: u8) -> Self {
        Self {
            store,
            watches: DashMap::new(),
            confirm_locks: DashMap::new(),
            max_confirmations,
        }
    }

    /// Build a fresh watch from a qualifying setup. The caller has
    /// already cleared the risk gate and the auto-queue threshold.
    pub async fn create_from_setup(
        &self,
        symbol: &str,
        setup: &TradeSetup,
    ) -> Result<WatchTrade, WatchError> {
        let points = setup.checklist_points().unwrap_or(0);
        if points < MIN_WATCHABLE_CHECKLIST {
            return Err(WatchError::ChecklistTooLow);
        }

        let mut confluence = setup.confluence.clone();
        confluence.truncate(3);

        let watch = WatchTrade {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            symbol: symbol.to_string(),
            bias: setup.bias,
            entry_min: setup.entry_min,
            entry_max: setup.entry_max,
            stop_loss: setup.stop_loss,
            tp1: setup.tp1,
            tp2: setup.tp2,
            sl_pips: setup.sl_pips,
            tp1_pips: setup.tp1_pips,
            tp2_pips: setup.tp2_pips,
            confidence: setup.confidence,
            confluence,
            checklist_score: setup.checklist_score.clone(),
            tp1_close_pct: tp1_close_pct_from_checklist(points),
            created_at: Utc::now(),
            max_confirmations: self.max_confirmations,
            confirmations_used: 0,
            status: WatchStatus::Watching,
        };

        match self.watches.entry(symbol.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing)
                if existing.get().status == WatchStatus::Watching =>
            {
                return Err(WatchError::AlreadyWatching);
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                slot.insert(watch.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(watch.clone());
            }
        }

        self.persist(&watch).await;
        tracing::info!(
            "[{}] Watch {} created: {} {:.3}-{:.3} ({})",
            symbol,
            watch.id,
            watch.bias.as_str(),
            watch.entry_min,
            watch.entry_max,
            watch.checklist_score
        );
        Ok(watch)
    }

    /// Reseed a persisted watch at start-up; bypasses the gate.
    pub fn restore(&self, watch: WatchTrade) {
        tracing::info!("[{}] Watch {} restored from persistence", watch.symbol, watch.id);
        self.watches.insert(watch.symbol.clone(), watch);
    }

    /// Per-symbol lock the ingress holds across a confirmation call, so
    /// exactly one mutator runs per watch at a time.
    pub fn confirm_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.confirm_locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate that a confirmation attempt may proceed. Called before
    /// the model round-trip so an invalid request never spends a call.
    pub fn validate_attempt(&self, id: &str, symbol: &str) -> Result<WatchTrade, WatchError> {
        let watch = self.watches.get(symbol).ok_or(WatchError::NotFound)?;
        if watch.id != id {
            return Err(WatchError::IdMismatch);
        }
        if watch.status != WatchStatus::Watching {
            return Err(WatchError::NotWatching);
        }
        if watch.confirmations_used >= watch.max_confirmations {
            return Err(WatchError::AttemptsExhausted);
        }
        Ok(watch.clone())
    }

    /// Apply a real model verdict. Transient failures never reach this
    /// point; only an actual true/false consumes an attempt.
    pub async fn apply_confirmation(
        &self,
        id: &str,
        symbol: &str,
        confirmed: bool,
    ) -> Result<ConfirmOutcome, WatchError> {
        let updated = {
            let mut entry = self.watches.get_mut(symbol).ok_or(WatchError::NotFound)?;
            let watch = entry.value_mut();
            if watch.id != id {
                return Err(WatchError::IdMismatch);
            }
            if watch.status != WatchStatus::Watching {
                return Err(WatchError::NotWatching);
            }
            if watch.confirmations_used >= watch.max_confirmations {
                return Err(WatchError::AttemptsExhausted);
            }

            if confirmed {
                watch.status = WatchStatus::Confirmed;
            } else {
                watch.confirmations_used += 1;
                if watch.confirmations_used >= watch.max_confirmations {
                    watch.status = WatchStatus::Rejected;
                }
            }
            watch.clone()
        };

        let outcome = ConfirmOutcome {
            confirmed,
            status: updated.status,
            remaining: updated.attempts_remaining(),
        };

        if updated.status.is_terminal() {
            self.remove_terminal(&updated).await;
        } else {
            self.persist(&updated).await;
        }

        tracing::info!(
            "[{}] Watch {} confirmation: {} ({} attempts left, status {})",
            symbol,
            id,
            confirmed,
            outcome.remaining,
            outcome.status.as_str()
        );
        Ok(outcome)
    }

    /// Expire the active watch once the local clock passes the symbol's
    /// kill-zone end. Returns the expired watch for notification.
    pub async fn expire_if_past(&self, symbol: &str, local_hour: u32) -> Option<WatchTrade> {
        let kill_zone_end = trade_core::get_profile(symbol).kill_zone_end;
        if local_hour < kill_zone_end {
            return None;
        }

        let expired = {
            let mut entry = self.watches.get_mut(symbol)?;
            let watch = entry.value_mut();
            if watch.status != WatchStatus::Watching {
                return None;
            }
            watch.status = WatchStatus::Expired;
            watch.clone()
        };

        self.remove_terminal(&expired).await;
        tracing::info!(
            "[{}] Watch {} expired at kill-zone end ({:02}:00)",
            symbol,
            expired.id,
            kill_zone_end
        );
        Some(expired)
    }

    /// Mark a watch rejected out-of-band (dismiss button). No attempt is
    /// consumed; the watch just leaves the board.
    pub async fn dismiss(&self, id: &str, symbol: &str) -> Result<WatchTrade, WatchError> {
        let dismissed = {
            let mut entry = self.watches.get_mut(symbol).ok_or(WatchError::NotFound)?;
            let watch = entry.value_mut();
            if watch.id != id {
                return Err(WatchError::IdMismatch);
            }
            watch.status = WatchStatus::Rejected;
            watch.clone()
        };
        self.remove_terminal(&dismissed).await;
        Ok(dismissed)
    }

    pub fn active(&self, symbol: &str) -> Option<WatchTrade> {
        self.watches
            .get(symbol)
            .filter(|watch| watch.status == WatchStatus::Watching)
            .map(|watch| watch.clone())
    }

    pub fn all_active(&self) -> Vec<WatchTrade> {
        self.watches
            .iter()
            .filter(|entry| entry.status == WatchStatus::Watching)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Persistence failures are logged and tolerated; in-memory state
    /// stays authoritative for this process.
    async fn persist(&self, watch: &WatchTrade) {
        if let Err(e) = self.store.persist_watch(watch).await {
            tracing::warn!("[{}] Failed to persist watch {}: {}", watch.symbol, watch.id, e);
        }
    }

    async fn remove_terminal(&self, watch: &WatchTrade) {
        self.watches
            .remove_if(&watch.symbol, |_, current| current.id == watch.id);
        if let Err(e) = self.store.delete_watch(&watch.id).await {
            tracing::warn!(
                "[{}] Failed to delete persisted watch {}: {}",
                watch.symbol,
                watch.id,
                e
            );
        }
    }
}

/// TP1 close fraction by checklist quality: the stronger the setup, the
/// more of the position rides to TP2.
pub fn tp1_close_pct_from_checklist(points: u32) -> u8 {
    match points {
        10.. => 40,
        8..=9 => 45,
        6..=7 => 55,
        _ => 60,
    }
}
