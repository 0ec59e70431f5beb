use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use trade_core::PendingTrade;

/// Bounded-lifetime hand-off of approved trades.
///
/// This is a broadcast, not a claim: every terminal polling within the
/// TTL window sees the same entry, and duplicate placement is prevented
/// by the id the terminals remember. After the window the entry is
/// evicted transparently.
pub struct TradeQueue {
    entries: DashMap<String, PendingTrade>,
    ttl: Duration,
}

impl TradeQueue {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Queue an approved trade, stamping `queued_at` and replacing any
    /// previous entry for the symbol.
    pub fn publish(&self, mut trade: PendingTrade) -> PendingTrade {
        trade.queued_at = Utc::now();
        tracing::info!(
            "[{}] Pending trade {} queued for terminals ({}s window)",
            trade.symbol,
            trade.id,
            self.ttl.num_seconds()
        );
        self.entries.insert(trade.symbol.clone(), trade.clone());
        trade
    }

    /// Current entry for the symbol while its window is live.
    pub fn get(&self, symbol: &str) -> Option<PendingTrade> {
        self.get_at(symbol, Utc::now())
    }

    fn get_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<PendingTrade> {
        let expired = match self.entries.get(symbol) {
            Some(entry) => {
                if now - entry.queued_at <= self.ttl {
                    return Some(entry.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries
                .remove_if(symbol, |_, entry| now - entry.queued_at > self.ttl);
            tracing::debug!("[{}] Pending trade expired unconsumed", symbol);
        }
        None
    }

    /// Drop the entry once a terminal reports execution.
    pub fn clear(&self, symbol: &str) {
        self.entries.remove(symbol);
    }

    /// Symbols with a live entry, for the health surface.
    pub fn live_symbols(&self) -> Vec<String> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|entry| now - entry.queued_at <= self.ttl)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trade_core::{Confidence, Direction};

    fn pending(id: &str, symbol: &str) -> PendingTrade {
        PendingTrade {
            id: id.to_string(),
            symbol: symbol.to_string(),
            bias: Direction::Long,
            entry_min: 191.2,
            entry_max: 191.4,
            stop_loss: 190.9,
            tp1: 191.8,
            tp2: 192.4,
            sl_pips: 30.0,
            confidence: Confidence::High,
            tp1_close_pct: 40,
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn same_entry_visible_to_multiple_consumers_within_ttl() {
        let queue = TradeQueue::new(60);
        let published = queue.publish(pending("p1", "GBPJPY"));

        // Two polls 10s apart inside the window see the same id
        let t1 = published.queued_at + Duration::seconds(5);
        let t2 = published.queued_at + Duration::seconds(15);
        assert_eq!(queue.get_at("GBPJPY", t1).unwrap().id, "p1");
        assert_eq!(queue.get_at("GBPJPY", t2).unwrap().id, "p1");
    }

    #[test]
    fn entry_expires_after_ttl_and_is_evicted() {
        let queue = TradeQueue::new(60);
        let published = queue.publish(pending("p1", "GBPJPY"));

        let late = published.queued_at + Duration::seconds(61);
        assert!(queue.get_at("GBPJPY", late).is_none());
        // Evicted, not just hidden
        assert!(queue.get_at("GBPJPY", published.queued_at).is_none());
    }

    #[test]
    fn boundary_poll_at_exact_ttl_still_sees_entry() {
        let queue = TradeQueue::new(60);
        let published = queue.publish(pending("p1", "GBPJPY"));
        let boundary = published.queued_at + Duration::seconds(60);
        assert!(queue.get_at("GBPJPY", boundary).is_some());
    }

    #[test]
    fn publish_replaces_existing_entry_for_symbol() {
        let queue = TradeQueue::new(60);
        queue.publish(pending("p1", "GBPJPY"));
        queue.publish(pending("p2", "GBPJPY"));

        assert_eq!(queue.get("GBPJPY").unwrap().id, "p2");
    }

    #[test]
    fn one_entry_per_symbol_only() {
        let queue = TradeQueue::new(60);
        queue.publish(pending("p1", "GBPJPY"));
        queue.publish(pending("p2", "EURUSD"));

        assert_eq!(queue.get("GBPJPY").unwrap().id, "p1");
        assert_eq!(queue.get("EURUSD").unwrap().id, "p2");
        assert!(queue.get("USDJPY").is_none());
    }

    #[test]
    fn clear_removes_entry() {
        let queue = TradeQueue::new(60);
        queue.publish(pending("p1", "GBPJPY"));
        queue.clear("GBPJPY");
        assert!(queue.get("GBPJPY").is_none());
    }
}
