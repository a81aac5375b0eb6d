//! In-flight deduplication: a bounded TTL set keyed by a structural
//! fingerprint of a placement, or by order id for cancels.
//!
//! Grounded on `polymarket/user_ws.rs`'s `DedupCache` (TTL-keyed
//! `HashMap<String, Instant>` with `remember`/`evict_expired`/
//! `evict_oldest_if_needed`), reused near-verbatim.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateInFlight;

pub struct InFlightDeduper {
    seen_at: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl InFlightDeduper {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        InFlightDeduper {
            seen_at: HashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Builds the placement fingerprint key from :
    /// `marketSlug|assetID|side|priceCents|size|orderType`.
    pub fn placement_key(
        market_slug: &str,
        asset_id: &str,
        side: &str,
        price_cents: i32,
        size: f64,
        order_type: &str,
    ) -> String {
        format!("{market_slug}|{asset_id}|{side}|{price_cents}|{size}|{order_type}")
    }

    pub fn cancel_key(order_id: &str) -> String {
        format!("cancel|{order_id}")
    }

    /// Attempts to acquire a slot for `key`. Returns `Err(DuplicateInFlight)`
    /// if an unexpired entry for the same key already exists.
    pub fn try_acquire(&mut self, key: &str) -> Result<(), DuplicateInFlight> {
        self.evict_expired();
        if let Some(t) = self.seen_at.get(key) {
            if t.elapsed() < self.ttl {
                return Err(DuplicateInFlight);
            }
        }
        self.evict_oldest_if_needed();
        self.seen_at.insert(key.to_string(), Instant::now());
        Ok(())
    }

    /// Releases a previously acquired key (called on placement/cancel
    /// failure so a retry isn't falsely deduped).
    pub fn release(&mut self, key: &str) {
        self.seen_at.remove(key);
    }

    pub fn clear(&mut self) {
        self.seen_at.clear();
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.seen_at.retain(|_, t| t.elapsed() < ttl);
    }

    fn evict_oldest_if_needed(&mut self) {
        if self.seen_at.len() < self.max_entries {
            return;
        }
        if let Some(oldest_key) = self
            .seen_at
            .iter()
            .min_by_key(|(_, t)| **t)
            .map(|(k, _)| k.clone())
        {
            self.seen_at.remove(&oldest_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_is_refused() {
        let mut d = InFlightDeduper::new(Duration::from_secs(5), 100);
        let key = InFlightDeduper::placement_key("m", "a", "BUY", 50, 10.0, "GTC");
        assert!(d.try_acquire(&key).is_ok());
        assert_eq!(d.try_acquire(&key), Err(DuplicateInFlight));
    }

    #[test]
    fn release_allows_immediate_retry() {
        let mut d = InFlightDeduper::new(Duration::from_secs(5), 100);
        let key = InFlightDeduper::placement_key("m", "a", "BUY", 50, 10.0, "GTC");
        d.try_acquire(&key).unwrap();
        d.release(&key);
        assert!(d.try_acquire(&key).is_ok());
    }

    #[test]
    fn expired_entries_are_purged() {
        let mut d = InFlightDeduper::new(Duration::from_millis(10), 100);
        let key = InFlightDeduper::placement_key("m", "a", "BUY", 50, 10.0, "GTC");
        d.try_acquire(&key).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(d.try_acquire(&key).is_ok());
    }

    #[test]
    fn clear_drops_all_entries() {
        let mut d = InFlightDeduper::new(Duration::from_secs(5), 100);
        let key = InFlightDeduper::placement_key("m", "a", "BUY", 50, 10.0, "GTC");
        d.try_acquire(&key).unwrap();
        d.clear();
        assert!(d.try_acquire(&key).is_ok());
    }

    #[test]
    fn bounded_size_evicts_oldest() {
        let mut d = InFlightDeduper::new(Duration::from_secs(5), 2);
        d.try_acquire("a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        d.try_acquire("b").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // third insert should evict "a", the oldest
        d.try_acquire("c").unwrap();
        assert!(d.try_acquire("a").is_ok());
    }
}
