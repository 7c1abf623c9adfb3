//! Per-pair action timestamps. Owned by one coordinator, survives across cycles.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::types::TradingPair;

#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    /// Engine creation time; stands in for pairs that never placed an order
    /// so nothing is proposed until the first open-order snapshot settles.
    started_at: Instant,
    last_cancel: HashMap<TradingPair, Instant>,
    last_order: HashMap<TradingPair, Instant>,
}

impl RateLimitTracker {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            last_cancel: HashMap::new(),
            last_order: HashMap::new(),
        }
    }

    pub fn record_cancel(&mut self, pair: &TradingPair, at: Instant) {
        self.last_cancel.insert(pair.clone(), at);
    }

    pub fn record_order(&mut self, pair: &TradingPair, at: Instant) {
        self.last_order.insert(pair.clone(), at);
    }

    pub fn last_cancel(&self, pair: &TradingPair) -> Option<Instant> {
        self.last_cancel.get(pair).copied()
    }

    pub fn last_order(&self, pair: &TradingPair) -> Instant {
        self.last_order.get(pair).copied().unwrap_or(self.started_at)
    }

    /// True while `now < last_order + interval`.
    pub fn order_debounced(&self, pair: &TradingPair, now: Instant, interval: Duration) -> bool {
        match self.last_order(pair).checked_add(interval) {
            Some(ready_at) => now < ready_at,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TradingPair {
        TradingPair::new("X", "BTC")
    }

    #[test]
    fn test_startup_debounce_applies_to_unseen_pairs() {
        let t0 = Instant::now();
        let tracker = RateLimitTracker::new(t0);
        let interval = Duration::from_secs(5);
        assert!(tracker.order_debounced(&pair(), t0 + Duration::from_secs(4), interval));
        assert!(!tracker.order_debounced(&pair(), t0 + Duration::from_secs(5), interval));
    }

    #[test]
    fn test_record_order_restarts_window() {
        let t0 = Instant::now();
        let mut tracker = RateLimitTracker::new(t0);
        let interval = Duration::from_secs(5);
        let placed = t0 + Duration::from_secs(10);
        tracker.record_order(&pair(), placed);
        assert_eq!(tracker.last_order(&pair()), placed);
        assert!(tracker.order_debounced(&pair(), placed + Duration::from_secs(1), interval));
        assert!(!tracker.order_debounced(&pair(), placed + interval, interval));
    }

    #[test]
    fn test_cancel_time_starts_empty() {
        let t0 = Instant::now();
        let mut tracker = RateLimitTracker::new(t0);
        assert!(tracker.last_cancel(&pair()).is_none());
        tracker.record_cancel(&pair(), t0);
        assert_eq!(tracker.last_cancel(&pair()), Some(t0));
        // cancels never gate proposals
        assert!(!tracker.order_debounced(&pair(), t0 + Duration::from_secs(6), Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_interval_never_debounces() {
        let t0 = Instant::now();
        let tracker = RateLimitTracker::new(t0);
        assert!(!tracker.order_debounced(&pair(), t0, Duration::ZERO));
    }
}
