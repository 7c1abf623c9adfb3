//! Events and counters passed between the engine, the exchange connector
//! and the notification sink.

use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::types::{Side, TradingPair};

// ─────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────

/// Why an order is being canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Order price drifted past the reference fair value (Phase 1).
    Unprofitable,
    /// Order is no longer competitive against the live book (Phase 2).
    Outbid,
    /// Engine shutdown cleanup.
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Unprofitable => "unprofitable",
            CancelReason::Outbid => "outbid",
            CancelReason::Shutdown => "shutdown",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Cycle summary
// ─────────────────────────────────────────────────────────

/// Reasons a pair (or one side of it) got no proposal this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    /// A proposal was already accepted this cycle.
    pub count: u64,
    /// Pair is inside its reorder debounce window.
    pub time: u64,
    /// Target price too far from the top of book.
    pub distance: u64,
    /// Not enough balance for the order.
    pub balance: u64,
    /// Reference bid/ask absent or non-positive.
    pub stale_reference: u64,
    /// Computed boundary price overflowed or went non-positive.
    pub invalid_price: u64,
    /// Top of book could not be read.
    pub book_unavailable: u64,
    /// Buy side on the maintenance exclusion list.
    pub excluded: u64,
    /// No target size configured for the quote currency.
    pub no_target_size: u64,
}

impl AddAssign for SkipCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.count += rhs.count;
        self.time += rhs.time;
        self.distance += rhs.distance;
        self.balance += rhs.balance;
        self.stale_reference += rhs.stale_reference;
        self.invalid_price += rhs.invalid_price;
        self.book_unavailable += rhs.book_unavailable;
        self.excluded += rhs.excluded;
        self.no_target_size += rhs.no_target_size;
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Price feed was not running; it was started and the cycle ended.
    FeedStarting,
    /// Open orders could not be read; no phase ran.
    Aborted(String),
    /// A cancel phase acted, later phases were skipped.
    Blocked(CancelReason),
    /// All three phases ran.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub cancels_unprofitable: u64,
    pub cancels_outbid: u64,
    pub cancel_failures: u64,
    pub proposals: u64,
    pub orders_placed: u64,
    pub place_failures: u64,
    pub budget_rejected: u64,
    pub external_failures: u64,
    pub skips: SkipCounts,
}

impl CycleSummary {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            outcome: CycleOutcome::Completed,
            cancels_unprofitable: 0,
            cancels_outbid: 0,
            cancel_failures: 0,
            proposals: 0,
            orders_placed: 0,
            place_failures: 0,
            budget_rejected: 0,
            external_failures: 0,
            skips: SkipCounts::default(),
        }
    }

    pub fn cancels(&self) -> u64 {
        self.cancels_unprofitable + self.cancels_outbid
    }

    /// Actions sent to the exchange this cycle (cancels + placements).
    pub fn actions(&self) -> u64 {
        self.cancels() + self.orders_placed
    }
}

// ─────────────────────────────────────────────────────────
// Fills + notifications
// ─────────────────────────────────────────────────────────

/// A (partial) fill of one of our orders, reported by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    pub order_id: String,
    pub pair: TradingPair,
    pub side: Side,
    pub amount: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    Fill {
        exchange: String,
        pair: TradingPair,
        side: Side,
        amount: Decimal,
        price: Decimal,
        order_id: String,
        at: DateTime<Utc>,
    },
    CycleSummary {
        exchange: String,
        summary: CycleSummary,
        at: DateTime<Utc>,
    },
}

impl NotifyEvent {
    pub fn fill(exchange: &str, fill: &FillEvent) -> Self {
        NotifyEvent::Fill {
            exchange: exchange.to_string(),
            pair: fill.pair.clone(),
            side: fill.side,
            amount: fill.amount,
            price: fill.price,
            order_id: fill.order_id.clone(),
            at: Utc::now(),
        }
    }

    pub fn cycle_summary(exchange: &str, summary: &CycleSummary) -> Self {
        NotifyEvent::CycleSummary {
            exchange: exchange.to_string(),
            summary: summary.clone(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_skip_counts_accumulate() {
        let mut total = SkipCounts::default();
        total += SkipCounts { time: 2, balance: 1, ..Default::default() };
        total += SkipCounts { time: 1, distance: 3, ..Default::default() };
        assert_eq!(total.time, 3);
        assert_eq!(total.distance, 3);
        assert_eq!(total.balance, 1);
        assert_eq!(total.count, 0);
    }

    #[test]
    fn test_summary_action_totals() {
        let mut s = CycleSummary::new(7);
        s.cancels_unprofitable = 2;
        s.cancels_outbid = 1;
        s.orders_placed = 1;
        assert_eq!(s.cancels(), 3);
        assert_eq!(s.actions(), 4);
    }

    #[test]
    fn test_fill_event_serializes_tagged() {
        let fill = FillEvent {
            order_id: "abc".into(),
            pair: TradingPair::new("X", "BTC"),
            side: Side::Buy,
            amount: dec!(12.5),
            price: dec!(0.00099),
        };
        let json = serde_json::to_value(NotifyEvent::fill("paper", &fill)).unwrap();
        assert_eq!(json["event"], "fill");
        assert_eq!(json["pair"], "X-BTC");
        assert_eq!(json["side"], "buy");
    }

    #[test]
    fn test_blocked_outcome_serializes_reason() {
        let json = serde_json::to_value(CycleOutcome::Blocked(CancelReason::Outbid)).unwrap();
        assert_eq!(json["kind"], "blocked");
        assert_eq!(json["detail"], "outbid");
    }
}
