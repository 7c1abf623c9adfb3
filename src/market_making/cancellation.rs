//! Phase 1 (unprofitable) and Phase 2 (outbid) cancellation rules.
//!
//! Both are pure: they read the cycle snapshots and return the orders to
//! cancel. The coordinator executes them and decides whether later phases run.

use rust_decimal::Decimal;
use tracing::warn;

use super::config::EngineConfig;
use super::error::EngineError;
use super::messages::CancelReason;
use super::snapshot::{OrderSnapshot, PriceSnapshot};
use super::types::{above, below, OpenOrder, Side, TradingPair};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelDecision {
    pub pair: TradingPair,
    pub side: Side,
    pub order_id: String,
    pub order_price: Decimal,
    /// Reference bid/ask (Phase 1) or top of book (Phase 2) the threshold came from.
    pub reference: Decimal,
    pub threshold: Decimal,
    pub reason: CancelReason,
}

#[derive(Debug, Default)]
pub struct CancelPlan {
    pub decisions: Vec<CancelDecision>,
    /// Thresholds that could not be computed.
    pub invalid_price: u64,
}

pub struct CancellationEvaluator<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> CancellationEvaluator<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Buy: cancel when `price > ref_bid * (1 - r)`.
    /// Sell: cancel when `price < ref_ask * (1 + r)`.
    pub fn unprofitable(&self, prices: &PriceSnapshot, orders: &OrderSnapshot) -> CancelPlan {
        let mut plan = CancelPlan::default();
        for pair in &self.cfg.trading_pairs {
            let Some(p) = prices.get(pair) else { continue };

            let buy_threshold = below(p.reference.bid, self.cfg.buy.cancel_unprofitable_ratio);
            self.collect(
                &mut plan,
                pair,
                orders.orders(pair, Side::Buy),
                p.reference.bid,
                buy_threshold,
                CancelReason::Unprofitable,
                |price, t| price > t,
            );

            let sell_threshold = above(p.reference.ask, self.cfg.sell.cancel_unprofitable_ratio);
            self.collect(
                &mut plan,
                pair,
                orders.orders(pair, Side::Sell),
                p.reference.ask,
                sell_threshold,
                CancelReason::Unprofitable,
                |price, t| price < t,
            );
        }
        plan
    }

    /// Buy: cancel when `price < tob_bid * (1 - r)`.
    /// Sell: cancel when `price > tob_ask * (1 + r)`.
    /// A side whose top of book is empty is left alone.
    pub fn outbid(&self, prices: &PriceSnapshot, orders: &OrderSnapshot) -> CancelPlan {
        let mut plan = CancelPlan::default();
        for pair in &self.cfg.trading_pairs {
            let Some(book) = prices.get(pair).and_then(|p| p.book) else { continue };

            if book.bid > Decimal::ZERO {
                let threshold = below(book.bid, self.cfg.buy.cancel_outbid_ratio);
                self.collect(
                    &mut plan,
                    pair,
                    orders.orders(pair, Side::Buy),
                    book.bid,
                    threshold,
                    CancelReason::Outbid,
                    |price, t| price < t,
                );
            }
            if book.ask > Decimal::ZERO {
                let threshold = above(book.ask, self.cfg.sell.cancel_outbid_ratio);
                self.collect(
                    &mut plan,
                    pair,
                    orders.orders(pair, Side::Sell),
                    book.ask,
                    threshold,
                    CancelReason::Outbid,
                    |price, t| price > t,
                );
            }
        }
        plan
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        plan: &mut CancelPlan,
        pair: &TradingPair,
        orders: &[OpenOrder],
        reference: Decimal,
        threshold: Option<Decimal>,
        reason: CancelReason,
        breached: impl Fn(Decimal, Decimal) -> bool,
    ) {
        if orders.is_empty() {
            return;
        }
        let Some(threshold) = threshold else {
            warn!(
                "⚠️ {}",
                EngineError::non_finite(pair, "cancel threshold", None)
            );
            plan.invalid_price += 1;
            return;
        };
        for o in orders.iter().filter(|o| breached(o.price, threshold)) {
            plan.decisions.push(CancelDecision {
                pair: pair.clone(),
                side: o.side,
                order_id: o.id.clone(),
                order_price: o.price,
                reference,
                threshold,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_making::snapshot::PairPrices;
    use crate::market_making::types::BidAsk;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn x() -> TradingPair {
        TradingPair::new("X", "BTC")
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            trading_pairs: vec![x()],
            ..EngineConfig::default()
        }
    }

    fn prices(reference: BidAsk, book: Option<BidAsk>) -> PriceSnapshot {
        let mut m = HashMap::new();
        m.insert(x(), PairPrices { reference, book });
        PriceSnapshot::from_parts(m)
    }

    fn order(id: &str, side: Side, price: Decimal) -> OpenOrder {
        OpenOrder { id: id.into(), pair: x(), side, price, amount: dec!(10) }
    }

    fn orders(list: Vec<OpenOrder>) -> OrderSnapshot {
        OrderSnapshot::from_orders(list, &[x()])
    }

    #[test]
    fn test_unprofitable_buy_above_reference() {
        // threshold = 0.0010 * (1 - 0.0025) = 0.0009975
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).unprofitable(
            &prices(BidAsk::new(dec!(0.0010), dec!(0.0011)), None),
            &orders(vec![order("b1", Side::Buy, dec!(0.00105))]),
        );
        assert_eq!(plan.decisions.len(), 1);
        let d = &plan.decisions[0];
        assert_eq!(d.order_id, "b1");
        assert_eq!(d.threshold, dec!(0.0009975));
        assert_eq!(d.reference, dec!(0.0010));
        assert_eq!(d.reason, CancelReason::Unprofitable);
    }

    #[test]
    fn test_unprofitable_keeps_orders_inside_threshold() {
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).unprofitable(
            &prices(BidAsk::new(dec!(0.0010), dec!(0.0011)), None),
            &orders(vec![
                order("b1", Side::Buy, dec!(0.0009975)),
                order("s1", Side::Sell, dec!(0.0011)),
            ]),
        );
        // sell threshold = 0.0011 * (1 - 0.0005) = 0.00109945; 0.0011 is above it
        assert!(plan.decisions.is_empty());
    }

    #[test]
    fn test_unprofitable_sell_below_reference() {
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).unprofitable(
            &prices(BidAsk::new(dec!(0.0010), dec!(0.0011)), None),
            &orders(vec![order("s1", Side::Sell, dec!(0.00109))]),
        );
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.decisions[0].side, Side::Sell);
        assert_eq!(plan.decisions[0].threshold, dec!(0.00109945));
    }

    #[test]
    fn test_stale_pair_never_evaluated() {
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).unprofitable(
            &PriceSnapshot::default(),
            &orders(vec![order("b1", Side::Buy, dec!(5))]),
        );
        assert!(plan.decisions.is_empty());
    }

    #[test]
    fn test_outbid_buy_below_book() {
        // threshold = 0.0010 * (1 - 0.03) = 0.00097
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).outbid(
            &prices(
                BidAsk::new(dec!(0.0011), dec!(0.0012)),
                Some(BidAsk::new(dec!(0.0010), dec!(0.00102))),
            ),
            &orders(vec![
                order("low", Side::Buy, dec!(0.00096)),
                order("ok", Side::Buy, dec!(0.00098)),
                order("far", Side::Sell, dec!(0.0011)),
            ]),
        );
        let ids: Vec<_> = plan.decisions.iter().map(|d| d.order_id.as_str()).collect();
        // sell threshold = 0.00102 * 1.03 = 0.0010506
        assert_eq!(ids, vec!["low", "far"]);
        assert!(plan.decisions.iter().all(|d| d.reason == CancelReason::Outbid));
    }

    #[test]
    fn test_outbid_skips_empty_book_side() {
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).outbid(
            &prices(
                BidAsk::new(dec!(0.0011), dec!(0.0012)),
                Some(BidAsk::new(dec!(0), dec!(0.00102))),
            ),
            &orders(vec![order("b1", Side::Buy, dec!(0.0000001))]),
        );
        assert!(plan.decisions.is_empty());
    }

    #[test]
    fn test_outbid_needs_book() {
        let c = cfg();
        let plan = CancellationEvaluator::new(&c).outbid(
            &prices(BidAsk::new(dec!(0.0011), dec!(0.0012)), None),
            &orders(vec![order("b1", Side::Buy, dec!(0.0000001))]),
        );
        assert!(plan.decisions.is_empty());
    }
}
