//! Per-cycle views of prices and open orders. Built once at cycle start
//! and shared read-only by every phase.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::error::{EngineError, Result};
use super::exchange::ExchangeConnector;
use super::feed::PriceFeed;
use super::types::{BidAsk, OpenOrder, Side, TradingPair};

// ─────────────────────────────────────────────────────────
// Prices
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairPrices {
    /// Always positive on both sides.
    pub reference: BidAsk,
    /// `None` when the order book could not be read. A side may be
    /// non-positive when the book is empty on that side.
    pub book: Option<BidAsk>,
}

#[derive(Debug, Default)]
pub struct PriceSnapshot {
    prices: HashMap<TradingPair, PairPrices>,
    stale: Vec<TradingPair>,
    book_failures: u64,
}

impl PriceSnapshot {
    /// Pairs with a stale or missing reference are left out entirely and
    /// their book is never read.
    pub async fn build(
        pairs: &[TradingPair],
        feed: &dyn PriceFeed,
        exchange: &dyn ExchangeConnector,
    ) -> Self {
        let mut snap = Self::default();
        for pair in pairs {
            let reference = match feed.latest_bid_ask(pair) {
                Some(r) if r.is_valid() => r,
                other => {
                    debug!(
                        reference = ?other,
                        "{}",
                        EngineError::StaleOrMissingReference { pair: pair.clone() }
                    );
                    snap.stale.push(pair.clone());
                    continue;
                }
            };

            let book = match read_book(exchange, pair).await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!(%pair, "⚠️ {}", e);
                    snap.book_failures += 1;
                    None
                }
            };
            snap.prices.insert(pair.clone(), PairPrices { reference, book });
        }
        snap
    }

    pub fn from_parts(prices: HashMap<TradingPair, PairPrices>) -> Self {
        Self { prices, ..Default::default() }
    }

    pub fn get(&self, pair: &TradingPair) -> Option<&PairPrices> {
        self.prices.get(pair)
    }

    pub fn stale(&self) -> &[TradingPair] {
        &self.stale
    }

    pub fn book_failures(&self) -> u64 {
        self.book_failures
    }
}

async fn read_book(exchange: &dyn ExchangeConnector, pair: &TradingPair) -> Result<BidAsk> {
    let bid = exchange
        .top_of_book(pair, Side::Buy)
        .await
        .map_err(|e| EngineError::external("top_of_book", e))?;
    let ask = exchange
        .top_of_book(pair, Side::Sell)
        .await
        .map_err(|e| EngineError::external("top_of_book", e))?;
    Ok(BidAsk::new(bid, ask))
}

// ─────────────────────────────────────────────────────────
// Open orders
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SideOrders {
    pub buys: Vec<OpenOrder>,
    pub sells: Vec<OpenOrder>,
}

impl SideOrders {
    pub fn side(&self, side: Side) -> &[OpenOrder] {
        match side {
            Side::Buy => &self.buys,
            Side::Sell => &self.sells,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderSnapshot {
    by_pair: HashMap<TradingPair, SideOrders>,
}

impl OrderSnapshot {
    pub async fn build(exchange: &dyn ExchangeConnector, pairs: &[TradingPair]) -> Result<Self> {
        let orders = exchange
            .open_orders()
            .await
            .map_err(|e| EngineError::external("open_orders", e))?;
        Ok(Self::from_orders(orders, pairs))
    }

    /// Orders on pairs outside `pairs` are ignored.
    pub fn from_orders(orders: Vec<OpenOrder>, pairs: &[TradingPair]) -> Self {
        let mut by_pair: HashMap<TradingPair, SideOrders> =
            pairs.iter().map(|p| (p.clone(), SideOrders::default())).collect();
        for order in orders {
            let Some(slot) = by_pair.get_mut(&order.pair) else {
                debug!(pair = %order.pair, id = %order.id, "ignoring order on unmanaged pair");
                continue;
            };
            match order.side {
                Side::Buy => slot.buys.push(order),
                Side::Sell => slot.sells.push(order),
            }
        }
        Self { by_pair }
    }

    pub fn orders(&self, pair: &TradingPair, side: Side) -> &[OpenOrder] {
        self.by_pair.get(pair).map(|o| o.side(side)).unwrap_or(&[])
    }

    pub fn has_open(&self, pair: &TradingPair, side: Side) -> bool {
        !self.orders(pair, side).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use crate::market_making::exchange::{PaperCall, PaperExchange};
    use crate::market_making::feed::ReferenceBook;
    use rust_decimal_macros::dec;

    struct FixedFeed(ReferenceBook);

    impl PriceFeed for FixedFeed {
        fn latest_bid_ask(&self, pair: &TradingPair) -> Option<BidAsk> {
            self.0.get(pair).copied()
        }
        fn started(&self) -> bool {
            true
        }
        fn start(&mut self) {}
        fn stop(&mut self) {}
    }

    fn x() -> TradingPair {
        TradingPair::new("X", "BTC")
    }

    fn y() -> TradingPair {
        TradingPair::new("Y", "ETH")
    }

    #[tokio::test]
    async fn test_stale_reference_excluded() {
        let mut refs = ReferenceBook::new();
        refs.insert(x(), BidAsk::new(dec!(0.0010), dec!(0.0011)));
        refs.insert(y(), BidAsk::new(dec!(0), dec!(0.05)));
        let ex = PaperExchange::new("paper");
        ex.set_top_of_book(&x(), dec!(0.00098), dec!(0.00112));
        ex.set_top_of_book(&y(), dec!(0.049), dec!(0.051));

        let snap = PriceSnapshot::build(&[x(), y()], &FixedFeed(refs), &ex).await;
        assert!(snap.get(&x()).is_some());
        assert!(snap.get(&y()).is_none());
        assert_eq!(snap.stale(), &[y()]);
        assert_eq!(snap.get(&x()).unwrap().book, Some(BidAsk::new(dec!(0.00098), dec!(0.00112))));
    }

    #[tokio::test]
    async fn test_book_failure_keeps_reference() {
        let mut refs = ReferenceBook::new();
        refs.insert(x(), BidAsk::new(dec!(0.0010), dec!(0.0011)));
        let ex = PaperExchange::new("paper");
        ex.set_failing(PaperCall::TopOfBook, true);

        let snap = PriceSnapshot::build(&[x()], &FixedFeed(refs), &ex).await;
        let p = snap.get(&x()).unwrap();
        assert!(p.book.is_none());
        assert_eq!(snap.book_failures(), 1);
    }

    #[test]
    fn test_orders_partitioned_by_side() {
        let mk = |pair: TradingPair, side: Side, price: Decimal| OpenOrder {
            id: format!("{pair}-{side}-{price}"),
            pair,
            side,
            price,
            amount: dec!(1),
        };
        let snap = OrderSnapshot::from_orders(
            vec![
                mk(x(), Side::Buy, dec!(0.001)),
                mk(x(), Side::Sell, dec!(0.002)),
                mk(x(), Side::Buy, dec!(0.0009)),
                mk(TradingPair::new("Z", "USD"), Side::Buy, dec!(1)),
            ],
            &[x(), y()],
        );
        assert_eq!(snap.orders(&x(), Side::Buy).len(), 2);
        assert_eq!(snap.orders(&x(), Side::Sell).len(), 1);
        assert!(!snap.has_open(&y(), Side::Buy));
        assert!(!snap.has_open(&TradingPair::new("Z", "USD"), Side::Buy));
    }

    #[tokio::test]
    async fn test_order_read_failure_is_error() {
        let ex = PaperExchange::new("paper");
        ex.set_failing(PaperCall::OpenOrders, true);
        let err = OrderSnapshot::build(&ex, &[x()]).await.unwrap_err();
        assert!(matches!(err, EngineError::ExternalCall { action: "open_orders", .. }));
    }
}
