//! Exchange connector seam + an in-memory paper exchange.
//!
//! The engine never talks to a venue directly: it reads top of book,
//! balances and open orders through [`ExchangeConnector`], and every
//! cancel/place goes through the same trait. [`PaperExchange`] backs the
//! binary's simulated run and the tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::feed::ReferenceBook;
use super::messages::FillEvent;
use super::types::{BidAsk, OpenOrder, OrderCandidate, Side, TradingPair};

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Best bid for `Side::Buy`, best ask for `Side::Sell`.
    async fn top_of_book(&self, pair: &TradingPair, side: Side) -> anyhow::Result<Decimal>;

    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;

    async fn available_balance(&self, currency: &str) -> anyhow::Result<Decimal>;

    async fn cancel(&self, pair: &TradingPair, order_id: &str) -> anyhow::Result<()>;

    /// Submit a maker limit order, returning the exchange order id.
    async fn place(&self, candidate: &OrderCandidate) -> anyhow::Result<String>;

    /// Shrink a batch to what the account can afford. With `all_or_none`
    /// the result is either the whole batch or empty.
    async fn budget_adjust(
        &self,
        candidates: Vec<OrderCandidate>,
        all_or_none: bool,
    ) -> anyhow::Result<Vec<OrderCandidate>>;
}

// ─────────────────────────────────────────────────────────
// Paper exchange
// ─────────────────────────────────────────────────────────

/// Connector calls that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperCall {
    TopOfBook,
    OpenOrders,
    Balance,
    Cancel,
    Place,
    BudgetAdjust,
}

#[derive(Debug, Default)]
struct PaperState {
    balances: HashMap<String, Decimal>,
    /// Resting orders in placement order.
    orders: Vec<OpenOrder>,
    books: HashMap<TradingPair, BidAsk>,
    failing: HashSet<PaperCall>,
    canceled: Vec<String>,
}

impl PaperState {
    /// Funds reserved by resting orders: quote for buys, base for sells.
    fn locked(&self, currency: &str) -> Decimal {
        self.orders
            .iter()
            .map(|o| match o.side {
                Side::Buy if o.pair.quote() == currency => o.price * o.amount,
                Side::Sell if o.pair.base() == currency => o.amount,
                _ => Decimal::ZERO,
            })
            .sum()
    }

    fn available(&self, currency: &str) -> Decimal {
        let total = self.balances.get(currency).copied().unwrap_or_default();
        (total - self.locked(currency)).max(Decimal::ZERO)
    }

    fn check(&self, call: PaperCall) -> anyhow::Result<()> {
        if self.failing.contains(&call) {
            bail!("paper exchange: injected {:?} failure", call);
        }
        Ok(())
    }

    fn credit(&mut self, currency: &str, delta: Decimal) {
        *self.balances.entry(currency.to_string()).or_default() += delta;
    }
}

/// What a candidate needs from the account: `(currency, amount)`.
fn requirement(c: &OrderCandidate) -> anyhow::Result<(String, Decimal)> {
    match c.side {
        Side::Buy => {
            let notional = c
                .notional()
                .ok_or_else(|| anyhow!("notional overflow for {} {}", c.side, c.pair))?;
            Ok((c.pair.quote().to_string(), notional))
        }
        Side::Sell => Ok((c.pair.base().to_string(), c.amount)),
    }
}

pub struct PaperExchange {
    name: String,
    state: Mutex<PaperState>,
    fill_tx: Option<mpsc::Sender<FillEvent>>,
}

impl PaperExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PaperState::default()),
            fill_tx: None,
        }
    }

    /// Forward fills from [`PaperExchange::match_resting_orders`] to the engine.
    pub fn with_fill_sender(mut self, tx: mpsc::Sender<FillEvent>) -> Self {
        self.fill_tx = Some(tx);
        self
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_balance(&self, currency: &str, amount: Decimal) {
        self.state().balances.insert(currency.to_string(), amount);
    }

    pub fn balance(&self, currency: &str) -> Decimal {
        self.state().balances.get(currency).copied().unwrap_or_default()
    }

    pub fn set_top_of_book(&self, pair: &TradingPair, bid: Decimal, ask: Decimal) {
        self.state().books.insert(pair.clone(), BidAsk::new(bid, ask));
    }

    pub fn set_failing(&self, call: PaperCall, failing: bool) {
        let mut st = self.state();
        if failing {
            st.failing.insert(call);
        } else {
            st.failing.remove(&call);
        }
    }

    /// Rest an order directly, bypassing balance checks. Returns its id.
    pub fn seed_order(&self, pair: &TradingPair, side: Side, price: Decimal, amount: Decimal) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.state().orders.push(OpenOrder {
            id: id.clone(),
            pair: pair.clone(),
            side,
            price,
            amount,
        });
        id
    }

    pub fn resting(&self) -> Vec<OpenOrder> {
        self.state().orders.clone()
    }

    /// Ids canceled so far, in call order.
    pub fn canceled_ids(&self) -> Vec<String> {
        self.state().canceled.clone()
    }

    /// Copy the reference prices into the simulated order book.
    pub fn mirror_reference(&self, book: &ReferenceBook) {
        let mut st = self.state();
        for (pair, quote) in book {
            if quote.is_valid() {
                st.books.insert(pair.clone(), *quote);
            }
        }
    }

    /// Fill every resting order the book has crossed: buys at or above the
    /// ask, sells at or below the bid. Fills execute at the order price.
    pub fn match_resting_orders(&self) -> Vec<FillEvent> {
        let fills = {
            let mut st = self.state();
            let books = st.books.clone();
            let (crossed, resting): (Vec<OpenOrder>, Vec<OpenOrder>) =
                std::mem::take(&mut st.orders).into_iter().partition(|o| {
                    books.get(&o.pair).is_some_and(|b| match o.side {
                        Side::Buy => b.ask > Decimal::ZERO && o.price >= b.ask,
                        Side::Sell => b.bid > Decimal::ZERO && o.price <= b.bid,
                    })
                });
            st.orders = resting;

            let mut fills = Vec::with_capacity(crossed.len());
            for o in crossed {
                let notional = o.price * o.amount;
                match o.side {
                    Side::Buy => {
                        st.credit(o.pair.quote(), -notional);
                        st.credit(o.pair.base(), o.amount);
                    }
                    Side::Sell => {
                        st.credit(o.pair.base(), -o.amount);
                        st.credit(o.pair.quote(), notional);
                    }
                }
                fills.push(FillEvent {
                    order_id: o.id,
                    pair: o.pair,
                    side: o.side,
                    amount: o.amount,
                    price: o.price,
                });
            }
            fills
        };

        if let Some(tx) = &self.fill_tx {
            for fill in &fills {
                if let Err(e) = tx.try_send(fill.clone()) {
                    warn!("⚠️ Paper fill {} not delivered: {}", fill.order_id, e);
                }
            }
        }
        fills
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn top_of_book(&self, pair: &TradingPair, side: Side) -> anyhow::Result<Decimal> {
        let st = self.state();
        st.check(PaperCall::TopOfBook)?;
        let book = st
            .books
            .get(pair)
            .ok_or_else(|| anyhow!("no order book for {}", pair))?;
        Ok(match side {
            Side::Buy => book.bid,
            Side::Sell => book.ask,
        })
    }

    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>> {
        let st = self.state();
        st.check(PaperCall::OpenOrders)?;
        Ok(st.orders.clone())
    }

    async fn available_balance(&self, currency: &str) -> anyhow::Result<Decimal> {
        let st = self.state();
        st.check(PaperCall::Balance)?;
        Ok(st.available(currency))
    }

    async fn cancel(&self, pair: &TradingPair, order_id: &str) -> anyhow::Result<()> {
        let mut st = self.state();
        st.check(PaperCall::Cancel)?;
        let idx = st
            .orders
            .iter()
            .position(|o| o.id == order_id && &o.pair == pair)
            .ok_or_else(|| anyhow!("unknown order {} on {}", order_id, pair))?;
        st.orders.remove(idx);
        st.canceled.push(order_id.to_string());
        debug!("📝 [PAPER] canceled {} on {}", order_id, pair);
        Ok(())
    }

    async fn place(&self, candidate: &OrderCandidate) -> anyhow::Result<String> {
        let mut st = self.state();
        st.check(PaperCall::Place)?;
        if candidate.price <= Decimal::ZERO || candidate.amount <= Decimal::ZERO {
            bail!(
                "rejected {} {}: price={} amount={}",
                candidate.side,
                candidate.pair,
                candidate.price,
                candidate.amount
            );
        }
        let (currency, needed) = requirement(candidate)?;
        let available = st.available(&currency);
        if needed > available {
            bail!(
                "insufficient {}: need {}, available {}",
                currency,
                needed,
                available
            );
        }

        let id = uuid::Uuid::new_v4().to_string();
        st.orders.push(OpenOrder {
            id: id.clone(),
            pair: candidate.pair.clone(),
            side: candidate.side,
            price: candidate.price,
            amount: candidate.amount,
        });
        info!(
            "📝 [PAPER] {} {} {}@{} id={}",
            candidate.side, candidate.amount, candidate.pair, candidate.price, id
        );
        Ok(id)
    }

    async fn budget_adjust(
        &self,
        candidates: Vec<OrderCandidate>,
        all_or_none: bool,
    ) -> anyhow::Result<Vec<OrderCandidate>> {
        let st = self.state();
        st.check(PaperCall::BudgetAdjust)?;

        let mut committed: HashMap<String, Decimal> = HashMap::new();
        let mut accepted = Vec::with_capacity(candidates.len());
        for c in candidates {
            let (currency, needed) = requirement(&c).context("budget adjust")?;
            let used = committed.entry(currency.clone()).or_default();
            if *used + needed > st.available(&currency) {
                if all_or_none {
                    return Ok(Vec::new());
                }
                break;
            }
            *used += needed;
            accepted.push(c);
        }
        Ok(accepted)
    }
}
