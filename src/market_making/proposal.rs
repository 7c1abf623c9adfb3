//! Phase 3: new maker orders for one pair.
//!
//! Buy side:
//!   buy_max = ref_bid * (1 - buy.place_ratio)
//!   skip if tob_bid > buy_max * (1 + buy.place_max_distance)
//!   price   = (buy_max + tob_bid) / 2 if tob_bid < buy_max, else buy_max
//!   amount  = target * size_multiplier / price, must stay under 99% of
//!             the quote balance expressed in base units
//!
//! Sell side mirrors it around sell_min = ref_ask * (1 + sell.place_ratio)
//! and offers the whole available base balance.

use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use super::error::EngineError;
use super::exchange::ExchangeConnector;
use super::messages::SkipCounts;
use super::rate_limit::RateLimitTracker;
use super::snapshot::{OrderSnapshot, PairPrices};
use super::types::{above, below, midpoint, OrderCandidate, Side, TradingPair};

/// Share of the quote balance a buy may use.
const BALANCE_SAFETY: Decimal = dec!(0.99);

#[derive(Debug, Default)]
pub struct PairProposal {
    pub candidates: Vec<OrderCandidate>,
    pub skips: SkipCounts,
    pub external_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePlan {
    Place(Decimal),
    TooFar,
}

/// `None` on arithmetic overflow.
pub fn plan_buy(buy_max: Decimal, tob_bid: Decimal, max_distance: Decimal) -> Option<SidePlan> {
    if tob_bid <= Decimal::ZERO {
        // nobody bidding: rest at the boundary
        return Some(SidePlan::Place(buy_max));
    }
    if tob_bid > above(buy_max, max_distance)? {
        return Some(SidePlan::TooFar);
    }
    if tob_bid < buy_max {
        midpoint(buy_max, tob_bid).map(SidePlan::Place)
    } else {
        Some(SidePlan::Place(buy_max))
    }
}

/// `None` on arithmetic overflow.
pub fn plan_sell(sell_min: Decimal, tob_ask: Decimal, max_distance: Decimal) -> Option<SidePlan> {
    if tob_ask <= Decimal::ZERO {
        return Some(SidePlan::Place(sell_min));
    }
    if tob_ask < below(sell_min, max_distance)? {
        return Some(SidePlan::TooFar);
    }
    if tob_ask > sell_min {
        midpoint(sell_min, tob_ask).map(SidePlan::Place)
    } else {
        Some(SidePlan::Place(sell_min))
    }
}

fn positive(v: Option<Decimal>) -> Option<Decimal> {
    v.filter(|d| *d > Decimal::ZERO)
}

pub struct ProposalGenerator<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> ProposalGenerator<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Evaluate one pair with a valid reference price. Accepted candidates
    /// stamp the pair's last order time with `now`.
    pub async fn propose(
        &self,
        pair: &TradingPair,
        prices: &PairPrices,
        orders: &OrderSnapshot,
        exchange: &dyn ExchangeConnector,
        tracker: &mut RateLimitTracker,
        now: Instant,
    ) -> PairProposal {
        let mut out = PairProposal::default();

        if tracker.order_debounced(pair, now, self.cfg.min_reorder_interval) {
            out.skips.time += 1;
            return out;
        }

        let Some(book) = prices.book else {
            out.skips.book_unavailable += 1;
            return out;
        };

        let buy_max = below(prices.reference.bid, self.cfg.buy.place_ratio);
        let sell_min = above(prices.reference.ask, self.cfg.sell.place_ratio);
        let (buy_max, sell_min) = match (positive(buy_max), positive(sell_min)) {
            (Some(b), Some(s)) => (b, s),
            (b, _) => {
                let err = if b.is_none() {
                    EngineError::non_finite(pair, "buy_price_max", buy_max)
                } else {
                    EngineError::non_finite(pair, "sell_price_min", sell_min)
                };
                warn!("⚠️ {}", err);
                out.skips.invalid_price += 1;
                return out;
            }
        };

        let Some(target) = self.cfg.target_size(pair.quote()) else {
            warn!("⚠️ No target size for {}; skipping {}", pair.quote(), pair);
            out.skips.no_target_size += 1;
            return out;
        };

        // ── Buy ──
        if orders.has_open(pair, Side::Buy) {
            debug!(%pair, "buy already resting");
        } else if self.cfg.buy_excluded(pair) {
            out.skips.excluded += 1;
        } else if let Some(c) = self
            .buy_candidate(pair, buy_max, book.bid, target, exchange, &mut out)
            .await
        {
            out.candidates.push(c);
        }

        // ── Sell ──
        if orders.has_open(pair, Side::Sell) {
            debug!(%pair, "sell already resting");
        } else if let Some(c) = self
            .sell_candidate(pair, sell_min, book.ask, target, exchange, &mut out)
            .await
        {
            out.candidates.push(c);
        }

        if !out.candidates.is_empty() {
            tracker.record_order(pair, now);
        }
        out
    }

    async fn buy_candidate(
        &self,
        pair: &TradingPair,
        buy_max: Decimal,
        tob_bid: Decimal,
        target: Decimal,
        exchange: &dyn ExchangeConnector,
        out: &mut PairProposal,
    ) -> Option<OrderCandidate> {
        let price = match plan_buy(buy_max, tob_bid, self.cfg.buy.place_max_distance) {
            Some(SidePlan::Place(p)) => p,
            Some(SidePlan::TooFar) => {
                debug!(%pair, %tob_bid, %buy_max, "buy too far from top of book");
                out.skips.distance += 1;
                return None;
            }
            None => {
                warn!("⚠️ {}", EngineError::non_finite(pair, "buy_price", None));
                out.skips.invalid_price += 1;
                return None;
            }
        };

        let amount = target
            .checked_mul(self.cfg.size_multiplier)
            .and_then(|v| v.checked_div(price));
        let Some(amount) = positive(amount) else {
            warn!("⚠️ {}", EngineError::non_finite(pair, "buy_amount", amount));
            out.skips.invalid_price += 1;
            return None;
        };

        let available = match exchange.available_balance(pair.quote()).await {
            Ok(v) => v,
            Err(e) => {
                warn!("⚠️ {}", EngineError::external("available_balance", e));
                out.external_failures += 1;
                return None;
            }
        };
        let allowed = available
            .checked_div(price)
            .and_then(|base| base.checked_mul(BALANCE_SAFETY))
            .unwrap_or(Decimal::ZERO);
        if amount >= allowed {
            debug!(
                "{}",
                EngineError::InsufficientBalance {
                    pair: pair.clone(),
                    side: Side::Buy,
                    currency: pair.quote().to_string(),
                    amount,
                    allowed,
                }
            );
            out.skips.balance += 1;
            return None;
        }

        info!(
            %pair, side = "BUY", %price, %amount, ref_boundary = %buy_max, %tob_bid,
            "💡 Proposal BUY {} {}@{}", amount, pair, price,
        );
        Some(OrderCandidate::limit_maker(pair.clone(), Side::Buy, price, amount))
    }

    async fn sell_candidate(
        &self,
        pair: &TradingPair,
        sell_min: Decimal,
        tob_ask: Decimal,
        target: Decimal,
        exchange: &dyn ExchangeConnector,
        out: &mut PairProposal,
    ) -> Option<OrderCandidate> {
        let price = match plan_sell(sell_min, tob_ask, self.cfg.sell.place_max_distance) {
            Some(SidePlan::Place(p)) => p,
            Some(SidePlan::TooFar) => {
                debug!(%pair, %tob_ask, %sell_min, "sell too far from top of book");
                out.skips.distance += 1;
                return None;
            }
            None => {
                warn!("⚠️ {}", EngineError::non_finite(pair, "sell_price", None));
                out.skips.invalid_price += 1;
                return None;
            }
        };

        let amount = match exchange.available_balance(pair.base()).await {
            Ok(v) => v,
            Err(e) => {
                warn!("⚠️ {}", EngineError::external("available_balance", e));
                out.external_failures += 1;
                return None;
            }
        };
        if amount < target {
            debug!(
                "{}",
                EngineError::InsufficientBalance {
                    pair: pair.clone(),
                    side: Side::Sell,
                    currency: pair.base().to_string(),
                    amount,
                    allowed: target,
                }
            );
            out.skips.balance += 1;
            return None;
        }

        info!(
            %pair, side = "SELL", %price, %amount, ref_boundary = %sell_min, %tob_ask,
            "💡 Proposal SELL {} {}@{}", amount, pair, price,
        );
        Some(OrderCandidate::limit_maker(pair.clone(), Side::Sell, price, amount))
    }
}
