use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use super::error::EngineError;

/// Base/quote currency pair, written `BASE-QUOTE` (e.g. `DUSK-BTC`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TradingPair {
    base: String,
    quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl FromStr for TradingPair {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let mut parts = raw.split('-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base.to_ascii_uppercase(), quote.to_ascii_uppercase()))
            }
            _ => Err(EngineError::InvalidPair(raw.to_string())),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl Serialize for TradingPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bid/ask pair. Used both for the reference feed and for top-of-book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidAsk {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl BidAsk {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// Non-positive values mean stale or missing data.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }
}

/// An order resting on the exchange, as read at cycle start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub id: String,
    pub pair: TradingPair,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
}

/// A proposed maker order that has not been submitted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderCandidate {
    pub pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub is_maker: bool,
    pub price: Decimal,
    pub amount: Decimal,
}

impl OrderCandidate {
    pub fn limit_maker(pair: TradingPair, side: Side, price: Decimal, amount: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Limit,
            is_maker: true,
            price,
            amount,
        }
    }

    /// Quote-currency value of the order.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.amount)
    }
}

// ─────────────────────────────────────────────────────────
// Ratio arithmetic
// ─────────────────────────────────────────────────────────

/// `price * (1 - ratio)`, `None` on overflow.
pub fn below(price: Decimal, ratio: Decimal) -> Option<Decimal> {
    Decimal::ONE
        .checked_sub(ratio)
        .and_then(|factor| price.checked_mul(factor))
}

/// `price * (1 + ratio)`, `None` on overflow.
pub fn above(price: Decimal, ratio: Decimal) -> Option<Decimal> {
    Decimal::ONE
        .checked_add(ratio)
        .and_then(|factor| price.checked_mul(factor))
}

pub fn midpoint(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_add(b).and_then(|sum| sum.checked_div(Decimal::TWO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_pair() {
        let pair: TradingPair = "dusk-btc".parse().unwrap();
        assert_eq!(pair.base(), "DUSK");
        assert_eq!(pair.quote(), "BTC");
        assert_eq!(pair.to_string(), "DUSK-BTC");
    }

    #[test]
    fn test_parse_pair_rejects_malformed() {
        assert!("DUSKBTC".parse::<TradingPair>().is_err());
        assert!("A-B-C".parse::<TradingPair>().is_err());
        assert!("-BTC".parse::<TradingPair>().is_err());
    }

    #[test]
    fn test_pair_serializes_as_string() {
        let pair = TradingPair::new("X", "BTC");
        assert_eq!(serde_json::to_string(&pair).unwrap(), "\"X-BTC\"");
    }

    #[test]
    fn test_bid_ask_validity() {
        assert!(BidAsk::new(dec!(0.001), dec!(0.0011)).is_valid());
        assert!(!BidAsk::new(dec!(0), dec!(0.0011)).is_valid());
        assert!(!BidAsk::new(dec!(0.001), dec!(-1)).is_valid());
    }

    #[test]
    fn test_ratio_helpers_are_exact() {
        assert_eq!(below(dec!(0.0010), dec!(0.005)), Some(dec!(0.000995)));
        assert_eq!(above(dec!(0.0011), dec!(0.0005)), Some(dec!(0.00110055)));
        assert_eq!(midpoint(dec!(0.000995), dec!(0.00098)), Some(dec!(0.0009875)));
    }

    #[test]
    fn test_ratio_overflow_is_none() {
        assert_eq!(above(Decimal::MAX, dec!(0.5)), None);
    }
}
