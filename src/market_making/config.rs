//! Engine configuration. Defaults are the tuned strategy constants;
//! `MM_*` environment variables override them at startup.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use url::Url;

use super::error::{EngineError, Result};
use super::types::{Side, TradingPair};

// ─────────────────────────────────────────────────────────
// Ratios
// ─────────────────────────────────────────────────────────

/// Per-side distances, all applied as `price * (1 ± ratio)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideRatios {
    /// Minimum distance from the reference price to place an order.
    /// Keep above `cancel_unprofitable_ratio` to save API activity.
    pub place_ratio: Decimal,
    /// Maximum distance from top of book to place an order.
    /// Keep below `cancel_outbid_ratio` to save API activity.
    pub place_max_distance: Decimal,
    /// Minimum distance from the reference price to keep an order.
    pub cancel_unprofitable_ratio: Decimal,
    /// Maximum distance from top of book to keep an order.
    pub cancel_outbid_ratio: Decimal,
}

impl SideRatios {
    fn default_buy() -> Self {
        Self {
            place_ratio: dec!(0.0050),
            place_max_distance: dec!(0.02),
            cancel_unprofitable_ratio: dec!(0.0025),
            cancel_outbid_ratio: dec!(0.0300),
        }
    }

    fn default_sell() -> Self {
        Self {
            place_ratio: dec!(0.0005),
            place_max_distance: dec!(0.02),
            cancel_unprofitable_ratio: dec!(-0.0005),
            cancel_outbid_ratio: dec!(0.0300),
        }
    }

    fn apply_env(&mut self, prefix: &str, lookup: &impl Fn(&str) -> Option<String>) {
        override_decimal(lookup, &format!("{prefix}_PLACE_RATIO"), &mut self.place_ratio);
        override_decimal(lookup, &format!("{prefix}_PLACE_MAX_DISTANCE"), &mut self.place_max_distance);
        override_decimal(
            lookup,
            &format!("{prefix}_CANCEL_UNPROFITABLE_RATIO"),
            &mut self.cancel_unprofitable_ratio,
        );
        override_decimal(lookup, &format!("{prefix}_CANCEL_OUTBID_RATIO"), &mut self.cancel_outbid_ratio);
    }
}

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Exchange identifier, used in logs and notifications.
    pub exchange: String,
    /// Pairs evaluated each cycle, in evaluation order.
    pub trading_pairs: Vec<TradingPair>,
    pub buy: SideRatios,
    pub sell: SideRatios,
    /// Minimum time between proposals on the same pair.
    pub min_reorder_interval: Duration,
    /// Target order size per quote currency, in quote units.
    pub quote_sizes: BTreeMap<String, Decimal>,
    pub size_multiplier: Decimal,
    /// Pairs whose buy side is paused (e.g. wallet maintenance).
    pub buy_excluded_pairs: HashSet<TradingPair>,
    /// Cycle cadence.
    pub tick_interval: Duration,
    pub cancel_all_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let quote_sizes = [
            ("USD", dec!(5.0)),
            ("USDT", dec!(5.0)),
            ("BTC", dec!(0.000138)),
            ("ETH", dec!(0.00178)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            exchange: "bittrex".to_string(),
            trading_pairs: ["DUSK-BTC", "NXS-BTC", "PIVX-BTC", "SNX-ETH", "OMG-ETH"]
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            buy: SideRatios::default_buy(),
            sell: SideRatios::default_sell(),
            min_reorder_interval: Duration::from_secs(5),
            quote_sizes,
            size_multiplier: dec!(1.10),
            buy_excluded_pairs: HashSet::new(),
            tick_interval: Duration::from_secs(1),
            cancel_all_on_shutdown: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env, map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut c = Self::default();

        if let Some(v) = lookup("MM_EXCHANGE") {
            if !v.trim().is_empty() { c.exchange = v.trim().to_string(); }
        }
        if let Some(v) = lookup("MM_TRADING_PAIRS") {
            c.trading_pairs = parse_pairs(&v)?;
        }
        if let Some(v) = lookup("MM_BUY_EXCLUDED_PAIRS") {
            c.buy_excluded_pairs = parse_pairs(&v)?.into_iter().collect();
        }
        if let Some(v) = lookup("MM_QUOTE_SIZES") {
            c.quote_sizes = parse_amounts(&v)?;
        }

        c.buy.apply_env("MM_BUY", &lookup);
        c.sell.apply_env("MM_SELL", &lookup);
        override_decimal(&lookup, "MM_SIZE_MULTIPLIER", &mut c.size_multiplier);

        if let Some(v) = lookup("MM_MIN_REORDER_INTERVAL_SECS") { if let Ok(s) = v.trim().parse::<u64>() { c.min_reorder_interval = Duration::from_secs(s); } }
        if let Some(v) = lookup("MM_TICK_INTERVAL_MS") { if let Ok(ms) = v.trim().parse::<u64>() { c.tick_interval = Duration::from_millis(ms); } }
        if let Some(v) = lookup("MM_CANCEL_ALL_ON_SHUTDOWN") { c.cancel_all_on_shutdown = v != "0" && v.to_lowercase() != "false"; }

        Ok(c)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading_pairs.is_empty() {
            return Err(EngineError::Config("no trading pairs configured".into()));
        }
        for pair in &self.trading_pairs {
            match self.quote_sizes.get(pair.quote()) {
                Some(size) if *size > Decimal::ZERO => {}
                Some(size) => {
                    return Err(EngineError::Config(format!(
                        "target size for {} must be positive, got {}",
                        pair.quote(),
                        size
                    )))
                }
                None => {
                    return Err(EngineError::Config(format!(
                        "no target size for quote currency {} (pair {})",
                        pair.quote(),
                        pair
                    )))
                }
            }
        }
        if self.size_multiplier <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "size multiplier must be positive, got {}",
                self.size_multiplier
            )));
        }
        for (side, ratios) in [(Side::Buy, &self.buy), (Side::Sell, &self.sell)] {
            if ratios.place_ratio >= Decimal::ONE || ratios.place_max_distance >= Decimal::ONE {
                return Err(EngineError::Config(format!(
                    "{side} place ratios must be below 1 (place={}, max_distance={})",
                    ratios.place_ratio, ratios.place_max_distance
                )));
            }
        }
        if self.tick_interval.is_zero() {
            return Err(EngineError::Config("tick interval must be positive".into()));
        }
        Ok(())
    }

    pub fn target_size(&self, quote: &str) -> Option<Decimal> {
        self.quote_sizes.get(quote).copied()
    }

    pub fn buy_excluded(&self, pair: &TradingPair) -> bool {
        self.buy_excluded_pairs.contains(pair)
    }
}

// ─────────────────────────────────────────────────────────
// Reference feed
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Base URL; the `_`-joined pair list is appended to it.
    pub base_url: String,
    /// Poll interval after a successful fetch.
    pub interval: Duration,
    /// Upper bound on the retry sleep after consecutive failures.
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://api-test-33.nowcaster.io/bid-ask/?markets=".to_string(),
            interval: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("MM_FEED_URL") { if !v.trim().is_empty() { c.base_url = v.trim().to_string(); } }
        if let Ok(v) = std::env::var("MM_FEED_INTERVAL_MS") { if let Ok(ms) = v.parse::<u64>() { c.interval = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("MM_FEED_MAX_BACKOFF_MS") { if let Ok(ms) = v.parse::<u64>() { c.max_backoff = Duration::from_millis(ms); } }
        c
    }

    /// Full request URL for the given pairs.
    pub fn url_for(&self, pairs: &[TradingPair]) -> Result<Url> {
        let joined = pairs
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("_");
        Url::parse(&format!("{}{}", self.base_url, joined))
            .map_err(|e| EngineError::Config(format!("invalid feed url '{}': {}", self.base_url, e)))
    }
}

// ─────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────

fn override_decimal(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Decimal) {
    if let Some(v) = lookup(key) {
        if let Ok(d) = v.trim().parse::<Decimal>() {
            *target = d;
        }
    }
}

/// Comma-separated `BASE-QUOTE` list; duplicates keep their first position.
pub fn parse_pairs(raw: &str) -> Result<Vec<TradingPair>> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let pair: TradingPair = item.parse()?;
        if seen.insert(pair.clone()) {
            pairs.push(pair);
        }
    }
    Ok(pairs)
}

/// Comma-separated `CURRENCY:amount` list.
pub fn parse_amounts(raw: &str) -> Result<BTreeMap<String, Decimal>> {
    let mut out = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (currency, amount) = item
            .split_once(':')
            .ok_or_else(|| EngineError::Config(format!("expected CURRENCY:amount, got '{item}'")))?;
        let amount = amount
            .trim()
            .parse::<Decimal>()
            .map_err(|e| EngineError::Config(format!("bad amount in '{item}': {e}")))?;
        out.insert(currency.trim().to_ascii_uppercase(), amount);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        let c = EngineConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.buy.place_ratio, dec!(0.005));
        assert_eq!(c.sell.cancel_unprofitable_ratio, dec!(-0.0005));
        assert_eq!(c.min_reorder_interval, Duration::from_secs(5));
        assert_eq!(c.target_size("BTC"), Some(dec!(0.000138)));
    }

    #[test]
    fn test_env_overrides() {
        let c = EngineConfig::from_lookup(lookup_from(&[
            ("MM_TRADING_PAIRS", "x-btc, y-eth ,X-BTC"),
            ("MM_BUY_PLACE_RATIO", "0.01"),
            ("MM_SELL_CANCEL_OUTBID_RATIO", "0.05"),
            ("MM_MIN_REORDER_INTERVAL_SECS", "9"),
            ("MM_BUY_EXCLUDED_PAIRS", "IRIS-BTC"),
            ("MM_CANCEL_ALL_ON_SHUTDOWN", "false"),
        ]))
        .unwrap();
        assert_eq!(c.trading_pairs.len(), 2);
        assert_eq!(c.trading_pairs[0].to_string(), "X-BTC");
        assert_eq!(c.buy.place_ratio, dec!(0.01));
        assert_eq!(c.sell.cancel_outbid_ratio, dec!(0.05));
        assert_eq!(c.min_reorder_interval, Duration::from_secs(9));
        assert!(c.buy_excluded(&TradingPair::new("IRIS", "BTC")));
        assert!(!c.cancel_all_on_shutdown);
    }

    #[test]
    fn test_unparsable_scalar_keeps_default() {
        let c = EngineConfig::from_lookup(lookup_from(&[("MM_SIZE_MULTIPLIER", "lots")])).unwrap();
        assert_eq!(c.size_multiplier, dec!(1.10));
    }

    #[test]
    fn test_malformed_pair_list_is_error() {
        let r = EngineConfig::from_lookup(lookup_from(&[("MM_TRADING_PAIRS", "XBTC")]));
        assert!(matches!(r, Err(EngineError::InvalidPair(_))));
    }

    #[test]
    fn test_validate_requires_quote_size() {
        let c = EngineConfig::from_lookup(lookup_from(&[("MM_TRADING_PAIRS", "X-DOGE")])).unwrap();
        assert!(matches!(c.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_place_ratio_of_one() {
        let mut c = EngineConfig::default();
        c.buy.place_ratio = Decimal::ONE;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_parse_amounts() {
        let m = parse_amounts("btc:0.5, ETH:2").unwrap();
        assert_eq!(m["BTC"], dec!(0.5));
        assert_eq!(m["ETH"], dec!(2));
        assert!(parse_amounts("BTC=1").is_err());
    }

    #[test]
    fn test_feed_url_joins_pairs() {
        let feed = FeedConfig {
            base_url: "http://feed.local/bid-ask/?markets=".into(),
            ..Default::default()
        };
        let pairs = parse_pairs("A-BTC,B-ETH").unwrap();
        let url = feed.url_for(&pairs).unwrap();
        assert_eq!(url.as_str(), "http://feed.local/bid-ask/?markets=A-BTC_B-ETH");
    }
}
