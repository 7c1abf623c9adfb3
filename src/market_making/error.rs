use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{Side, TradingPair};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("reference price stale or missing for {pair}")]
    StaleOrMissingReference { pair: TradingPair },
    #[error("computed {what} for {pair} is not a finite positive price (value: {value})")]
    NonFiniteComputedPrice {
        pair: TradingPair,
        what: &'static str,
        value: String,
    },
    #[error("insufficient {currency} for {side} on {pair}: amount {amount}, allowed {allowed}")]
    InsufficientBalance {
        pair: TradingPair,
        side: Side,
        currency: String,
        amount: Decimal,
        allowed: Decimal,
    },
    #[error("reference feed fetch failed: {0}")]
    FeedFetch(String),
    #[error("reference feed payload malformed: {0}")]
    FeedPayload(String),
    #[error("{action} failed: {detail}")]
    ExternalCall { action: &'static str, detail: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid trading pair '{0}'")]
    InvalidPair(String),
}

impl EngineError {
    /// Wrap a collaborator failure, keeping the full context chain.
    pub fn external(action: &'static str, err: anyhow::Error) -> Self {
        EngineError::ExternalCall {
            action,
            detail: format!("{err:#}"),
        }
    }

    pub fn non_finite(pair: &TradingPair, what: &'static str, value: Option<Decimal>) -> Self {
        EngineError::NonFiniteComputedPrice {
            pair: pair.clone(),
            what,
            value: value.map_or_else(|| "overflow".to_string(), |v| v.to_string()),
        }
    }
}
