//! Order executor: the cancel primitive and the budget-checked placement
//! of a proposal batch. Every exchange write goes through here so the
//! audit log lines are uniform.

use std::sync::Arc;

use tracing::{info, warn};

use super::cancellation::CancelDecision;
use super::error::{EngineError, Result};
use super::exchange::ExchangeConnector;
use super::messages::CancelReason;
use super::types::{OpenOrder, OrderCandidate};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Exchange ids of orders that went out.
    pub placed: Vec<String>,
    pub failed: u64,
    /// Candidates dropped by the budget check.
    pub budget_rejected: u64,
    pub external_failures: u64,
}

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeConnector>,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeConnector>) -> Self {
        Self { exchange }
    }

    pub async fn cancel(&self, d: &CancelDecision) -> Result<()> {
        info!(
            pair = %d.pair,
            side = %d.side,
            order_id = %d.order_id,
            order_price = %d.order_price,
            reference = %d.reference,
            threshold = %d.threshold,
            reason = d.reason.as_str(),
            "🗑️ Cancel {} {} {}@{} ({})",
            d.side, d.pair, d.order_id, d.order_price, d.reason.as_str(),
        );
        self.exchange
            .cancel(&d.pair, &d.order_id)
            .await
            .map_err(|e| EngineError::external("cancel", e))
            .inspect_err(|e| warn!("❌ {}", e))
    }

    /// Cancel a resting order outside the phase rules (shutdown cleanup).
    pub async fn cancel_order(&self, order: &OpenOrder, reason: CancelReason) -> Result<()> {
        info!(
            pair = %order.pair,
            side = %order.side,
            order_id = %order.id,
            order_price = %order.price,
            reason = reason.as_str(),
            "🗑️ Cancel {} {} {} ({})",
            order.side, order.pair, order.id, reason.as_str(),
        );
        self.exchange
            .cancel(&order.pair, &order.id)
            .await
            .map_err(|e| EngineError::external("cancel", e))
            .inspect_err(|e| warn!("❌ {}", e))
    }

    /// All-or-none budget check, then place what survived.
    pub async fn place_batch(&self, candidates: Vec<OrderCandidate>) -> BatchResult {
        let mut result = BatchResult::default();
        if candidates.is_empty() {
            return result;
        }
        let requested = candidates.len();

        let adjusted = match self.exchange.budget_adjust(candidates, true).await {
            Ok(a) => a,
            Err(e) => {
                warn!("❌ {}", EngineError::external("budget_adjust", e));
                result.external_failures += 1;
                return result;
            }
        };
        if adjusted.is_empty() {
            info!("💸 Budget check rejected {} candidate(s)", requested);
            result.budget_rejected = requested as u64;
            return result;
        }
        if adjusted.len() != requested {
            warn!(
                "⚠️ Budget check returned {} of {} candidates under all-or-none; dropping batch",
                adjusted.len(),
                requested,
            );
            result.budget_rejected = requested as u64;
            return result;
        }

        for c in &adjusted {
            match self.exchange.place(c).await {
                Ok(id) => {
                    info!(
                        "✅ Order placed: {} {} {}@{} id={}",
                        c.side, c.amount, c.pair, c.price, id
                    );
                    result.placed.push(id);
                }
                Err(e) => {
                    warn!("❌ Failed to place {} {}: {}", c.side, c.pair, EngineError::external("place", e));
                    result.failed += 1;
                }
            }
        }
        result
    }
}
