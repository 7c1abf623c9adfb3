//! Cycle Coordinator: one reconciliation pass per tick.
//!
//! Phases run in strict priority order and any phase that acts ends the cycle:
//!
//! 1. **Cancel unprofitable**: orders past the reference fair value.
//! 2. **Cancel outbid**: orders no longer competitive against the book.
//! 3. **Propose**: at most one pair gets new orders per cycle, across all pairs.
//!
//! Everything a cycle looks at (reference prices, top of book, open orders)
//! is read once at cycle start. Faults on one pair never stop the others;
//! only shutdown ends the run loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cancellation::{CancelDecision, CancellationEvaluator};
use super::config::EngineConfig;
use super::exchange::ExchangeConnector;
use super::executor::OrderExecutor;
use super::feed::PriceFeed;
use super::messages::*;
use super::notify::NotificationSink;
use super::proposal::ProposalGenerator;
use super::rate_limit::RateLimitTracker;
use super::snapshot::{OrderSnapshot, PriceSnapshot};

// ─────────────────────────────────────────────────────────
// Phase state machine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    CancelUnprofitable,
    CancelOutbid,
    Propose,
    /// A cancel phase acted; nothing after it runs this cycle.
    Blocked(CancelReason),
    Done,
}

impl CyclePhase {
    /// Next phase given how many actions the current one took.
    pub fn advance(self, actions: u64) -> Self {
        match self {
            CyclePhase::CancelUnprofitable if actions > 0 => CyclePhase::Blocked(CancelReason::Unprofitable),
            CyclePhase::CancelUnprofitable => CyclePhase::CancelOutbid,
            CyclePhase::CancelOutbid if actions > 0 => CyclePhase::Blocked(CancelReason::Outbid),
            CyclePhase::CancelOutbid => CyclePhase::Propose,
            CyclePhase::Propose => CyclePhase::Done,
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CyclePhase::Blocked(_) | CyclePhase::Done)
    }
}

// ─────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Stats {
    cycles: u64,
    blocked_unprofitable: u64,
    blocked_outbid: u64,
    aborted: u64,
    cancel_unprofitable: u64,
    cancel_outbid: u64,
    cancel_failed: u64,
    placed: u64,
    place_failed: u64,
    budget_rejected: u64,
    fills: u64,
    skips: SkipCounts,
}

impl Stats {
    fn absorb(&mut self, s: &CycleSummary) {
        self.cycles += 1;
        match s.outcome {
            CycleOutcome::Blocked(CancelReason::Unprofitable) => self.blocked_unprofitable += 1,
            CycleOutcome::Blocked(CancelReason::Outbid) => self.blocked_outbid += 1,
            CycleOutcome::Aborted(_) => self.aborted += 1,
            _ => {}
        }
        self.cancel_unprofitable += s.cancels_unprofitable;
        self.cancel_outbid += s.cancels_outbid;
        self.cancel_failed += s.cancel_failures;
        self.placed += s.orders_placed;
        self.place_failed += s.place_failures;
        self.budget_rejected += s.budget_rejected;
        self.skips += s.skips;
    }
}

// ─────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────

pub struct CycleCoordinator {
    cfg: EngineConfig,
    feed: Box<dyn PriceFeed>,
    exchange: Arc<dyn ExchangeConnector>,
    executor: OrderExecutor,
    notifier: Arc<dyn NotificationSink>,
    tracker: RateLimitTracker,
    cycle: u64,
    stats: Stats,
}

impl CycleCoordinator {
    pub fn new(
        cfg: EngineConfig,
        feed: Box<dyn PriceFeed>,
        exchange: Arc<dyn ExchangeConnector>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            cfg,
            feed,
            executor: OrderExecutor::new(exchange.clone()),
            exchange,
            notifier,
            tracker: RateLimitTracker::new(Instant::now()),
            cycle: 0,
            stats: Stats::default(),
        }
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    pub async fn run(mut self, mut fill_rx: mpsc::Receiver<FillEvent>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "🎯 Coordinator [{}] pairs={} tick={}ms reorder={}s buy(place={} dist={} unprof={} outbid={}) sell(place={} dist={} unprof={} outbid={})",
            self.exchange.name(),
            self.cfg.trading_pairs.len(),
            self.cfg.tick_interval.as_millis(),
            self.cfg.min_reorder_interval.as_secs(),
            self.cfg.buy.place_ratio, self.cfg.buy.place_max_distance,
            self.cfg.buy.cancel_unprofitable_ratio, self.cfg.buy.cancel_outbid_ratio,
            self.cfg.sell.place_ratio, self.cfg.sell.place_max_distance,
            self.cfg.sell.cancel_unprofitable_ratio, self.cfg.sell.cancel_outbid_ratio,
        );

        let mut tick = interval(self.cfg.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fills_open = true;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_cycle().await;
                }
                fill = fill_rx.recv(), if fills_open => {
                    match fill {
                        Some(f) => self.on_fill(&f).await,
                        None => fills_open = false,
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("🛑 Coordinator shutting down");
        self.feed.stop();
        if self.cfg.cancel_all_on_shutdown {
            self.cancel_all_orders().await;
        }
        let s = &self.stats;
        info!(
            "🎯 Shutdown | cycles={} blocked(unprof={} outbid={}) aborted={} cancel(unprof={} outbid={} failed={}) placed={} place_failed={} budget_rejected={} fills={} skip(count={} time={} distance={} balance={} stale={} invalid={} book={} excluded={} no_target={})",
            s.cycles, s.blocked_unprofitable, s.blocked_outbid, s.aborted,
            s.cancel_unprofitable, s.cancel_outbid, s.cancel_failed,
            s.placed, s.place_failed, s.budget_rejected, s.fills,
            s.skips.count, s.skips.time, s.skips.distance, s.skips.balance,
            s.skips.stale_reference, s.skips.invalid_price, s.skips.book_unavailable, s.skips.excluded, s.skips.no_target_size,
        );
    }

    // ═════════════════════════════════════════════════
    // Cycle
    // ═════════════════════════════════════════════════

    pub async fn run_cycle(&mut self) -> CycleSummary {
        self.run_cycle_at(Instant::now()).await
    }

    /// One cycle with `now` as the rate-limit clock.
    pub async fn run_cycle_at(&mut self, now: Instant) -> CycleSummary {
        self.cycle += 1;
        let mut summary = CycleSummary::new(self.cycle);

        if !self.feed.started() {
            self.feed.start();
            info!("📡 Price feed not running; started it, skipping cycle {}", self.cycle);
            summary.outcome = CycleOutcome::FeedStarting;
            return self.finish(summary).await;
        }

        let orders = match OrderSnapshot::build(self.exchange.as_ref(), &self.cfg.trading_pairs).await {
            Ok(o) => o,
            Err(e) => {
                warn!("⚠️ Cycle {} aborted: {}", self.cycle, e);
                summary.external_failures += 1;
                summary.outcome = CycleOutcome::Aborted(e.to_string());
                return self.finish(summary).await;
            }
        };
        let prices = PriceSnapshot::build(&self.cfg.trading_pairs, self.feed.as_ref(), self.exchange.as_ref()).await;
        summary.skips.stale_reference += prices.stale().len() as u64;
        summary.external_failures += prices.book_failures();

        let mut phase = CyclePhase::CancelUnprofitable;
        while !phase.is_terminal() {
            let acted = match phase {
                CyclePhase::CancelUnprofitable => {
                    let plan = CancellationEvaluator::new(&self.cfg).unprofitable(&prices, &orders);
                    summary.skips.invalid_price += plan.invalid_price;
                    let n = self.execute_cancels(&plan.decisions, now, &mut summary).await;
                    summary.cancels_unprofitable += n;
                    n
                }
                CyclePhase::CancelOutbid => {
                    let plan = CancellationEvaluator::new(&self.cfg).outbid(&prices, &orders);
                    summary.skips.invalid_price += plan.invalid_price;
                    let n = self.execute_cancels(&plan.decisions, now, &mut summary).await;
                    summary.cancels_outbid += n;
                    n
                }
                CyclePhase::Propose => {
                    self.propose_and_place(&prices, &orders, now, &mut summary).await;
                    0
                }
                CyclePhase::Blocked(_) | CyclePhase::Done => 0,
            };
            phase = phase.advance(acted);
        }

        summary.outcome = match phase {
            CyclePhase::Blocked(reason) => {
                debug!("⛔ Cycle {} blocked after {} cancels", self.cycle, reason.as_str());
                CycleOutcome::Blocked(reason)
            }
            _ => CycleOutcome::Completed,
        };
        self.finish(summary).await
    }

    /// Attempted cancels count as actions even when the call fails.
    async fn execute_cancels(
        &mut self,
        decisions: &[CancelDecision],
        now: Instant,
        summary: &mut CycleSummary,
    ) -> u64 {
        for d in decisions {
            if self.executor.cancel(d).await.is_err() {
                summary.cancel_failures += 1;
            }
            self.tracker.record_cancel(&d.pair, now);
        }
        decisions.len() as u64
    }

    async fn propose_and_place(
        &mut self,
        prices: &PriceSnapshot,
        orders: &OrderSnapshot,
        now: Instant,
        summary: &mut CycleSummary,
    ) {
        let generator = ProposalGenerator::new(&self.cfg);
        let mut batch = Vec::new();

        for pair in &self.cfg.trading_pairs {
            let Some(pair_prices) = prices.get(pair) else { continue };
            if !batch.is_empty() {
                summary.skips.count += 1;
                continue;
            }
            let proposal = generator
                .propose(pair, pair_prices, orders, self.exchange.as_ref(), &mut self.tracker, now)
                .await;
            summary.skips += proposal.skips;
            summary.external_failures += proposal.external_failures;
            batch.extend(proposal.candidates);
        }

        summary.proposals = batch.len() as u64;
        let result = self.executor.place_batch(batch).await;
        summary.orders_placed = result.placed.len() as u64;
        summary.place_failures = result.failed;
        summary.budget_rejected = result.budget_rejected;
        summary.external_failures += result.external_failures;
    }

    async fn finish(&mut self, summary: CycleSummary) -> CycleSummary {
        let s = &summary;
        let line = format!(
            "🔁 Cycle {} {:?} | cancel(unprof={} outbid={} failed={}) proposals={} placed={} place_failed={} budget_rejected={} ext_failures={} skip(count={} time={} distance={} balance={} stale={} invalid={} book={} excluded={} no_target={})",
            s.cycle, s.outcome,
            s.cancels_unprofitable, s.cancels_outbid, s.cancel_failures,
            s.proposals, s.orders_placed, s.place_failures, s.budget_rejected, s.external_failures,
            s.skips.count, s.skips.time, s.skips.distance, s.skips.balance,
            s.skips.stale_reference, s.skips.invalid_price, s.skips.book_unavailable, s.skips.excluded, s.skips.no_target_size,
        );
        info!("{}", line);
        if s.actions() > 0 || s.cancel_failures > 0 || s.place_failures > 0 {
            let event = NotifyEvent::cycle_summary(&self.cfg.exchange, s);
            if let Err(e) = self.notifier.notify(&event).await {
                warn!("⚠️ Notification failed: {:#}", e);
            }
        }
        self.stats.absorb(s);
        summary
    }

    // ═════════════════════════════════════════════════
    // Fills + cleanup
    // ═════════════════════════════════════════════════

    pub async fn on_fill(&mut self, fill: &FillEvent) {
        self.stats.fills += 1;
        info!(
            pair = %fill.pair,
            side = %fill.side,
            order_id = %fill.order_id,
            "💰 {} {} {} {} at {}",
            fill.side, fill.amount, fill.pair, self.exchange.name(), fill.price,
        );
        let event = NotifyEvent::fill(&self.cfg.exchange, fill);
        if let Err(e) = self.notifier.notify(&event).await {
            warn!("⚠️ Fill notification failed: {:#}", e);
        }
    }

    /// Cancel every open order the exchange reports. Returns how many went through.
    pub async fn cancel_all_orders(&mut self) -> u64 {
        let orders = match self.exchange.open_orders().await {
            Ok(o) => o,
            Err(e) => {
                warn!("❌ CancelAll: could not list open orders: {:#}", e);
                return 0;
            }
        };
        info!("🗑️ CancelAll: {} orders", orders.len());

        let mut canceled = 0;
        for o in &orders {
            if self.executor.cancel_order(o, CancelReason::Shutdown).await.is_ok() {
                canceled += 1;
            }
        }
        if canceled == orders.len() as u64 {
            info!("✅ All orders canceled");
        } else {
            warn!(
                "⚠️ CancelAll completed with {} order(s) still open",
                orders.len() as u64 - canceled
            );
        }
        canceled
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────
