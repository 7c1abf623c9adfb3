//! Reference price feed.
//!
//! A background task polls a [`BidAskSource`] and publishes the latest
//! good payload into a `watch` cache. The engine only reads the cache, so
//! a slow or failing source never stalls a cycle: it keeps trading on the
//! last value until the source recovers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::config::FeedConfig;
use super::error::Result;
use super::types::{BidAsk, TradingPair};

pub type ReferenceBook = HashMap<TradingPair, BidAsk>;

/// What the engine needs from a reference feed.
pub trait PriceFeed: Send + Sync {
    /// Last known bid/ask; may be stale, `None` if never seen.
    fn latest_bid_ask(&self, pair: &TradingPair) -> Option<BidAsk>;
    fn started(&self) -> bool;
    fn start(&mut self);
    fn stop(&mut self);
}

/// One fetch of the full reference payload.
#[async_trait]
pub trait BidAskSource: Send + Sync {
    async fn fetch_bid_ask(&self) -> Result<ReferenceBook>;
}

// ─────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedBackoff {
    /// Sleep after a successful fetch.
    pub interval: Duration,
    /// First retry sleep; doubles per consecutive failure.
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl FeedBackoff {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 1u32.checked_shl(consecutive_failures - 1).unwrap_or(u32::MAX);
        self.retry_base.saturating_mul(factor).min(self.retry_max)
    }
}

impl From<&FeedConfig> for FeedBackoff {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            interval: cfg.interval,
            retry_base: cfg.interval,
            retry_max: cfg.max_backoff.max(cfg.interval),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Supervised poller
// ─────────────────────────────────────────────────────────

pub struct ReferenceFeed {
    source: Arc<dyn BidAskSource>,
    backoff: FeedBackoff,
    tx: Arc<watch::Sender<Arc<ReferenceBook>>>,
    rx: watch::Receiver<Arc<ReferenceBook>>,
    handle: Option<JoinHandle<()>>,
}

impl ReferenceFeed {
    pub fn new(source: Arc<dyn BidAskSource>, backoff: FeedBackoff) -> Self {
        let (tx, rx) = watch::channel(Arc::new(ReferenceBook::new()));
        Self {
            source,
            backoff,
            tx: Arc::new(tx),
            rx,
            handle: None,
        }
    }

    /// Cache receiver; fires whenever a new payload lands.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReferenceBook>> {
        self.rx.clone()
    }
}

impl PriceFeed for ReferenceFeed {
    fn latest_bid_ask(&self, pair: &TradingPair) -> Option<BidAsk> {
        self.rx.borrow().get(pair).copied()
    }

    fn started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn start(&mut self) {
        if self.started() {
            return;
        }
        info!(
            "📡 Reference feed started | interval={}ms retry_max={}ms",
            self.backoff.interval.as_millis(),
            self.backoff.retry_max.as_millis(),
        );
        self.handle = Some(tokio::spawn(poll_loop(
            self.source.clone(),
            self.backoff,
            self.tx.clone(),
        )));
    }

    fn stop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
            info!("📡 Reference feed stopped");
        }
    }
}

impl Drop for ReferenceFeed {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}

/// Runs until aborted. Failures keep the cached value.
async fn poll_loop(
    source: Arc<dyn BidAskSource>,
    backoff: FeedBackoff,
    tx: Arc<watch::Sender<Arc<ReferenceBook>>>,
) {
    let mut failures: u32 = 0;
    loop {
        match source.fetch_bid_ask().await {
            Ok(book) => {
                if failures > 0 {
                    info!("📡 Reference feed recovered after {} failure(s)", failures);
                }
                failures = 0;
                debug!(pairs = book.len(), "reference feed updated");
                tx.send_replace(Arc::new(book));
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(
                    failures,
                    retry_in_ms = backoff.delay(failures).as_millis() as u64,
                    "⚠️ Reference feed: {} (keeping last value)",
                    e
                );
            }
        }
        sleep(backoff.delay(failures)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_making::error::EngineError;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results, then repeats the last fetch failure.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<ReferenceBook>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<ReferenceBook>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()) })
        }
    }

    #[async_trait]
    impl BidAskSource for ScriptedSource {
        async fn fetch_bid_ask(&self) -> Result<ReferenceBook> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::FeedFetch("connection refused".into())))
        }
    }

    fn book(bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> ReferenceBook {
        let mut b = ReferenceBook::new();
        b.insert(TradingPair::new("X", "BTC"), BidAsk::new(bid, ask));
        b
    }

    fn fast() -> FeedBackoff {
        FeedBackoff {
            interval: Duration::from_millis(5),
            retry_base: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = FeedBackoff {
            interval: Duration::from_millis(500),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(3),
        };
        assert_eq!(b.delay(0), Duration::from_millis(500));
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(1000));
        assert_eq!(b.delay(3), Duration::from_millis(2000));
        assert_eq!(b.delay(4), Duration::from_secs(3));
        assert_eq!(b.delay(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_feed_publishes_latest() {
        let source = ScriptedSource::new(vec![Ok(book(dec!(0.0010), dec!(0.0011)))]);
        let mut feed = ReferenceFeed::new(source, fast());
        assert!(!feed.started());
        assert!(feed.latest_bid_ask(&TradingPair::new("X", "BTC")).is_none());

        let mut rx = feed.subscribe();
        feed.start();
        assert!(feed.started());
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();

        let ba = feed.latest_bid_ask(&TradingPair::new("X", "BTC")).unwrap();
        assert_eq!(ba.bid, dec!(0.0010));
        feed.stop();
        assert!(!feed.started());
    }

    #[tokio::test]
    async fn test_failures_keep_last_good_value() {
        let source = ScriptedSource::new(vec![
            Ok(book(dec!(0.0010), dec!(0.0011))),
            Err(EngineError::FeedPayload("expected object".into())),
        ]);
        let mut feed = ReferenceFeed::new(source, fast());
        let mut rx = feed.subscribe();
        feed.start();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(feed.started());
        let ba = feed.latest_bid_ask(&TradingPair::new("X", "BTC")).unwrap();
        assert_eq!(ba.ask, dec!(0.0011));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let source = ScriptedSource::new(vec![]);
        let mut feed = ReferenceFeed::new(source, fast());
        feed.start();
        feed.start();
        assert!(feed.started());
        drop(feed);
    }
}
