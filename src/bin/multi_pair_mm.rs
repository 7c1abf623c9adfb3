//! Multi-pair market maker against an external reference feed.
//!
//!   ReferenceFeed (poller) ──watch──→ CycleCoordinator ──→ ExchangeConnector
//!                                          ↑ fills
//!   PaperExchange matcher ─────────────────┘
//!
//! Runs against the in-memory paper exchange: the simulated book mirrors the
//! reference feed and resting orders fill when the book crosses them.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use multi_pair_mm::feed_http::ReferenceFeedClient;
use multi_pair_mm::market_making::config::{parse_amounts, EngineConfig, FeedConfig};
use multi_pair_mm::market_making::coordinator::CycleCoordinator;
use multi_pair_mm::market_making::exchange::PaperExchange;
use multi_pair_mm::market_making::feed::{FeedBackoff, ReferenceFeed};
use multi_pair_mm::market_making::messages::FillEvent;
use multi_pair_mm::market_making::notify::{LogNotifier, NotificationSink, WebhookNotifier};

/// Console always; daily-rolling file under `MM_LOG_DIR` when set.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_filter(filter());

    match env::var("MM_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            std::fs::create_dir_all(&dir).with_context(|| format!("creating log dir {dir}"))?;
            let appender = tracing_appender::rolling::daily(&dir, "multi_pair_mm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            tracing_subscriber::registry().with(console).with(file).init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(console).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = init_tracing()?;

    info!("═══════════════════════════════════════════════════");
    info!("  Multi-Pair Market Maker (reference feed, paper)");
    info!("═══════════════════════════════════════════════════");

    let cfg = EngineConfig::from_env().context("loading engine config")?;
    cfg.validate().context("validating engine config")?;
    let feed_cfg = FeedConfig::from_env();

    info!(
        "📋 exchange={} pairs=[{}]",
        cfg.exchange,
        cfg.trading_pairs.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", "),
    );
    if !cfg.buy_excluded_pairs.is_empty() {
        info!("🚧 Buy side paused for {} pair(s)", cfg.buy_excluded_pairs.len());
    }

    // ═══ Reference feed ═══
    let feed_url = feed_cfg.url_for(&cfg.trading_pairs)?;
    info!("📡 Reference feed: {}", feed_url);
    let feed = ReferenceFeed::new(
        Arc::new(ReferenceFeedClient::new(feed_url)),
        FeedBackoff::from(&feed_cfg),
    );
    let mut book_rx = feed.subscribe();

    // ═══ Paper exchange ═══
    let (fill_tx, fill_rx) = mpsc::channel::<FillEvent>(64);
    let exchange = Arc::new(PaperExchange::new(cfg.exchange.clone()).with_fill_sender(fill_tx));
    if let Ok(raw) = env::var("MM_PAPER_BALANCES") {
        for (currency, amount) in parse_amounts(&raw).context("parsing MM_PAPER_BALANCES")? {
            info!("💰 Paper balance {} = {}", currency, amount);
            exchange.set_balance(&currency, amount);
        }
    } else {
        warn!("⚠️ MM_PAPER_BALANCES not set, paper account is empty, no orders will be placed");
    }

    // Simulated book follows the reference feed; crossed orders fill.
    let matcher_exchange = exchange.clone();
    let matcher = tokio::spawn(async move {
        while book_rx.changed().await.is_ok() {
            let book = book_rx.borrow_and_update().clone();
            matcher_exchange.mirror_reference(&book);
            let fills = matcher_exchange.match_resting_orders();
            if !fills.is_empty() {
                info!("📋 Paper matcher filled {} order(s)", fills.len());
            }
        }
    });

    // ═══ Notifications ═══
    let notifier: Arc<dyn NotificationSink> = match env::var("MM_NOTIFY_WEBHOOK") {
        Ok(url) if !url.trim().is_empty() => {
            info!("🔔 Notifications → webhook");
            Arc::new(WebhookNotifier::new(url.trim()))
        }
        _ => Arc::new(LogNotifier),
    };

    // ═══ Coordinator ═══
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let coordinator = CycleCoordinator::new(cfg, Box::new(feed), exchange, notifier);
    let coord_handle = tokio::spawn(coordinator.run(fill_rx, shutdown_rx));
    info!("🚀 Coordinator spawned, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("🛑 Ctrl-C received, shutting down");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(30), coord_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("⚠️ Coordinator task ended abnormally: {}", e),
        Err(_) => warn!("⚠️ Coordinator did not stop within 30s"),
    }
    matcher.abort();
    let _ = matcher.await;

    info!("👋 Bye");
    Ok(())
}
