//! One-shot check of the reference feed: fetch once, print what the engine
//! would see per configured pair.

use anyhow::Context;
use tracing::{info, warn};

use multi_pair_mm::feed_http::ReferenceFeedClient;
use multi_pair_mm::market_making::config::{EngineConfig, FeedConfig};
use multi_pair_mm::market_making::feed::BidAskSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cfg = EngineConfig::from_env().context("loading engine config")?;
    let url = FeedConfig::from_env().url_for(&cfg.trading_pairs)?;
    info!("🔍 GET {}", url);

    let client = ReferenceFeedClient::new(url);
    let book = client.fetch_bid_ask().await.context("fetching reference feed")?;
    info!("📡 {} entries in payload", book.len());

    for pair in &cfg.trading_pairs {
        match book.get(pair) {
            Some(q) if q.is_valid() => info!("✅ {} bid={} ask={}", pair, q.bid, q.ask),
            Some(q) => warn!("⚠️ {} stale bid={} ask={}", pair, q.bid, q.ask),
            None => warn!("❌ {} missing", pair),
        }
    }
    Ok(())
}
