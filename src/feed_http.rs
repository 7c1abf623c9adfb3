// Lightweight HTTP client for the reference bid/ask feed.
// Plain reqwest + serde_json; payload numbers go straight to Decimal.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::market_making::error::{EngineError, Result};
use crate::market_making::feed::{BidAskSource, ReferenceBook};
use crate::market_making::types::{BidAsk, TradingPair};

pub struct ReferenceFeedClient {
    client: reqwest::Client,
    url: Url,
}

impl ReferenceFeedClient {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl BidAskSource for ReferenceFeedClient {
    async fn fetch_bid_ask(&self) -> Result<ReferenceBook> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| EngineError::FeedFetch(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::FeedFetch(format!(
                "feed returned status: {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| EngineError::FeedFetch(format!("reading body: {e}")))?;
        parse_reference_payload(&body)
    }
}

/// `{"BASE-QUOTE": {"bid": n, "ask": n}, ...}`. Entries with an unknown
/// key shape or non-numeric prices are dropped; any other top-level shape
/// is a payload error.
pub fn parse_reference_payload(body: &str) -> Result<ReferenceBook> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::FeedPayload(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::FeedPayload(format!("expected object, got {}", kind(&value))))?;

    let mut book = ReferenceBook::with_capacity(obj.len());
    for (key, entry) in obj {
        let pair: TradingPair = match key.parse() {
            Ok(p) => p,
            Err(e) => {
                debug!("dropping feed entry: {}", e);
                continue;
            }
        };
        let bid = entry.get("bid").and_then(json_decimal);
        let ask = entry.get("ask").and_then(json_decimal);
        match (bid, ask) {
            (Some(bid), Some(ask)) => {
                book.insert(pair, BidAsk::new(bid, ask));
            }
            _ => debug!(%pair, entry = %entry, "dropping feed entry with non-numeric bid/ask"),
        }
    }
    Ok(book)
}

/// JSON number or numeric string, parsed from its text.
fn json_decimal(v: &Value) -> Option<Decimal> {
    let text = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    text.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(&text).ok())
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
