pub mod feed_http;
pub mod market_making;
