//! Outbound notifications (fills, cycle summaries). Best effort: callers
//! log a failed delivery and carry on.

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::messages::NotifyEvent;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotifyEvent) -> anyhow::Result<()>;
}

/// Writes each event as one JSON log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &NotifyEvent) -> anyhow::Result<()> {
        let body = serde_json::to_string(event).context("serialize notification")?;
        info!(target: "notify", "🔔 {}", body);
        Ok(())
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, event: &NotifyEvent) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .context("Failed to send webhook notification")?;

        if !resp.status().is_success() {
            anyhow::bail!("webhook returned status: {}", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_making::messages::{CycleSummary, NotifyEvent};

    #[tokio::test]
    async fn test_log_notifier_accepts_events() {
        let event = NotifyEvent::cycle_summary("paper", &CycleSummary::new(1));
        assert!(LogNotifier.notify(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_failure_is_an_error() {
        // Nothing listens on port 9 (discard) locally; the send must fail, not panic.
        let sink = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let event = NotifyEvent::cycle_summary("paper", &CycleSummary::new(1));
        assert!(sink.notify(&event).await.is_err());
    }
}
