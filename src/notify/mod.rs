// src/notify/mod.rs
//! Outbound side: where a feed's delta goes once it has been committed.

pub mod webhook;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ServiceConfig;
use crate::protocol::OutboundUpdate;

#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn send(&self, update: &OutboundUpdate) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Hands updates to an in-process consumer.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UpdateSink for ChannelSink {
    async fn send(&self, update: &OutboundUpdate) -> Result<()> {
        self.tx
            .send(update.clone())
            .map_err(|_| anyhow!("update receiver dropped"))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Used when no callback is configured: the delta is only logged.
pub struct LogSink;

#[async_trait]
impl UpdateSink for LogSink {
    async fn send(&self, update: &OutboundUpdate) -> Result<()> {
        tracing::info!(
            target: "notify",
            instance = %update.instance_id,
            request = %update.request_id,
            feed = %update.source.source_title,
            items = update.items.len(),
            "update ready (no callback configured)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Webhook when `callback_url` is set, otherwise the log sink.
pub fn sink_from_config(cfg: &ServiceConfig) -> Arc<dyn UpdateSink> {
    match cfg.callback_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Arc::new(
            webhook::WebhookSink::new(url.to_string())
                .with_timeout(cfg.request_timeout_secs)
                .with_retries(cfg.webhook_retries),
        ),
        None => Arc::new(LogSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SourceMetadata;

    #[tokio::test]
    async fn channel_sink_forwards_updates() {
        let (sink, mut rx) = ChannelSink::new();
        let up = OutboundUpdate {
            instance_id: "m1".into(),
            request_id: "r1".into(),
            source: SourceMetadata::for_feed("Cats"),
            items: vec![],
        };
        sink.send(&up).await.unwrap();
        assert_eq!(rx.recv().await, Some(up));
    }

    #[test]
    fn sink_selection_follows_callback_url() {
        let mut cfg = ServiceConfig::default();
        assert_eq!(sink_from_config(&cfg).name(), "log");
        cfg.callback_url = Some("http://127.0.0.1:8080/hook".into());
        assert_eq!(sink_from_config(&cfg).name(), "webhook");
    }
}
