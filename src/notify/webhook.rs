// src/notify/webhook.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::UpdateSink;
use crate::protocol::OutboundUpdate;

/// POSTs each update as JSON to the caller's callback URL.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait]
impl UpdateSink for WebhookSink {
    async fn send(&self, update: &OutboundUpdate) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(update)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("callback HTTP error: {e}"),
                },
                Err(e) => anyhow!("callback request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "notify", attempt, error = %err, "retrying callback");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1).min(6))).await;
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
