//! AlertSink の実装
//!
//! - **WebhookAlertSink**: `POST {"content": "..."}`（Discord 互換の webhook）
//! - **LogAlertSink**: webhook 未設定時。`warn!` に出すだけ

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

use crate::ports::{AlertError, AlertSink};

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, content: &str) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage { content })
            .send()
            .await
            .map_err(|e| AlertError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError(format!("webhook returned {}", status.as_u16())));
        }
        Ok(())
    }
}

/// Alert sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, content: &str) -> Result<(), AlertError> {
        warn!(alert = %content, "dependency alert");
        Ok(())
    }
}
