//! AlertSink port - 依存サービス DOWN の通知先

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
#[error("alert delivery failed: {0}")]
pub struct AlertError(pub String);

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert message (`{"content": ...}` on the wire).
    async fn send(&self, content: &str) -> Result<(), AlertError>;
}
