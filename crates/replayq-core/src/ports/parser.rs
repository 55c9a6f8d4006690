//! ReplayParser port - 外部のパーサーサービス

use std::path::Path;

use async_trait::async_trait;

use crate::error::PipelineError;

/// Converts a raw replay file into structured telemetry.
///
/// Implementations classify their own failures: unreachable service, non-2xx and
/// undecodable bodies are `TransientDependency`, a call that exceeds its budget is
/// `Timeout`, and problems with the file itself are `PermanentInput`.
#[async_trait]
pub trait ReplayParser: Send + Sync {
    async fn parse(&self, file_path: &Path) -> Result<serde_json::Value, PipelineError>;
}
