//! HttpReplayParser - 外部パーサーサービスへの HTTP クライアント
//!
//! `POST <url>` に `multipart/form-data` の `file` パートとしてリプレイを
//! ディスクからストリーミングで送る。
//!
//! # エラー分類
//! - ファイルが無い / 読めない → PermanentInput（リトライしない）
//! - 接続失敗、non-2xx、JSON としてデコードできない → TransientDependency
//! - タイムアウト → Timeout
//! - デコードできたが JSON object ではない → PermanentInput

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::debug;

use crate::error::PipelineError;
use crate::ports::ReplayParser;

#[derive(Debug, Clone)]
pub struct HttpReplayParser {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpReplayParser {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::TransientDependency(format!("http client: {e}")))?;
        Ok(Self::with_client(client, url, timeout))
    }

    /// Share an existing client (connection pool) with other collaborators.
    pub fn with_client(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::Timeout(format!(
                "parser did not answer within {}s",
                self.timeout.as_secs()
            ))
        } else {
            PipelineError::TransientDependency(format!("parser request failed: {err}"))
        }
    }
}

async fn open_part(file_path: &Path) -> Result<Part, PipelineError> {
    let file = tokio::fs::File::open(file_path).await.map_err(|e| {
        PipelineError::PermanentInput(format!(
            "cannot open replay file {}: {e}",
            file_path.display()
        ))
    })?;
    let meta = file.metadata().await.map_err(|e| {
        PipelineError::PermanentInput(format!(
            "cannot stat replay file {}: {e}",
            file_path.display()
        ))
    })?;
    if !meta.is_file() {
        return Err(PipelineError::PermanentInput(format!(
            "replay path {} is not a file",
            file_path.display()
        )));
    }

    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("replay.dem")
        .to_string();

    Ok(Part::stream_with_length(Body::from(file), meta.len()).file_name(file_name))
}

#[async_trait]
impl ReplayParser for HttpReplayParser {
    async fn parse(&self, file_path: &Path) -> Result<serde_json::Value, PipelineError> {
        let form = Form::new().part("file", open_part(file_path).await?);

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.url).multipart(form).send(),
        )
        .await
        .map_err(|_| {
            PipelineError::Timeout(format!(
                "parser did not answer within {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::TransientDependency(format!(
                "parser returned {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            PipelineError::TransientDependency(format!("parser returned undecodable JSON: {e}"))
        })?;

        if !payload.is_object() {
            return Err(PipelineError::PermanentInput(
                "parser payload is not a JSON object".to_string(),
            ));
        }

        debug!(path = %file_path.display(), bytes = body.len(), "replay parsed");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::impls::stub_http::{self, StubResponse};

    fn replay_in(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let replay = dir.path().join("a.replay");
        std::fs::write(&replay, b"demo").unwrap();
        replay
    }

    #[tokio::test]
    async fn missing_file_is_permanent() {
        let parser =
            HttpReplayParser::new("http://127.0.0.1:9/parse", Duration::from_secs(1)).unwrap();

        let err = parser
            .parse(Path::new("/definitely/not/here.replay"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PermanentInput);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn directory_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let parser =
            HttpReplayParser::new("http://127.0.0.1:9/parse", Duration::from_secs(1)).unwrap();

        let err = parser.parse(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermanentInput);
    }

    #[tokio::test]
    async fn unreachable_parser_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("a.replay");
        std::fs::write(&replay, b"demo").unwrap();

        // port 9 (discard) is closed on test hosts; connection is refused
        let parser =
            HttpReplayParser::new("http://127.0.0.1:9/parse", Duration::from_secs(2)).unwrap();

        let err = parser.parse(&replay).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let base = stub_http::serve(StubResponse::new(500, "boom")).await;
        let parser = HttpReplayParser::new(format!("{base}/parse"), Duration::from_secs(5)).unwrap();

        let err = parser.parse(&replay_in(&dir)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientDependency);
        assert!(err.to_string().contains("500"), "{err}");
    }

    #[tokio::test]
    async fn slow_parser_is_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let base = stub_http::serve(StubResponse::new(200, "{}").after(Duration::from_secs(2))).await;
        let parser =
            HttpReplayParser::new(format!("{base}/parse"), Duration::from_millis(200)).unwrap();

        let err = parser.parse(&replay_in(&dir)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn json_object_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let base = stub_http::serve(StubResponse::new(200, r#"{"map": "de_dust2", "rounds": 24}"#)).await;
        let parser = HttpReplayParser::new(format!("{base}/parse"), Duration::from_secs(5)).unwrap();

        let payload = parser.parse(&replay_in(&dir)).await.unwrap();

        assert_eq!(payload["map"], "de_dust2");
        assert_eq!(payload["rounds"], 24);
    }

    #[tokio::test]
    async fn non_object_payload_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let base = stub_http::serve(StubResponse::new(200, "[1, 2, 3]")).await;
        let parser = HttpReplayParser::new(format!("{base}/parse"), Duration::from_secs(5)).unwrap();

        let err = parser.parse(&replay_in(&dir)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermanentInput);
    }

    #[tokio::test]
    async fn undecodable_body_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let base = stub_http::serve(StubResponse::new(200, "<html>")).await;
        let parser = HttpReplayParser::new(format!("{base}/parse"), Duration::from_secs(5)).unwrap();

        let err = parser.parse(&replay_in(&dir)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientDependency);
    }
}
