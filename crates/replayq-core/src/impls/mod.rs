//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **LocalArtifactStore**: 結果 JSON のローカル保存
//! - **HttpReplayParser**: パーサーサービスへの multipart POST
//! - **WebhookAlertSink / LogAlertSink**: アラート送信
//!
//! ジョブストアとキューの実装はそれぞれ `store` / `queue` にある。

pub mod http_parser;
pub mod local_artifacts;
pub mod webhook_alert;

#[cfg(test)]
pub(crate) mod stub_http;

// 主要な型を再エクスポート
pub use self::http_parser::HttpReplayParser;
pub use self::local_artifacts::LocalArtifactStore;
pub use self::webhook_alert::{LogAlertSink, WebhookAlertSink};
