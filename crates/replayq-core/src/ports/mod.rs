//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（PostgreSQL, パーサーサービス, Webhook, ファイルシステム）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod alert_sink;
pub mod artifact_store;
pub mod clock;
pub mod job_store;
pub mod parser;

pub use self::alert_sink::{AlertError, AlertSink};
pub use self::artifact_store::{ArtifactStore, Removal};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::job_store::JobStore;
pub use self::parser::ReplayParser;
