//! replayq-core
//!
//! Core building blocks for the replay analysis pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, status lifecycle, queue task）
//! - **ports**: 抽象化レイヤー（JobStore, ArtifactStore, ReplayParser, AlertSink, Clock）
//! - **store**: JobStore 実装（PostgreSQL, in-memory）
//! - **queue**: JobQueue（in-memory, Redis）、リトライポリシー、レートリミッター
//! - **impls**: 外部サービス実装（HTTP パーサー, ローカルファイル, Webhook アラート）
//! - **analysis**: パース結果の後処理（ヒューリスティクス, ヒートマップ）
//! - **app**: アプリケーションロジック（worker_loop, health, reaper_loop, gc_loop, periodic）
//! - **context**: 起動時に組み立てる共有ハンドルと submit / status の表面
//! - **config**: 環境変数からの設定
//! - **observability**: tracing の初期化とジョブ件数

pub mod analysis;
pub mod app;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod store;

pub use crate::analysis::Analyzer;
pub use crate::config::PipelineConfig;
pub use crate::context::{Pipeline, PipelineContext};
pub use crate::domain::{AnalysisJob, JobId, JobStatus, JobStatusView, JobTask, NewJob};
pub use crate::error::{ConfigError, ErrorKind, PipelineError, StoreError};
