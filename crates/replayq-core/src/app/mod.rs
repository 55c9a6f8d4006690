//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **WorkerLoop**: ジョブ実行ループ（lease→rate limit→claim→parse→enrich→persist）
//! - **Health**: 依存サービスの死活監視とアラート
//! - **ReaperLoop**: processing のまま止まったジョブの回収
//! - **GCLoop**: 保持期間切れの completed ジョブの削除
//! - **Periodic**: 上記スーパーバイザーを定期実行するティッカー

pub mod gc_loop;
pub mod health;
pub mod periodic;
pub mod reaper_loop;
pub mod worker_loop;

use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::context::PipelineContext;

// 主要な型を再エクスポート
pub use self::gc_loop::{ExpiryReport, ExpirySweep};
pub use self::health::{
    DependencyHealth, DependencyState, HealthReport, HealthSupervisor, HttpProbe, Ping, PingProbe,
    Probe,
};
pub use self::periodic::{PeriodicSet, PeriodicTask, spawn_periodic};
pub use self::reaper_loop::{OrphanReport, OrphanSweep};
pub use self::worker_loop::{JobOutcome, JobProcessor, WorkerPool, WorkerStats, WorkerStatsSnapshot};

/// Health supervisor over the parser, the job store and the queue.
pub fn health_supervisor(ctx: &PipelineContext, config: &PipelineConfig) -> HealthSupervisor {
    HealthSupervisor::new(Arc::clone(&ctx.alerts), config.health_timeout)
        .with_probe(Arc::new(HttpProbe::new(
            "parser",
            config.parser_health_url.clone(),
        )))
        .with_probe(Arc::new(PingProbe::new("store", Arc::clone(&ctx.store))))
        .with_probe(Arc::new(PingProbe::new("queue", Arc::clone(&ctx.queue))))
}

/// Start the health, expiry and orphan supervisors on their configured periods.
pub fn spawn_supervisors(ctx: &PipelineContext, config: &PipelineConfig) -> PeriodicSet {
    let expiry = ExpirySweep::new(
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.artifacts),
        Arc::clone(&ctx.clock),
        config.retention_chrono(),
    );
    let orphan = OrphanSweep::new(
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.clock),
        config.stuck_threshold,
    );

    let tasks: [(Arc<dyn PeriodicTask>, Duration); 3] = [
        (Arc::new(health_supervisor(ctx, config)), config.health_interval),
        (Arc::new(expiry), config.expiry_interval),
        (Arc::new(orphan), config.orphan_interval),
    ];

    let mut set = PeriodicSet::new();
    for (task, every) in tasks {
        set.spawn(task, every);
    }
    set
}
