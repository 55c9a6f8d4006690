//! Postgres-backed job store.
//!
//! One row per job in `analysis_jobs`. The guarded transition is a single
//! `UPDATE ... WHERE id = $1 AND status = $2`; it applied iff exactly one row was
//! affected, so two writers racing on the same job cannot both win.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database (any code) | `Database` with the server message |
//! | PoolClosed | `Database("connection pool closed ...")` |
//! | decode failures of a row | `Corrupt` |
//! | anything else (I/O, TLS, timeouts) | `Database` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;

use crate::domain::{AnalysisJob, JobId, JobStatus, NewJob, TransitionFields};
use crate::error::StoreError;
use crate::observability::JobCounts;
use crate::ports::job_store::ensure_edge;
use crate::ports::{Clock, JobStore};

const SCHEMA: &str = include_str!("../../migrations/0001_create_analysis_jobs.sql");

const JOB_COLUMNS: &str = "id, status, file_path, result_path, error_message, metadata, \
                           attempts, created_at, updated_at";

/// Postgres job store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgJobStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, clock))
    }

    /// Create the table and index if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Close the pool; in-flight queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(file_path = %job.file_path), err)]
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = JobId::generate(self.clock.as_ref());
        let now = self.clock.now();

        sqlx::query(
            r#"
            INSERT INTO analysis_jobs
                (id, status, file_path, metadata, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            "#,
        )
        .bind(id.to_storage_key())
        .bind(JobStatus::Queued.as_str())
        .bind(&job.file_path)
        .bind(&job.metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        Ok(id)
    }

    #[instrument(skip(self, fields), fields(job_id = %id, %expected, %next), err)]
    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> Result<bool, StoreError> {
        ensure_edge(expected, next)?;

        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $3,
                result_path = COALESCE($4, result_path),
                error_message = COALESCE($5, error_message),
                attempts = attempts + CASE WHEN $3 = 'processing' THEN 1 ELSE 0 END,
                updated_at = $6
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.to_storage_key())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(fields.result_path)
        .bind(fields.error_message)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = $1"
        ))
        .bind(id.to_storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(%status), err)]
    async fn list(
        &self,
        status: JobStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs \
             WHERE status = $1 AND ($2::timestamptz IS NULL OR updated_at < $2) \
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %id, %expected), err)]
    async fn delete(&self, id: JobId, expected: JobStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM analysis_jobs WHERE id = $1 AND status = $2")
            .bind(id.to_storage_key())
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM analysis_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("counts", e))?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| corrupt("counts", e))?;
            let n: i64 = row.try_get("n").map_err(|e| corrupt("counts", e))?;
            let status = status.parse::<JobStatus>().map_err(|reason| StoreError::Corrupt {
                id: "counts".to_string(),
                reason,
            })?;
            counts.set(status, n.max(0) as usize);
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<AnalysisJob, StoreError> {
    let raw_id: String = row.try_get("id").map_err(|e| corrupt("?", e))?;
    let id = raw_id.parse::<JobId>().map_err(|e| StoreError::Corrupt {
        id: raw_id.clone(),
        reason: e.to_string(),
    })?;
    let status: String = row.try_get("status").map_err(|e| corrupt(&raw_id, e))?;
    let status = status.parse::<JobStatus>().map_err(|reason| StoreError::Corrupt {
        id: raw_id.clone(),
        reason,
    })?;
    let attempts: i32 = row.try_get("attempts").map_err(|e| corrupt(&raw_id, e))?;

    Ok(AnalysisJob {
        id,
        status,
        file_path: row.try_get("file_path").map_err(|e| corrupt(&raw_id, e))?,
        result_path: row.try_get("result_path").map_err(|e| corrupt(&raw_id, e))?,
        error_message: row.try_get("error_message").map_err(|e| corrupt(&raw_id, e))?,
        metadata: row.try_get("metadata").map_err(|e| corrupt(&raw_id, e))?,
        attempts: attempts.max(0) as u32,
        created_at: row.try_get("created_at").map_err(|e| corrupt(&raw_id, e))?,
        updated_at: row.try_get("updated_at").map_err(|e| corrupt(&raw_id, e))?,
    })
}

fn corrupt(id: &str, err: sqlx::Error) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: err.to_string(),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Database(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed during {operation}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}
