use anyhow::{Context, Error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::source::UploadMode;

/// What gets written down about a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRunRecord {
    pub run_id: Uuid,
    /// Taken before the first row is fetched. Delta runs pick up customers changed after it.
    pub started_at: DateTime<Utc>,
    pub mode: UploadMode,
    pub brand: Option<String>,
    pub rows_processed: u64,
    pub uploaded_count: u64,
    pub success: bool,
    pub job: Option<String>,
}

#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record(&self, run: &UploadRunRecord) -> Result<(), Error>;
}

/// Used when there is no database to write to, e.g. for file uploads.
pub struct NoopRunRecorder;

#[async_trait]
impl RunRecorder for NoopRunRecorder {
    async fn record(&self, _run: &UploadRunRecord) -> Result<(), Error> {
        Ok(())
    }
}

/// Writes one row per run into `customer_match_upload_runs`.
pub struct PostgresRunRecorder {
    pool: PgPool,
}

impl PostgresRunRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRecorder for PostgresRunRecorder {
    async fn record(&self, run: &UploadRunRecord) -> Result<(), Error> {
        let rows_processed =
            i64::try_from(run.rows_processed).context("rows processed does not fit in BIGINT")?;
        let uploaded_count =
            i64::try_from(run.uploaded_count).context("uploaded count does not fit in BIGINT")?;

        sqlx::query(
            r#"
INSERT INTO customer_match_upload_runs
    (run_id, started_at, mode, description, brand, rows_processed, uploaded_count, success, job_resource_name, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(run.run_id)
        .bind(run.started_at)
        .bind(run.mode.to_string())
        .bind(run.mode.description())
        .bind(run.brand.as_deref())
        .bind(rows_processed)
        .bind(uploaded_count)
        .bind(run.success)
        .bind(run.job.as_deref())
        .execute(&self.pool)
        .await
        .context("failed to insert upload run")?;

        info!(run_id = %run.run_id, "recorded upload run");
        Ok(())
    }
}
