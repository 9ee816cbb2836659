//! Postgres implementation of the job store.
//!
//! Claim, extension and reclaim are each a single `UPDATE ... WHERE` so row
//! locking in Postgres decides every race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::Database;
use crate::error::{JoblineError, Result};
use crate::jobs::{Job, JobId, JobStatus, JobStore, NewJob};

const JOB_COLUMNS: &str = "id, kind, input, status, result, error, retry_count, dedup_key, \
                           lease_owner, lease_expires_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub kind: String,
    pub input: serde_json::Value,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub dedup_key: String,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JoblineError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: JobId(row.id),
            kind: row.kind,
            input: row.input,
            status: row.status.parse()?,
            result: row.result,
            error: row.error,
            retry_count: row.retry_count,
            dedup_key: row.dedup_key,
            lease_owner: row.lease_owner,
            lease_expires_at: row.lease_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

#[async_trait]
impl JobStore for Database {
    async fn create(&self, job: NewJob) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (id, kind, input, status, retry_count, dedup_key, created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', 0, $4, NOW(), NOW())
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&job.kind)
        .bind(&job.input)
        .bind(&job.dedup_key)
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE id = $1
            "#
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn status(&self, id: JobId) -> Result<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;

        status.map(|s| s.parse()).transpose()
    }

    async fn set_result(&self, id: JobId, result: serde_json::Value) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                error = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(&result)
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn set_error(&self, id: JobId, message: &str) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                result = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(message)
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn set_result_if_owner(&self, id: JobId, owner: &str, result: serde_json::Value) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $3,
                error = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'processing'
            "#,
        )
        .bind(id.0)
        .bind(owner)
        .bind(&result)
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn set_error_if_owner(&self, id: JobId, owner: &str, message: &str) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $3,
                result = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'processing'
            "#,
        )
        .bind(id.0)
        .bind(owner)
        .bind(message)
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn claim(&self, id: JobId, owner: &str, lease: Duration) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                lease_owner = $2,
                lease_expires_at = NOW() + make_interval(secs => $3),
                retry_count = 0,
                updated_at = NOW()
            WHERE id = $1
              AND (status = 'queued'
                   OR (status = 'processing' AND lease_expires_at < NOW()))
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(owner)
        .bind(secs(lease))
        .fetch_optional(self.pool())
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn extend_lease(&self, id: JobId, owner: &str, extra: Duration) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'processing'
            "#,
        )
        .bind(id.0)
        .bind(owner)
        .bind(secs(extra))
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn record_attempt(&self, id: JobId, owner: &str, attempt: u32) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = $3,
                updated_at = NOW()
            WHERE id = $1
              AND lease_owner = $2
              AND status = 'processing'
            "#,
        )
        .bind(id.0)
        .bind(owner)
        .bind(i32::try_from(attempt).unwrap_or(i32::MAX))
        .execute(self.pool())
        .await?;

        Ok(done.rows_affected() > 0)
    }

    async fn reclaim_expired(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET status = 'queued',
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND lease_expires_at < NOW()
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn find_recent_by_dedup_key(&self, dedup_key: &str, window: Duration) -> Result<Option<JobId>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM jobs
            WHERE dedup_key = $1
              AND created_at > NOW() - make_interval(secs => $2)
              AND status IN ('queued', 'processing', 'completed')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(dedup_key)
        .bind(secs(window))
        .fetch_optional(self.pool())
        .await?;

        Ok(id.map(JobId))
    }

    async fn ping(&self) -> Result<()> {
        Database::ping(self).await
    }
}
