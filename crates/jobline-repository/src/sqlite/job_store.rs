//! SQLite job store implementation.

use crate::{storage_error, DatabasePool};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jobline_engine::{JobError, JobId, JobRecord, JobResult, JobStatus, JobStore};
use sqlx::FromRow;
use tracing::debug;

/// SQLite-backed [`JobStore`].
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: DatabasePool,
}

impl SqliteJobStore {
    /// Creates a new store over an established pool.
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a job.
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    inputs: String,
    status: String,
    progress: i64,
    error: Option<String>,
    retry_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let inputs: Vec<String> = serde_json::from_str(&row.inputs).map_err(|e| {
            JobError::StorageUnavailable(format!("Invalid inputs in database: {}", e))
        })?;
        let status = row.status.parse::<JobStatus>().map_err(|_| {
            JobError::StorageUnavailable(format!("Invalid status in database: {}", row.status))
        })?;
        let progress = u8::try_from(row.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                JobError::StorageUnavailable(format!(
                    "Invalid progress in database: {}",
                    row.progress
                ))
            })?;
        let retry_count = u32::try_from(row.retry_count).map_err(|_| {
            JobError::StorageUnavailable(format!(
                "Invalid retry count in database: {}",
                row.retry_count
            ))
        })?;

        Ok(JobRecord {
            id: JobId::from_string(row.id),
            inputs,
            status,
            progress,
            error: row.error,
            retry_count,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> JobResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| JobError::StorageUnavailable(format!("Invalid timestamp in database: {}", e)))
}

fn encode_inputs(inputs: &[String]) -> JobResult<String> {
    serde_json::to_string(inputs)
        .map_err(|e| JobError::StorageUnavailable(format!("Failed to encode inputs: {}", e)))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &JobRecord) -> JobResult<()> {
        debug!(job_id = %job.id, "Inserting job");

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, inputs, status, progress, error, retry_count,
                              created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(encode_inputs(&job.inputs)?)
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(job.error.as_deref())
        .bind(i64::from(job.retry_count))
        .bind(format_timestamp(&job.created_at))
        .bind(format_timestamp(&job.updated_at))
        .execute(self.pool.inner())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                JobError::InvalidInput(format!("Job already exists: {}", job.id)),
            ),
            Err(e) => Err(storage_error("Failed to insert job", e)),
        }
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        debug!(job_id = %id, "Finding job");

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, inputs, status, progress, error, retry_count,
                   created_at, updated_at
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| storage_error("Failed to load job", e))?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn update(&self, job: &JobRecord) -> JobResult<()> {
        debug!(job_id = %job.id, status = %job.status, "Updating job");

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET inputs = ?, status = ?, progress = ?, error = ?, retry_count = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encode_inputs(&job.inputs)?)
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(job.error.as_deref())
        .bind(i64::from(job.retry_count))
        .bind(format_timestamp(&job.updated_at))
        .bind(job.id.as_str())
        .execute(self.pool.inner())
        .await
        .map_err(|e| storage_error("Failed to update job", e))?;

        if result.rows_affected() == 0 {
            return Err(JobError::NotFound(job.id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, status: Option<JobStatus>) -> JobResult<Vec<JobRecord>> {
        debug!(status = ?status, "Listing jobs");

        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    SELECT id, inputs, status, progress, error, retry_count,
                           created_at, updated_at
                    FROM jobs
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(self.pool.inner())
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    SELECT id, inputs, status, progress, error, retry_count,
                           created_at, updated_at
                    FROM jobs
                    ORDER BY created_at DESC, id DESC
                    "#,
                )
                .fetch_all(self.pool.inner())
                .await
            }
        }
        .map_err(|e| storage_error("Failed to list jobs", e))?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }
}
