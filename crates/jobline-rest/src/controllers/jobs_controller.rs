//! Job management REST API controller.

use crate::{
    responses::{accepted, created, ok, ApiResponse, ApiResult, AppError},
    state::AppState,
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use jobline_engine::{JobError, JobId, JobLifecycle, JobRecord, JobStatus, ScheduledRetry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Creates the jobs router.
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route(
            "/jobs/upload",
            post(upload_job).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/jobs/retry-failed", post(retry_failed))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        .route("/jobs/:job_id/retry", post(retry_job))
        .route("/jobs/:job_id/retry/backoff", post(schedule_retry))
}

/// Job submission request.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Input identifiers, one per item to process.
    pub inputs: Vec<String>,
}

/// Query parameters for listing jobs.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status.
    pub status: Option<String>,
}

type WithStatus<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

/// Submits a job from a JSON list of inputs.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> WithStatus<JobRecord> {
    let job = state.engine.submit(request.inputs).await?;
    info!(job_id = %job.id, "Job submitted");
    Ok(created(job))
}

/// Submits a job whose inputs are the filenames of the uploaded files.
async fn upload_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> WithStatus<JobRecord> {
    let mut inputs = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| JobError::InvalidInput(format!("Malformed upload: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await.map_err(|e| {
            JobError::InvalidInput(format!("Failed to read {}: {}", filename, e))
        })?;
        debug!(filename = %filename, size = data.len(), "Received upload");
        inputs.push(filename);
    }

    if inputs.is_empty() {
        return Err(JobError::InvalidInput("No files uploaded".to_string()).into());
    }

    let job = state.engine.submit(inputs).await?;
    info!(job_id = %job.id, inputs = job.inputs.len(), "Job submitted from upload");
    Ok(created(job))
}

/// Lists jobs, newest first.
async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Vec<JobRecord>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    ok(state.engine.list(status).await?)
}

/// Gets a job by ID.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobRecord> {
    ok(state.engine.get(&JobId::from(job_id)).await?)
}

/// Cancels a pending or processing job.
async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobRecord> {
    ok(state.engine.cancel(&JobId::from(job_id)).await?)
}

/// Retries a failed or cancelled job immediately.
async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobRecord> {
    ok(state.engine.retry(&JobId::from(job_id)).await?)
}

/// Schedules a backoff retry for one job.
async fn schedule_retry(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> WithStatus<ScheduledRetry> {
    let scheduled = state.engine.schedule_retry_for(&JobId::from(job_id)).await?;
    Ok(accepted(scheduled))
}

/// Schedules a backoff retry for every failed job.
async fn retry_failed(State(state): State<AppState>) -> WithStatus<Vec<ScheduledRetry>> {
    let scheduled = state.engine.retry_failed().await?;
    info!(count = scheduled.len(), "Scheduled retries for failed jobs");
    Ok(accepted(scheduled))
}
