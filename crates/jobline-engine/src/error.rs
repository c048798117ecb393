//! Job engine error types.

use crate::job::JobStatus;
use thiserror::Error;

/// Result type for engine operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors surfaced by the job engine and its collaborators.
#[derive(Debug, Error)]
pub enum JobError {
    /// Bad submission arguments.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown job id.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation not legal for the job's current status.
    #[error("Invalid job state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A single attempt's processing failed.
    #[error("Work unit failed: {0}")]
    WorkUnitFailure(String),

    /// The storage collaborator could not serve the request.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A run exceeded its time budget.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// The engine no longer accepts work.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Builds an [`JobError::InvalidState`] from the allowed and actual statuses.
    pub fn invalid_state(expected: &[JobStatus], actual: JobStatus) -> Self {
        let expected = expected
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ");

        JobError::InvalidState {
            expected,
            actual: actual.to_string(),
        }
    }

    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::WorkUnitFailure(_) | JobError::StorageUnavailable(_) | JobError::Timeout(_)
        )
    }

    /// Returns a machine-readable error code.
    pub const fn error_code(&self) -> &'static str {
        match self {
            JobError::InvalidInput(_) => "INVALID_INPUT",
            JobError::NotFound(_) => "NOT_FOUND",
            JobError::InvalidState { .. } => "INVALID_STATE",
            JobError::WorkUnitFailure(_) => "WORK_UNIT_FAILURE",
            JobError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            JobError::Timeout(_) => "TIMEOUT",
            JobError::ShuttingDown => "SHUTTING_DOWN",
            JobError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            JobError::InvalidInput(_) => 400,
            JobError::NotFound(_) => 404,
            JobError::InvalidState { .. } => 409,
            JobError::StorageUnavailable(_) | JobError::ShuttingDown => 503,
            JobError::Timeout(_) => 504,
            JobError::WorkUnitFailure(_) | JobError::Configuration(_) => 500,
        }
    }
}
