//! Job record and its status state machine.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a runner to pick it up.
    Pending,
    /// A runner is driving the work unit.
    Processing,
    /// The last attempt succeeded.
    Completed,
    /// The last attempt failed.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Statuses from which `cancel` is legal.
    pub const CANCELLABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

    /// Statuses from which `retry` is legal.
    pub const RETRYABLE: [JobStatus; 2] = [JobStatus::Failed, JobStatus::Cancelled];

    /// Returns the lowercase wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| JobError::InvalidInput(format!("Unknown job status: {}", s)))
    }
}

/// Persistent state of one unit of work.
///
/// All mutations go through the transition methods below, which keep the
/// record's invariants:
/// - `Completed` implies `progress == 100` and no error
/// - `Failed` implies an error message
/// - `Pending` and `Processing` imply no error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID.
    pub id: JobId,

    /// Input identifiers (e.g. uploaded filenames).
    pub inputs: Vec<String>,

    /// Current status.
    pub status: JobStatus,

    /// Progress percentage, 0 to 100.
    pub progress: u8,

    /// Error from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of retries requested so far.
    pub retry_count: u32,

    /// Created timestamp.
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a new pending job.
    ///
    /// Fails with [`JobError::InvalidInput`] when `inputs` is empty or any
    /// identifier is blank.
    pub fn new(inputs: Vec<String>) -> JobResult<Self> {
        if inputs.is_empty() {
            return Err(JobError::InvalidInput(
                "At least one input is required".to_string(),
            ));
        }

        if inputs.iter().any(|input| input.trim().is_empty()) {
            return Err(JobError::InvalidInput(
                "Input identifiers must not be blank".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            inputs,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if `cancel` is legal in the current status.
    pub fn can_cancel(&self) -> bool {
        JobStatus::CANCELLABLE.contains(&self.status)
    }

    /// Returns true if `retry` is legal in the current status.
    pub fn can_retry(&self) -> bool {
        JobStatus::RETRYABLE.contains(&self.status)
    }

    /// `Pending -> Processing`.
    pub fn start(&mut self) -> JobResult<()> {
        self.expect_status(&[JobStatus::Pending])?;
        self.status = JobStatus::Processing;
        self.progress = 0;
        self.touch();
        Ok(())
    }

    /// Records a progress checkpoint while processing.
    ///
    /// Values are clamped to 100. Returns `false` without touching the record
    /// when the value does not advance progress.
    pub fn advance_progress(&mut self, progress: u8) -> JobResult<bool> {
        self.expect_status(&[JobStatus::Processing])?;
        let progress = progress.min(100);
        if progress <= self.progress {
            return Ok(false);
        }
        self.progress = progress;
        self.touch();
        Ok(true)
    }

    /// `Processing -> Completed`.
    pub fn complete(&mut self) -> JobResult<()> {
        self.expect_status(&[JobStatus::Processing])?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.touch();
        Ok(())
    }

    /// `Processing -> Failed`.
    pub fn fail(&mut self, message: impl Into<String>) -> JobResult<()> {
        self.expect_status(&[JobStatus::Processing])?;
        let message = message.into();
        self.status = JobStatus::Failed;
        self.error = Some(if message.trim().is_empty() {
            "Job failed without an error message".to_string()
        } else {
            message
        });
        self.touch();
        Ok(())
    }

    /// `Pending | Processing -> Cancelled`.
    pub fn cancel(&mut self) -> JobResult<()> {
        self.expect_status(&JobStatus::CANCELLABLE)?;
        self.status = JobStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// `Failed | Cancelled -> Pending`, counting the retry.
    pub fn reset_for_retry(&mut self) -> JobResult<()> {
        self.expect_status(&JobStatus::RETRYABLE)?;
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.retry_count = self.retry_count.saturating_add(1);
        self.touch();
        Ok(())
    }

    fn expect_status(&self, allowed: &[JobStatus]) -> JobResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(JobError::invalid_state(allowed, self.status))
        }
    }

    /// Moves `updated_at` strictly forward.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + ChronoDuration::microseconds(1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> JobRecord {
        JobRecord::new(vec!["a.txt".to_string()]).unwrap()
    }

    fn processing() -> JobRecord {
        let mut job = pending();
        job.start().unwrap();
        job
    }

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = pending();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.retry_count, 0);
        assert!(job.error.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_new_job_rejects_empty_inputs() {
        let err = JobRecord::new(Vec::new()).unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[test]
    fn test_new_job_rejects_blank_input() {
        let err = JobRecord::new(vec!["a.txt".into(), "  ".into()]).unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[test]
    fn test_progress_only_moves_forward() {
        let mut job = processing();
        assert!(job.advance_progress(40).unwrap());
        assert!(!job.advance_progress(40).unwrap());
        assert!(!job.advance_progress(20).unwrap());
        assert!(job.advance_progress(250).unwrap());
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_progress_requires_processing() {
        let mut job = pending();
        assert!(job.advance_progress(10).is_err());
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut job = processing();
        job.advance_progress(60).unwrap();
        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_fail_always_records_an_error() {
        let mut job = processing();
        job.fail("").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[test]
    fn test_cancel_rules() {
        let mut job = pending();
        assert!(job.can_cancel());
        job.cancel().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut done = processing();
        done.complete().unwrap();
        assert!(!done.can_cancel());
        assert!(matches!(done.cancel(), Err(JobError::InvalidState { .. })));
    }

    #[test]
    fn test_retry_resets_and_counts() {
        let mut job = processing();
        job.advance_progress(80).unwrap();
        job.fail("boom").unwrap();

        job.reset_for_retry().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.error.is_none());
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_retry_rejected_for_completed() {
        let mut job = processing();
        job.complete().unwrap();
        assert!(!job.can_retry());
        assert!(matches!(
            job.reset_for_retry(),
            Err(JobError::InvalidState { .. })
        ));
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_updated_at_advances_on_every_mutation() {
        let mut job = pending();
        let mut last = job.updated_at;
        job.start().unwrap();
        assert!(job.updated_at > last);
        last = job.updated_at;
        job.advance_progress(20).unwrap();
        assert!(job.updated_at > last);
        last = job.updated_at;
        job.cancel().unwrap();
        assert!(job.updated_at > last);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert_eq!("Processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert!("dead_letter".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_record_serialization_shape() {
        let job = pending();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress"], 0);
        assert!(json.get("error").is_none());
        assert_eq!(json["inputs"][0], "a.txt");
    }
}
