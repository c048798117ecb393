//! Job storage abstraction.

use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable storage of job records.
///
/// The engine serializes every read-modify-write per job id, so
/// implementations only need single-operation atomicity.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new record.
    async fn create(&self, job: &JobRecord) -> JobResult<()>;

    /// Finds a record by ID.
    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Replaces an existing record. Fails with `NotFound` if it was never created.
    async fn update(&self, job: &JobRecord) -> JobResult<()>;

    /// Lists records, newest-created first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>) -> JobResult<Vec<JobRecord>>;
}

/// Process-local store, used when no database is configured.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &JobRecord) -> JobResult<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(JobError::InvalidInput(format!(
                "Job already exists: {}",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        Ok(self.jobs.read().get(id).cloned())
    }

    async fn update(&self, job: &JobRecord) -> JobResult<()> {
        match self.jobs.write().get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobError::NotFound(job.id.to_string())),
        }
    }

    async fn list(&self, status: Option<JobStatus>) -> JobResult<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .read()
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }
}
