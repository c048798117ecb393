//! Serialized, notifying access to job records.
//!
//! Every mutation of a persisted job goes through a [`JobGuard`]: the guard
//! holds the job's lock while the caller loads, changes and commits the
//! record, and a commit both persists and publishes.

use crate::error::{JobError, JobResult};
use crate::hub::NotificationHub;
use crate::job::{JobId, JobRecord};
use crate::store::JobStore;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

const SHARDS: usize = 64;

/// Store and hub behind per-job locks.
pub struct Ledger {
    store: Arc<dyn JobStore>,
    hub: Arc<NotificationHub>,
    shards: Vec<Mutex<()>>,
}

impl Ledger {
    /// Creates a ledger over the given store and hub.
    pub fn new(store: Arc<dyn JobStore>, hub: Arc<NotificationHub>) -> Self {
        Self {
            store,
            hub,
            shards: (0..SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Underlying store, for lock-free reads.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Notification hub commits publish to.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Persists a new record and announces it.
    pub async fn create(&self, job: &JobRecord) -> JobResult<()> {
        self.lock(&job.id).await.create(job).await
    }

    /// Acquires the job's lock. Must not be called while holding another guard.
    pub async fn lock(&self, id: &JobId) -> JobGuard<'_> {
        let lock = self.shard(id).lock().await;
        trace!(job_id = %id, "Job lock acquired");
        JobGuard {
            ledger: self,
            id: id.clone(),
            _lock: lock,
        }
    }

    fn shard(&self, id: &JobId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }
}

/// Exclusive access to one job for a read-modify-write.
pub struct JobGuard<'a> {
    ledger: &'a Ledger,
    id: JobId,
    _lock: MutexGuard<'a, ()>,
}

impl JobGuard<'_> {
    /// Job this guard covers.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Reads the latest persisted record, if any.
    pub async fn find(&self) -> JobResult<Option<JobRecord>> {
        self.ledger.store.get(&self.id).await
    }

    /// Reads the latest persisted record.
    pub async fn load(&self) -> JobResult<JobRecord> {
        self.find()
            .await?
            .ok_or_else(|| JobError::NotFound(self.id.to_string()))
    }

    /// Persists a new record for this job, then publishes it.
    pub async fn create(&self, job: &JobRecord) -> JobResult<()> {
        debug_assert_eq!(job.id, self.id);
        self.ledger.store.create(job).await?;
        self.ledger.hub.publish(job);
        Ok(())
    }

    /// Persists the record, then publishes it. Nothing is published if
    /// persisting fails.
    pub async fn commit(&self, job: &JobRecord) -> JobResult<()> {
        debug_assert_eq!(job.id, self.id);
        self.ledger.store.update(job).await?;
        self.ledger.hub.publish(job);
        Ok(())
    }
}
