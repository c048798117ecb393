//! Lifecycle controller: the engine's public operations.

use crate::config::EngineConfig;
use crate::error::{JobError, JobResult};
use crate::hub::{NotificationHub, SubscriberId, Subscription};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::ledger::Ledger;
use crate::metrics::JobMetrics;
use crate::retry::{RetryPolicy, RetryScheduler, ScheduledRetry};
use crate::runner::JobRunner;
use crate::store::JobStore;
use crate::work::WorkUnit;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Operations the engine exposes to its callers.
///
/// Every status change made through these operations is persisted and
/// published together.
#[async_trait]
pub trait JobLifecycle: Send + Sync {
    /// Creates a pending job and starts running it.
    async fn submit(&self, inputs: Vec<String>) -> JobResult<JobRecord>;

    /// Gets a job by ID.
    async fn get(&self, job_id: &JobId) -> JobResult<JobRecord>;

    /// Lists jobs, newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>) -> JobResult<Vec<JobRecord>>;

    /// Cancels a pending or processing job.
    async fn cancel(&self, job_id: &JobId) -> JobResult<JobRecord>;

    /// Resubmits a failed or cancelled job immediately.
    async fn retry(&self, job_id: &JobId) -> JobResult<JobRecord>;

    /// Resubmits a failed or cancelled job after its backoff delay.
    async fn schedule_retry_for(&self, job_id: &JobId) -> JobResult<ScheduledRetry>;

    /// Schedules a backoff retry for every failed job.
    async fn retry_failed(&self) -> JobResult<Vec<ScheduledRetry>>;

    /// Subscribes to every job-state change from now on.
    fn subscribe(&self) -> Subscription;

    /// Removes a subscriber.
    fn unsubscribe(&self, id: SubscriberId) -> bool;
}

struct EngineInner {
    ledger: Arc<Ledger>,
    hub: Arc<NotificationHub>,
    runner: Arc<JobRunner>,
    scheduler: Arc<RetryScheduler>,
    shutting_down: AtomicBool,
}

/// The job lifecycle engine.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    /// Creates an engine over the given store and work unit.
    pub fn new(
        store: Arc<dyn JobStore>,
        work: Arc<dyn WorkUnit>,
        config: &EngineConfig,
    ) -> JobResult<Self> {
        config.validate()?;

        let hub = NotificationHub::new(config.hub.subscriber_buffer);
        let ledger = Arc::new(Ledger::new(store, hub.clone()));
        let runner = JobRunner::new(ledger.clone(), work, config.runner.clone());
        let scheduler = RetryScheduler::new(RetryPolicy::from(&config.retry));

        Ok(Self {
            inner: Arc::new(EngineInner {
                ledger,
                hub,
                runner,
                scheduler,
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Starts a run for an existing job. Returns `false` if it already has one.
    pub fn run(&self, job_id: &JobId) -> bool {
        self.inner.runner.spawn(job_id)
    }

    /// Job ids with an in-flight run.
    pub fn active_runs(&self) -> Vec<JobId> {
        self.inner.runner.active()
    }

    /// Job ids with a pending delayed retry.
    pub fn pending_retries(&self) -> Vec<JobId> {
        self.inner.scheduler.pending()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    /// Returns true once [`JobEngine::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Stops accepting work, drops pending retries and halts in-flight runs.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down job engine");
        self.inner.scheduler.shutdown();
        self.inner.runner.shutdown().await;
        info!("Job engine stopped");
    }

    fn ensure_accepting(&self) -> JobResult<()> {
        if self.is_shutting_down() {
            Err(JobError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

impl EngineInner {
    /// Claims a run for a job about to become pending.
    ///
    /// Called under the job's guard before committing. The run waits on the
    /// guard, so it starts from the committed record.
    fn claim_run(&self, job_id: &JobId) -> JobResult<()> {
        if self.runner.spawn(job_id) {
            return Ok(());
        }
        if self.runner.is_closed() {
            return Err(JobError::ShuttingDown);
        }
        debug!(job_id = %job_id, "Job already has a run waiting to start");
        Ok(())
    }

    async fn retry(&self, job_id: &JobId) -> JobResult<JobRecord> {
        let job = {
            let guard = self.ledger.lock(job_id).await;
            let mut job = guard.load().await?;
            job.reset_for_retry()?;
            self.claim_run(job_id)?;
            guard.commit(&job).await?;
            job
        };

        JobMetrics::job_retried(job.retry_count);
        info!(job_id = %job_id, retry_count = job.retry_count, "Job resubmitted");
        Ok(job)
    }

    async fn submit(&self, inputs: Vec<String>) -> JobResult<JobRecord> {
        let job = JobRecord::new(inputs)?;
        {
            let guard = self.ledger.lock(&job.id).await;
            self.claim_run(&job.id)?;
            guard.create(&job).await?;
        }

        JobMetrics::job_submitted();
        info!(job_id = %job.id, inputs = job.inputs.len(), "Job submitted");
        Ok(job)
    }
}

#[async_trait]
impl JobLifecycle for JobEngine {
    async fn submit(&self, inputs: Vec<String>) -> JobResult<JobRecord> {
        self.ensure_accepting()?;
        self.inner.submit(inputs).await
    }

    async fn get(&self, job_id: &JobId) -> JobResult<JobRecord> {
        self.inner
            .ledger
            .store()
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    async fn list(&self, status: Option<JobStatus>) -> JobResult<Vec<JobRecord>> {
        let mut jobs = self.inner.ledger.store().list(status).await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn cancel(&self, job_id: &JobId) -> JobResult<JobRecord> {
        let guard = self.inner.ledger.lock(job_id).await;
        let mut job = guard.load().await?;
        let from = job.status;
        job.cancel()?;
        guard.commit(&job).await?;
        let halted = self.inner.runner.acknowledge_cancel(job_id);
        drop(guard);

        JobMetrics::job_cancelled(from.as_str());
        info!(job_id = %job_id, from = %from, halted, "Job cancelled");
        Ok(job)
    }

    async fn retry(&self, job_id: &JobId) -> JobResult<JobRecord> {
        self.ensure_accepting()?;
        self.inner.retry(job_id).await
    }

    async fn schedule_retry_for(&self, job_id: &JobId) -> JobResult<ScheduledRetry> {
        self.ensure_accepting()?;

        let job = self.get(job_id).await?;
        if !job.can_retry() {
            return Err(JobError::invalid_state(&JobStatus::RETRYABLE, job.status));
        }

        let engine: Weak<EngineInner> = Arc::downgrade(&self.inner);
        Ok(self
            .inner
            .scheduler
            .schedule(job_id, job.retry_count, move |id| async move {
                match engine.upgrade() {
                    Some(engine) if !engine.shutting_down.load(Ordering::SeqCst) => {
                        engine.retry(&id).await
                    }
                    _ => Err(JobError::ShuttingDown),
                }
            }))
    }

    async fn retry_failed(&self) -> JobResult<Vec<ScheduledRetry>> {
        self.ensure_accepting()?;

        let failed = self.list(Some(JobStatus::Failed)).await?;
        let mut scheduled = Vec::with_capacity(failed.len());
        for job in failed {
            match self.schedule_retry_for(&job.id).await {
                Ok(entry) => scheduled.push(entry),
                // Changed status since the listing.
                Err(JobError::InvalidState { .. }) | Err(JobError::NotFound(_)) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to schedule retry");
                    return Err(e);
                }
            }
        }
        info!(jobs = scheduled.len(), "Scheduled retries for failed jobs");
        Ok(scheduled)
    }

    fn subscribe(&self) -> Subscription {
        self.inner.hub.subscribe()
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.hub.unsubscribe(id)
    }
}
