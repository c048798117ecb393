//! Retry backoff policy and the delayed retry scheduler.

use crate::config::RetryConfig;
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord};
use crate::metrics::JobMetrics;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Exponential backoff: `min(2^retry_count, cap)` time units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Length of one time unit in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum number of time units.
    pub max_delay_units: u64,

    /// Add random jitter to delays.
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000, // 1 second
            max_delay_units: 60,
            jitter: false,
            jitter_factor: 0.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let policy = Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_units: config.max_delay_units,
            ..Self::default()
        };
        if config.jitter {
            policy.with_jitter(0.1)
        } else {
            policy
        }
    }
}

impl RetryPolicy {
    /// Sets the time unit.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the cap, in time units.
    pub fn with_max_units(mut self, units: u64) -> Self {
        self.max_delay_units = units;
        self
    }

    /// Enables jitter.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self.jitter_factor = 0.0;
        self
    }

    /// Number of time units to wait before the retry following `retry_count`
    /// earlier retries.
    pub fn backoff_units(&self, retry_count: u32) -> u64 {
        1u64.checked_shl(retry_count)
            .unwrap_or(u64::MAX)
            .min(self.max_delay_units)
    }

    /// Calculate the delay for a job that has been retried `retry_count` times.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = self
            .backoff_units(retry_count)
            .saturating_mul(self.base_delay_ms);

        // Apply jitter if enabled
        let final_delay = if self.jitter && self.jitter_factor > 0.0 {
            let jitter_range = (delay as f64 * self.jitter_factor) as u64;
            if jitter_range == 0 {
                delay
            } else {
                let jitter = rand::thread_rng().gen_range(0..=jitter_range);
                delay.saturating_add(jitter).saturating_sub(jitter_range / 2)
            }
        } else {
            delay
        };

        Duration::from_millis(final_delay)
    }
}

/// Outcome of a delayed retry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRetry {
    /// Job to be retried.
    pub job_id: JobId,

    /// Retry count the delay was computed from.
    pub retry_count: u32,

    /// Delay before the retry runs.
    #[serde(with = "duration_secs")]
    #[serde(rename = "delay_secs")]
    pub delay: Duration,

    /// True if an earlier request was already pending; this one was dropped.
    pub already_scheduled: bool,
}

mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(delay.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

struct PendingRetry {
    token: u64,
    retry_count: u32,
    delay: Duration,
    handle: JoinHandle<()>,
}

/// Runs retries after a backoff delay, one pending retry per job.
pub struct RetryScheduler {
    policy: RetryPolicy,
    pending: Mutex<HashMap<JobId, PendingRetry>>,
    next_token: AtomicU64,
}

impl RetryScheduler {
    /// Creates a scheduler with the given policy.
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Backoff policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `retry` for the job once the backoff for `retry_count` elapses.
    ///
    /// Never waits for the delay. If a retry for the job is already pending,
    /// nothing new is scheduled and the pending one is reported.
    pub fn schedule<F, Fut>(self: &Arc<Self>, job_id: &JobId, retry_count: u32, retry: F) -> ScheduledRetry
    where
        F: FnOnce(JobId) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult<JobRecord>> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(job_id) {
            debug!(job_id = %job_id, "Retry already scheduled");
            return ScheduledRetry {
                job_id: job_id.clone(),
                retry_count: existing.retry_count,
                delay: existing.delay,
                already_scheduled: true,
            };
        }

        let delay = self.policy.delay_for(retry_count);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::downgrade(self);
        let id = job_id.clone();
        let span = tracing::info_span!("delayed_retry", job_id = %job_id, retry_count);

        let handle = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;

                match retry(id.clone()).await {
                    Ok(job) => info!(retry_count = job.retry_count, "Delayed retry submitted"),
                    Err(JobError::InvalidState { actual, .. }) => {
                        debug!(status = %actual, "Job no longer retryable, skipping delayed retry")
                    }
                    Err(e) => warn!(error = %e, "Delayed retry failed"),
                }

                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.forget(&id, token);
                }
            }
            .instrument(span),
        );

        pending.insert(
            job_id.clone(),
            PendingRetry {
                token,
                retry_count,
                delay,
                handle,
            },
        );
        JobMetrics::retry_scheduled(delay);
        info!(job_id = %job_id, retry_count, delay_ms = delay.as_millis() as u64, "Retry scheduled");

        ScheduledRetry {
            job_id: job_id.clone(),
            retry_count,
            delay,
            already_scheduled: false,
        }
    }

    /// Job ids with a pending retry.
    pub fn pending(&self) -> Vec<JobId> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Returns true if the job has a pending retry.
    pub fn is_pending(&self, job_id: &JobId) -> bool {
        self.pending.lock().contains_key(job_id)
    }

    /// Aborts every pending retry.
    pub fn shutdown(&self) {
        let drained: Vec<(JobId, PendingRetry)> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            info!(retries = drained.len(), "Aborting pending retries");
        }
        for (_, entry) in drained {
            entry.handle.abort();
        }
    }

    fn forget(&self, job_id: &JobId, token: u64) {
        let mut pending = self.pending.lock();
        if pending.get(job_id).is_some_and(|entry| entry.token == token) {
            pending.remove(job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::sync::atomic::AtomicUsize;

    fn unit_policy() -> RetryPolicy {
        RetryPolicy::default().without_jitter()
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = unit_policy();

        assert_eq!(policy.backoff_units(0), 1);
        assert_eq!(policy.backoff_units(1), 2);
        assert_eq!(policy.backoff_units(3), 8);
        assert_eq!(policy.backoff_units(5), 32);
        assert_eq!(policy.backoff_units(6), 60);
        assert_eq!(policy.backoff_units(10), 60);
        assert_eq!(policy.backoff_units(u32::MAX), 60);
    }

    #[test]
    fn test_delay_uses_time_unit() {
        let policy = unit_policy();
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));

        let fast = unit_policy().with_base_delay(Duration::from_millis(10));
        assert_eq!(fast.delay_for(2), Duration::from_millis(40));
    }

    #[test]
    fn test_jitter_stays_near_delay() {
        let policy = unit_policy().with_jitter(0.1);
        for _ in 0..50 {
            let delay = policy.delay_for(3);
            assert!(delay >= Duration::from_millis(7600));
            assert!(delay <= Duration::from_millis(8400));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            base_delay_ms: 500,
            max_delay_units: 8,
            jitter: true,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.backoff_units(9), 8);
        assert!(policy.jitter);
    }

    fn counting_retry(
        calls: Arc<AtomicUsize>,
    ) -> impl FnOnce(JobId) -> futures::future::BoxFuture<'static, JobResult<JobRecord>> {
        move |_id| {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut job = JobRecord::new(vec!["a.txt".into()])?;
                job.retry_count = 4;
                Ok(job)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_runs_after_delay() {
        let scheduler = RetryScheduler::new(unit_policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = JobId::new();

        let scheduled = scheduler.schedule(&id, 3, counting_retry(calls.clone()));
        assert_eq!(scheduled.delay, Duration::from_secs(8));
        assert!(!scheduled.already_scheduled);
        assert!(scheduler.is_pending(&id));

        tokio::time::sleep(Duration::from_millis(7900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_does_not_schedule_again() {
        let scheduler = RetryScheduler::new(unit_policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = JobId::new();

        let first = scheduler.schedule(&id, 2, counting_retry(calls.clone()));
        let second = scheduler.schedule(&id, 5, counting_retry(calls.clone()));

        assert!(!first.already_scheduled);
        assert!(second.already_scheduled);
        assert_eq!(second.delay, first.delay);
        assert_eq!(scheduler.pending(), vec![id.clone()]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_state_is_a_no_op() {
        let scheduler = RetryScheduler::new(unit_policy());
        let id = JobId::new();

        scheduler.schedule(&id, 0, |_id| async {
            Err(JobError::invalid_state(
                &JobStatus::RETRYABLE,
                JobStatus::Completed,
            ))
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!scheduler.is_pending(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending_retries() {
        let scheduler = RetryScheduler::new(unit_policy());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = JobId::new();

        scheduler.schedule(&id, 1, counting_retry(calls.clone()));
        scheduler.shutdown();
        assert!(scheduler.pending().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
