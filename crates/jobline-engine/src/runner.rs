//! Job runner: drives one attempt of a job through its work unit.

use crate::config::RunnerConfig;
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::ledger::{JobGuard, Ledger};
use crate::metrics::{JobMetrics, RunnerMetrics};
use crate::work::{WorkEvent, WorkUnit};
use futures::future::{self, Either};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Message recorded when a run is halted by engine shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Job interrupted by shutdown";

/// Message recorded when the work unit's stream ends without an outcome.
pub const NO_OUTCOME_MESSAGE: &str = "Work unit finished without reporting an outcome";

/// Signal sent to an in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Running,
    Cancelled,
    Shutdown,
}

struct InFlight {
    generation: u64,
    halt: watch::Sender<Halt>,
    handle: Option<JoinHandle<()>>,
}

enum Checkpoint {
    Continue,
    Stop,
}

/// Runs jobs, at most one attempt per job id at a time.
pub struct JobRunner {
    ledger: Arc<Ledger>,
    work: Arc<dyn WorkUnit>,
    config: RunnerConfig,
    in_flight: Mutex<HashMap<JobId, InFlight>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl JobRunner {
    /// Creates a runner.
    pub fn new(ledger: Arc<Ledger>, work: Arc<dyn WorkUnit>, config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            work,
            config,
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Starts a run for the job in the background.
    ///
    /// Returns `false` when the job already has an in-flight run or the
    /// runner has been shut down.
    pub fn spawn(self: &Arc<Self>, job_id: &JobId) -> bool {
        let mut in_flight = self.in_flight.lock();
        if self.closed.load(Ordering::SeqCst) {
            debug!(job_id = %job_id, "Runner closed, not starting job");
            return false;
        }
        if in_flight.contains_key(job_id) {
            debug!(job_id = %job_id, "Job already has an in-flight run");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (halt, halt_rx) = watch::channel(Halt::Running);

        let runner = Arc::clone(self);
        let id = job_id.clone();
        let span = info_span!("job_run", job_id = %job_id, generation);
        let handle = tokio::spawn(
            async move {
                runner.run(id, generation, halt_rx).await;
            }
            .instrument(span),
        );

        in_flight.insert(
            job_id.clone(),
            InFlight {
                generation,
                halt,
                handle: Some(handle),
            },
        );
        RunnerMetrics::update_active(in_flight.len());
        true
    }

    /// Stops the job's in-flight run after a committed cancellation.
    ///
    /// Must be called while holding the job's lock, so the run cannot commit
    /// anything after the cancellation.
    pub fn acknowledge_cancel(&self, job_id: &JobId) -> bool {
        let removed = {
            let mut in_flight = self.in_flight.lock();
            let removed = in_flight.remove(job_id);
            RunnerMetrics::update_active(in_flight.len());
            removed
        };

        match removed {
            Some(entry) => {
                let _ = entry.halt.send(Halt::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Returns true once [`JobRunner::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Job ids with an in-flight run.
    pub fn active(&self) -> Vec<JobId> {
        self.in_flight.lock().keys().cloned().collect()
    }

    /// Returns true if the job has an in-flight run.
    pub fn is_running(&self, job_id: &JobId) -> bool {
        self.in_flight.lock().contains_key(job_id)
    }

    /// Halts every in-flight run and waits for them to record their outcome.
    ///
    /// Runs still going after the configured timeout are aborted.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            // Closing under the map lock means every successful spawn is seen here.
            let mut in_flight = self.in_flight.lock();
            self.closed.store(true, Ordering::SeqCst);
            in_flight
                .values_mut()
                .filter_map(|entry| {
                    let _ = entry.halt.send(Halt::Shutdown);
                    entry.handle.take()
                })
                .collect()
        };

        if handles.is_empty() {
            return;
        }

        info!(runs = handles.len(), "Waiting for in-flight runs to stop");
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, future::join_all(handles))
            .await
            .is_err()
        {
            warn!(timeout_secs = timeout.as_secs(), "Aborting runs that did not stop in time");
            for abort in aborts {
                abort.abort();
            }
        }

        let mut in_flight = self.in_flight.lock();
        in_flight.clear();
        RunnerMetrics::update_active(0);
    }

    async fn run(self: Arc<Self>, job_id: JobId, generation: u64, mut halt: watch::Receiver<Halt>) {
        let started = Instant::now();

        let job = match self.begin(&job_id, generation).await {
            Some(job) => job,
            None => return,
        };
        info!(inputs = job.inputs.len(), retry_count = job.retry_count, "Job started");

        let mut events = match self.work.start(&job_id, &job.inputs).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Work unit failed to start");
                self.finish(&job_id, generation, Err(e.to_string()), started).await;
                return;
            }
        };

        let deadline = self.config.max_run().map(|limit| started + limit);
        let expiry = match deadline {
            Some(deadline) => Either::Left(sleep_until(deadline)),
            None => Either::Right(future::pending::<()>()),
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;

                changed = halt.changed() => {
                    let signal = match changed {
                        Ok(()) => *halt.borrow_and_update(),
                        Err(_) => Halt::Cancelled,
                    };
                    match signal {
                        Halt::Running => continue,
                        Halt::Cancelled => {
                            info!("Job cancelled, stopping run");
                            return;
                        }
                        Halt::Shutdown => {
                            self.finish(&job_id, generation, Err(SHUTDOWN_MESSAGE.to_string()), started)
                                .await;
                            return;
                        }
                    }
                }

                _ = &mut expiry => {
                    let secs = self.config.max_run_secs;
                    warn!(max_run_secs = secs, "Job exceeded its run time budget");
                    self.finish(&job_id, generation, Err(JobError::Timeout(secs).to_string()), started)
                        .await;
                    return;
                }

                event = events.next() => {
                    let outcome = match event {
                        Some(Ok(WorkEvent::Progress(value))) => {
                            match self.checkpoint(&job_id, generation, value).await {
                                Checkpoint::Continue => continue,
                                Checkpoint::Stop => return,
                            }
                        }
                        Some(Ok(WorkEvent::Succeeded)) => Ok(()),
                        Some(Ok(WorkEvent::Failed(message))) => Err(message),
                        Some(Err(e)) => Err(e.to_string()),
                        None => Err(NO_OUTCOME_MESSAGE.to_string()),
                    };
                    self.finish(&job_id, generation, outcome, started).await;
                    return;
                }
            }
        }
    }

    /// `Pending -> Processing`, if this run still owns the job.
    async fn begin(&self, job_id: &JobId, generation: u64) -> Option<JobRecord> {
        let guard = self.ledger.lock(job_id).await;
        if !self.owns(job_id, generation) {
            return None;
        }

        let mut job = match guard.find().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("Job no longer exists, nothing to run");
                self.release(job_id, generation);
                return None;
            }
            Err(e) => {
                error!(error = %e, "Failed to load job");
                self.release(job_id, generation);
                return None;
            }
        };

        if job.status != JobStatus::Pending {
            debug!(status = %job.status, "Job is not pending, nothing to run");
            self.release(job_id, generation);
            return None;
        }

        if let Err(e) = self.apply(&guard, &mut job, JobRecord::start).await {
            error!(error = %e, "Failed to mark job as processing");
            self.release(job_id, generation);
            return None;
        }
        Some(job)
    }

    async fn checkpoint(&self, job_id: &JobId, generation: u64, progress: u8) -> Checkpoint {
        let guard = self.ledger.lock(job_id).await;
        if !self.owns(job_id, generation) {
            debug!(progress, "Run no longer owns the job, stopping");
            return Checkpoint::Stop;
        }

        let mut job = match guard.load().await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Failed to load job at checkpoint");
                self.release(job_id, generation);
                return Checkpoint::Stop;
            }
        };

        if job.status != JobStatus::Processing {
            debug!(status = %job.status, "Job left processing, stopping run");
            self.release(job_id, generation);
            return Checkpoint::Stop;
        }

        let before = job.clone();
        match job.advance_progress(progress) {
            Ok(false) => return Checkpoint::Continue,
            Ok(true) => {}
            Err(e) => {
                error!(error = %e, "Rejected progress update");
                self.release(job_id, generation);
                return Checkpoint::Stop;
            }
        }

        match guard.commit(&job).await {
            Ok(()) => {
                debug!(progress = job.progress, "Job progress");
                Checkpoint::Continue
            }
            Err(e) => {
                error!(error = %e, "Failed to persist progress, failing job");
                let mut failed = before;
                let message = format!("Failed to persist progress: {}", e);
                if let Err(e) = self.apply(&guard, &mut failed, |job| job.fail(message)).await {
                    error!(error = %e, "Failed to mark job as failed");
                }
                self.release(job_id, generation);
                Checkpoint::Stop
            }
        }
    }

    async fn finish(
        &self,
        job_id: &JobId,
        generation: u64,
        outcome: Result<(), String>,
        started: Instant,
    ) {
        let guard = self.ledger.lock(job_id).await;
        if !self.owns(job_id, generation) {
            debug!("Run no longer owns the job, discarding outcome");
            return;
        }

        let result = match guard.load().await {
            Ok(mut job) if job.status == JobStatus::Processing => match outcome {
                Ok(()) => self
                    .apply(&guard, &mut job, JobRecord::complete)
                    .await
                    .map(|_| true),
                Err(message) => {
                    let reason = failure_reason(&message);
                    self.apply(&guard, &mut job, |job| job.fail(message))
                        .await
                        .map(|_| {
                            JobMetrics::job_failed(reason, started.elapsed());
                            false
                        })
                }
            },
            Ok(job) => {
                debug!(status = %job.status, "Job left processing, discarding outcome");
                self.release(job_id, generation);
                return;
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => {
                JobMetrics::job_completed(started.elapsed());
                info!(elapsed_ms = elapsed_ms(started), "Job completed");
            }
            Ok(false) => info!(elapsed_ms = elapsed_ms(started), "Job failed"),
            Err(e) => error!(error = %e, "Failed to record job outcome"),
        }
        self.release(job_id, generation);
    }

    async fn apply<F>(&self, guard: &JobGuard<'_>, job: &mut JobRecord, transition: F) -> JobResult<()>
    where
        F: FnOnce(&mut JobRecord) -> JobResult<()>,
    {
        transition(job)?;
        guard.commit(job).await
    }

    fn owns(&self, job_id: &JobId, generation: u64) -> bool {
        self.in_flight
            .lock()
            .get(job_id)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn release(&self, job_id: &JobId, generation: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(job_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            in_flight.remove(job_id);
            RunnerMetrics::update_active(in_flight.len());
        }
    }
}

fn failure_reason(message: &str) -> &'static str {
    if message == SHUTDOWN_MESSAGE {
        "shutdown"
    } else if message.starts_with("Job timed out") {
        "timeout"
    } else {
        "work_unit"
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
