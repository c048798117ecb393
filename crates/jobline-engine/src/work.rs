//! Work units: the injected capability that performs a job's actual work.

use crate::config::SimulationConfig;
use crate::error::{JobError, JobResult};
use crate::job::JobId;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use std::time::Duration;

/// Event reported by a running work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkEvent {
    /// Progress checkpoint, 0 to 100.
    Progress(u8),
    /// The attempt succeeded.
    Succeeded,
    /// The attempt failed with a message.
    Failed(String),
}

impl WorkEvent {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkEvent::Progress(_))
    }
}

/// Lazy, finite stream of events for one attempt.
pub type WorkStream = BoxStream<'static, Result<WorkEvent, JobError>>;

/// Performs the work of one job attempt.
///
/// The returned stream is driven by the runner; dropping it abandons the
/// attempt.
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Starts an attempt for the job.
    async fn start(&self, job_id: &JobId, inputs: &[String]) -> JobResult<WorkStream>;
}

/// Work unit that sleeps through evenly spaced checkpoints and then picks a
/// random outcome.
#[derive(Debug, Clone)]
pub struct SimulatedWorkUnit {
    step: u8,
    step_delay: Duration,
    success_rate: f64,
    failure_message: String,
}

impl SimulatedWorkUnit {
    /// Creates a simulated work unit.
    pub fn new(step: u8, step_delay: Duration, success_rate: f64) -> Self {
        Self {
            step: step.clamp(1, 100),
            step_delay,
            success_rate: success_rate.clamp(0.0, 1.0),
            failure_message: "Mock processing error occurred".to_string(),
        }
    }

    /// Sets the message reported on failure.
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    fn checkpoints(&self) -> Vec<u8> {
        let mut values: Vec<u8> = (0..=100u8).step_by(self.step as usize).collect();
        if values.last() != Some(&100) {
            values.push(100);
        }
        values
    }
}

impl From<&SimulationConfig> for SimulatedWorkUnit {
    fn from(config: &SimulationConfig) -> Self {
        Self::new(config.step, config.step_delay(), config.success_rate)
            .with_failure_message(config.failure_message.clone())
    }
}

#[async_trait]
impl WorkUnit for SimulatedWorkUnit {
    async fn start(&self, _job_id: &JobId, _inputs: &[String]) -> JobResult<WorkStream> {
        let delay = self.step_delay;
        let progress = stream::iter(self.checkpoints()).then(move |value| async move {
            tokio::time::sleep(delay).await;
            Ok(WorkEvent::Progress(value))
        });

        let success_rate = self.success_rate;
        let failure_message = self.failure_message.clone();
        let outcome = stream::once(async move {
            let succeeded = rand::thread_rng().gen_bool(success_rate);
            Ok(if succeeded {
                WorkEvent::Succeeded
            } else {
                WorkEvent::Failed(failure_message)
            })
        });

        Ok(progress.chain(outcome).boxed())
    }
}
