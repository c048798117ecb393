//! Job engine configuration.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Job runner configuration.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Retry backoff configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Notification hub configuration.
    #[serde(default)]
    pub hub: HubConfig,

    /// Simulated work unit configuration.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl EngineConfig {
    /// Checks values the engine cannot work with.
    ///
    /// Every problem found is reported in one error.
    pub fn validate(&self) -> JobResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(JobError::Configuration(problems.join("; ")))
        }
    }

    /// Describes each value the engine cannot work with.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.retry.base_delay_ms == 0 {
            problems.push("engine.retry.base_delay_ms must be greater than zero".to_string());
        }
        if self.retry.max_delay_units == 0 {
            problems.push("engine.retry.max_delay_units must be greater than zero".to_string());
        }
        if self.hub.subscriber_buffer == 0 {
            problems.push("engine.hub.subscriber_buffer must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.simulation.success_rate) {
            problems.push(format!(
                "engine.simulation.success_rate must be within [0, 1], got {}",
                self.simulation.success_rate
            ));
        }
        if self.simulation.step == 0 || self.simulation.step > 100 {
            problems.push(format!(
                "engine.simulation.step must be within 1..=100, got {}",
                self.simulation.step
            ));
        }
        problems
    }
}

/// Job runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum wall time of a single run in seconds (0 = unlimited).
    #[serde(default = "default_max_run")]
    pub max_run_secs: u64,

    /// Time to wait for in-flight runs on shutdown, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_run_secs: default_max_run(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl RunnerConfig {
    /// Returns the run time budget, if any.
    pub fn max_run(&self) -> Option<Duration> {
        (self.max_run_secs > 0).then(|| Duration::from_secs(self.max_run_secs))
    }

    /// Returns shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_max_run() -> u64 {
    300 // 5 minutes
}

fn default_shutdown_timeout() -> u64 {
    10
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Length of one backoff time unit in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap, in time units.
    #[serde(default = "default_max_delay_units")]
    pub max_delay_units: u64,

    /// Add random jitter to delays.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_units: default_max_delay_units(),
            jitter: false,
        }
    }
}

fn default_base_delay() -> u64 {
    1000 // 1 second
}

fn default_max_delay_units() -> u64 {
    60
}

/// Notification hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-subscriber buffer; a subscriber that falls this far behind is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    256
}

/// Simulated work unit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Progress increment between checkpoints.
    #[serde(default = "default_step")]
    pub step: u8,

    /// Delay between checkpoints in milliseconds.
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,

    /// Probability that an attempt succeeds.
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    /// Error reported by a failed attempt.
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            step_delay_ms: default_step_delay(),
            success_rate: default_success_rate(),
            failure_message: default_failure_message(),
        }
    }
}

impl SimulationConfig {
    /// Returns the checkpoint delay as Duration.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

fn default_step() -> u8 {
    20
}

fn default_step_delay() -> u64 {
    2000
}

fn default_success_rate() -> f64 {
    0.8
}

fn default_failure_message() -> String {
    "Mock processing error occurred".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_delay_units, 60);
        assert_eq!(config.runner.max_run(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_zero_max_run_means_unlimited() {
        let config = RunnerConfig {
            max_run_secs: 0,
            ..RunnerConfig::default()
        };
        assert!(config.max_run().is_none());
    }

    #[test]
    fn test_rejects_out_of_range_success_rate() {
        let mut config = EngineConfig::default();
        config.simulation.success_rate = 1.5;
        assert!(matches!(config.validate(), Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = EngineConfig::default();
        config.retry.max_delay_units = 0;
        config.simulation.step = 101;

        let problems = config.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("engine.retry.max_delay_units"));
        assert!(problems[1].contains("got 101"));
        match config.validate() {
            Err(JobError::Configuration(message)) => assert_eq!(message, problems.join("; ")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let mut config = EngineConfig::default();
        config.hub.subscriber_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"retry": {"jitter": true}}"#).unwrap();
        assert!(config.retry.jitter);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.simulation.step, 20);
    }
}
