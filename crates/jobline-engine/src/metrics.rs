//! Prometheus-style metrics for the job engine.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless the
//! host installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job engine.
pub mod names {
    /// Total jobs submitted.
    pub const JOBS_SUBMITTED_TOTAL: &str = "jobline_jobs_submitted_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "jobline_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "jobline_jobs_failed_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "jobline_jobs_cancelled_total";
    /// Total jobs resubmitted through retry.
    pub const JOBS_RETRIED_TOTAL: &str = "jobline_jobs_retried_total";
    /// Total delayed retries scheduled.
    pub const RETRIES_SCHEDULED_TOTAL: &str = "jobline_retries_scheduled_total";

    /// Current in-flight runners.
    pub const RUNNERS_ACTIVE: &str = "jobline_runners_active";
    /// Current hub subscribers.
    pub const SUBSCRIBERS: &str = "jobline_subscribers";

    /// Run duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "jobline_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SUBMITTED_TOTAL,
        "Total number of jobs submitted"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of job attempts that failed"
    );
    describe_counter!(
        names::JOBS_CANCELLED_TOTAL,
        "Total number of jobs cancelled"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of job retries"
    );
    describe_counter!(
        names::RETRIES_SCHEDULED_TOTAL,
        "Total number of delayed retries scheduled"
    );

    describe_gauge!(
        names::RUNNERS_ACTIVE,
        "Current number of in-flight job runners"
    );
    describe_gauge!(
        names::SUBSCRIBERS,
        "Current number of notification subscribers"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job run duration in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job submitted.
    pub fn job_submitted() {
        counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failed.
    pub fn job_failed(reason: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "reason" => reason.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job cancelled.
    pub fn job_cancelled(from: &str) {
        counter!(
            names::JOBS_CANCELLED_TOTAL,
            "from" => from.to_string()
        )
        .increment(1);
    }

    /// Record a job retried.
    pub fn job_retried(retry_count: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "attempt" => retry_count.to_string()
        )
        .increment(1);
    }

    /// Record a delayed retry scheduled.
    pub fn retry_scheduled(delay: Duration) {
        counter!(
            names::RETRIES_SCHEDULED_TOTAL,
            "delay_secs" => delay.as_secs().to_string()
        )
        .increment(1);
    }
}

/// Runner metrics recorder.
#[derive(Clone)]
pub struct RunnerMetrics;

impl RunnerMetrics {
    /// Update in-flight runner count.
    pub fn update_active(active: usize) {
        gauge!(names::RUNNERS_ACTIVE).set(active as f64);
    }
}

/// Hub metrics recorder.
#[derive(Clone)]
pub struct HubMetrics;

impl HubMetrics {
    /// Update subscriber count.
    pub fn update_subscribers(count: usize) {
        gauge!(names::SUBSCRIBERS).set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // Just verify registration doesn't panic
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_submitted();
        JobMetrics::job_completed(Duration::from_secs(1));
        JobMetrics::job_failed("work_unit", Duration::from_secs(5));
        JobMetrics::job_cancelled("processing");
        JobMetrics::job_retried(1);
        JobMetrics::retry_scheduled(Duration::from_secs(2));
        RunnerMetrics::update_active(3);
        HubMetrics::update_subscribers(0);
    }
}
