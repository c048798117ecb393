//! Jobline Engine - Job Lifecycle & Notification Engine
//!
//! Drives jobs from submission to a terminal state and pushes every change to
//! interested observers:
//! - Job records with an explicit status state machine
//! - One background runner per job attempt, cancellable at every checkpoint
//! - Exponential backoff retries, one pending retry per job
//! - Fan-out of job snapshots to any number of subscribers
//! - Pluggable storage ([`JobStore`]) and work ([`WorkUnit`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         JobEngine                            │
//! │   submit / get / list / cancel / retry / subscribe           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   ┌──────────────┐   commit    ┌──────────┐   publish        │
//! │   │  JobRunner   │ ──────────▶ │  Ledger  │ ──────────┐      │
//! │   │ (1 per job)  │             │ per-job  │           ▼      │
//! │   └──────┬───────┘             │  locks   │   ┌─────────────┐│
//! │          │ start               └────┬─────┘   │Notification ││
//! │          ▼                          │         │    Hub      ││
//! │   ┌──────────────┐                  ▼         └──────┬──────┘│
//! │   │   WorkUnit   │            ┌──────────┐           │       │
//! │   └──────────────┘            │ JobStore │           ▼       │
//! │                               └──────────┘      Subscribers  │
//! │   ┌──────────────┐                                           │
//! │   │RetryScheduler│ ── after backoff ──▶ retry                │
//! │   └──────────────┘                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jobline_engine::{EngineConfig, InMemoryJobStore, JobEngine, JobLifecycle, SimulatedWorkUnit};
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let engine = JobEngine::new(
//!     Arc::new(InMemoryJobStore::new()),
//!     Arc::new(SimulatedWorkUnit::from(&config.simulation)),
//!     &config,
//! )?;
//!
//! let mut updates = engine.subscribe();
//! let job = engine.submit(vec!["report.csv".to_string()]).await?;
//! while let Some(snapshot) = updates.recv().await {
//!     println!("{} {} {}%", snapshot.id, snapshot.status, snapshot.progress);
//! }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod job;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod store;
pub mod work;

pub use config::{EngineConfig, HubConfig, RetryConfig, RunnerConfig, SimulationConfig};
pub use error::{JobError, JobResult};
pub use hub::{NotificationHub, SubscriberId, Subscription};
pub use job::{JobId, JobRecord, JobStatus};
pub use lifecycle::{JobEngine, JobLifecycle};
pub use metrics::{register_metrics, HubMetrics, JobMetrics, RunnerMetrics};
pub use retry::{RetryPolicy, RetryScheduler, ScheduledRetry};
pub use runner::JobRunner;
pub use store::{InMemoryJobStore, JobStore};
pub use work::{SimulatedWorkUnit, WorkEvent, WorkStream, WorkUnit};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::job::{JobRecord, JobStatus};
    pub use crate::lifecycle::{JobEngine, JobLifecycle};
    pub use crate::store::JobStore;
    pub use crate::work::WorkUnit;
    pub use crate::{JobError, JobId, JobResult};
}
