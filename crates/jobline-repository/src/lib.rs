//! # Jobline Repository
//!
//! SQLite persistence for job records.
//!
//! ```text
//! JobEngine
//!   ↓  Arc<dyn JobStore>   (engine interface)
//! SqliteJobStore           (SQLx)
//!   ↓  DatabasePool
//! SQLite
//! ```

pub mod pool;
pub mod sqlite;

pub use pool::{create_pool, DatabasePool};
pub use sqlite::SqliteJobStore;

use jobline_engine::JobError;

/// Maps a SQLx failure into the engine's storage error.
pub(crate) fn storage_error(context: &str, err: sqlx::Error) -> JobError {
    tracing::warn!(error = %err, "{}", context);
    JobError::StorageUnavailable(format!("{}: {}", context, err))
}
