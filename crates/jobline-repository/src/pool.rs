//! Database connection pool management.

use crate::storage_error;
use jobline_config::DatabaseConfig;
use jobline_engine::{JobError, JobResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY NOT NULL,
    inputs      TEXT NOT NULL,
    status      TEXT NOT NULL,
    progress    INTEGER NOT NULL DEFAULT 0,
    error       TEXT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs (created_at);
"#;

/// Database pool wrapper.
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Connects to SQLite and creates the schema if needed.
    ///
    /// In-memory databases are held on a single connection that never
    /// expires, since each connection would otherwise see its own database.
    pub async fn connect(config: &DatabaseConfig) -> JobResult<Self> {
        info!("Connecting to SQLite database...");

        if !config.url.starts_with("sqlite:") {
            return Err(JobError::Configuration(format!(
                "unsupported database URL: {}",
                config.url
            )));
        }

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| storage_error("Invalid database URL", e))?
            .create_if_missing(true);

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let mut pool_options =
            SqlitePoolOptions::new().acquire_timeout(config.connect_timeout());
        pool_options = if in_memory {
            pool_options
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| storage_error("Failed to connect", e))?;

        let pool = Self { pool };
        pool.ensure_schema().await?;
        info!(in_memory, "SQLite connection pool established");
        Ok(pool)
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if the database connection is healthy.
    pub async fn health_check(&self) -> JobResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Health check failed", e))?;
        Ok(())
    }

    /// Closes the database pool.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    async fn ensure_schema(&self) -> JobResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Schema creation failed", e))?;
        Ok(())
    }
}

/// Creates a database pool from configuration.
pub async fn create_pool(config: &DatabaseConfig) -> JobResult<DatabasePool> {
    DatabasePool::connect(config).await
}
