//! Application assembly.

use anyhow::Context;
use axum::Router;
use jobline_config::AppConfig;
use jobline_engine::{
    register_metrics, InMemoryJobStore, JobEngine, JobStore, SimulatedWorkUnit,
};
use jobline_repository::{create_pool, DatabasePool, SqliteJobStore};
use jobline_rest::{create_router, AppState};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A fully wired application, ready to serve.
pub struct App {
    config: AppConfig,
    engine: JobEngine,
    pool: Option<DatabasePool>,
}

impl App {
    /// Builds storage and the engine from configuration.
    ///
    /// An empty `database.url` keeps jobs in memory.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        register_metrics();

        let (store, pool): (Arc<dyn JobStore>, Option<DatabasePool>) =
            if config.database.is_persistent() {
                let pool = create_pool(&config.database)
                    .await
                    .context("Failed to open job database")?;
                (Arc::new(SqliteJobStore::new(pool.clone())), Some(pool))
            } else {
                info!("No database configured, keeping jobs in memory");
                (Arc::new(InMemoryJobStore::new()), None)
            };

        let work = Arc::new(SimulatedWorkUnit::from(&config.engine.simulation));
        let engine = JobEngine::new(store, work, &config.engine)
            .context("Failed to create job engine")?;

        Ok(Self {
            config,
            engine,
            pool,
        })
    }

    /// Returns the job engine.
    pub fn engine(&self) -> &JobEngine {
        &self.engine
    }

    /// Builds the HTTP router over this application's engine.
    pub fn router(&self) -> Router {
        create_router(AppState::new(self.engine.clone()), &self.config.server)
    }

    /// Serves HTTP until `shutdown` resolves.
    ///
    /// The engine is stopped as soon as the signal arrives, so in-flight jobs
    /// reach a terminal state before open connections drain.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let engine = self.engine.clone();

        if let Ok(addr) = listener.local_addr() {
            info!("Starting REST server on http://{}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                engine.shutdown().await;
            })
            .await
            .context("REST server error")?;

        self.engine.shutdown().await;
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        Ok(())
    }
}
