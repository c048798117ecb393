//! # Jobline Server
//!
//! Main entry point for the Jobline job service.

use anyhow::Context;
use jobline_config::ConfigLoader;
use jobline_server::{
    startup::{init_logging, print_startup_info, shutdown_signal},
    App,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_loader =
        ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config = config_loader.get().await;

    init_logging(&config.observability);

    info!("Starting Jobline Server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let addr = config.server.addr();
    let persistent = config.database.is_persistent();
    let app = App::build(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    print_startup_info(&addr, persistent);

    app.serve(listener, shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}
