//! Application state for Axum handlers.

use jobline_engine::JobEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: JobEngine,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(engine: JobEngine) -> Self {
        Self { engine }
    }
}
