//! # Jobline REST
//!
//! HTTP and WebSocket surface for the job engine.
//! Provides endpoints for submitting, inspecting, cancelling and retrying
//! jobs, a `/ws` feed of job snapshots, and health checks.

pub mod controllers;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
