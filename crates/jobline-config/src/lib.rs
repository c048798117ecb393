//! # Jobline Config
//!
//! Configuration management for Jobline.
//! Supports layered configuration from files, environment variables,
//! and runtime refresh.

mod app_config;
mod error;
mod loader;
mod validation;

pub use app_config::*;
pub use error::*;
pub use loader::*;
pub use validation::*;
