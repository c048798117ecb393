//! # Jobline Server Library
//!
//! Wires configuration, storage, the job engine and the HTTP surface into a
//! runnable application.

pub mod app;
pub mod startup;

pub use app::App;
