//! Core Service Layer
//!
//! Shared infrastructure for the relay server: configuration, errors,
//! authentication, data models and the message log.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod error;
pub mod models;
pub mod store;

// Re-exports for convenience
pub use config::{AppState, RelayConfig};
pub use ctx::Ctx;
pub use error::{Error, Result};
