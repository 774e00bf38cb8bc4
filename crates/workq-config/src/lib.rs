//! # workq-config
//!
//! Layered configuration for the workq job queue: TOML files per
//! environment plus `WORKQ__`-prefixed environment variables.

mod app_config;
mod error;
mod loader;

pub use app_config::*;
pub use error::ConfigError;
pub use loader::{validate, ConfigLoader};
