//! Configuration errors.

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// The merged configuration violates a constraint.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
