//! Error types for settings handling.

use thiserror::Error;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Configuration could not be built or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings loaded but are not usable
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for SettingsError {
    fn from(err: config::ConfigError) -> Self {
        SettingsError::Config(err.to_string())
    }
}
