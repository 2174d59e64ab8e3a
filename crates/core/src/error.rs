//! Core error types

use thiserror::Error;

/// Configuration error raised while loading or validating [`ServerConfig`](crate::ServerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed
    #[error("Failed to load configuration from '{path}': {reason}")]
    Load { path: String, reason: String },

    /// A single option holds a value outside of its accepted range
    #[error("Invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    /// Two options were set that cannot be used together
    #[error("Conflicting configuration: '{first}' cannot be combined with '{second}'")]
    MutuallyExclusive { first: String, second: String },

    /// The configuration could not be written back as TOML
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
}

impl ConfigError {
    pub fn load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn exclusive(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::MutuallyExclusive {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
