//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by security and registration stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Shared backend target is malformed or the first connection failed.
    #[error("Shared backend '{target}' is unreachable: {reason}")]
    BackendUnreachable { target: String, reason: String },

    /// A pre-shared-key identity is already bound to another endpoint.
    #[error("PSK identity '{identity}' is already used by endpoint '{owner}'")]
    NonUniqueIdentity { identity: String, owner: String },

    /// Local backend file could not be read or written.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shared backend command failed after startup.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    pub fn unreachable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn non_unique(identity: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::NonUniqueIdentity {
            identity: identity.into(),
            owner: owner.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by the caller's input rather than the backend.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::NonUniqueIdentity { .. })
    }

    /// Backend or disk is gone; further requests will fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendUnreachable { .. } | Self::Io { .. })
    }
}
