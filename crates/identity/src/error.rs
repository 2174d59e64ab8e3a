//! Error types for server credential resolution.
//!
//! Every variant is fatal to startup. Resolution never returns a partially
//! populated identity: the first failing check aborts with its own variant.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving the server identity.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Certificate store missing, unreadable, malformed or password rejected
    #[error("Certificate store '{path}' is unreadable: {reason}")]
    StoreUnreadable { path: PathBuf, reason: String },

    /// Configured alias absent, or present but not a private-key entry
    #[error("Certificate store alias '{alias}' must be a private key entry, found {found}")]
    MissingOrWrongEntryType { alias: String, found: String },

    /// Chain for the alias is empty or holds a non X.509 certificate
    #[error("Certificate chain for alias '{alias}' is invalid: {reason}")]
    InvalidChain { alias: String, reason: String },

    /// Raw key coordinates do not describe a valid secp256r1 key pair
    #[error("Malformed key material: {0}")]
    MalformedKeyMaterial(String),

    /// Configuration rejected before any material was read
    #[error("Configuration error: {0}")]
    Config(#[from] bpms_core::ConfigError),
}

impl CredentialError {
    pub fn store_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn wrong_entry(alias: impl Into<String>, found: impl Into<String>) -> Self {
        Self::MissingOrWrongEntryType {
            alias: alias.into(),
            found: found.into(),
        }
    }

    pub fn invalid_chain(alias: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChain {
            alias: alias.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedKeyMaterial(reason.into())
    }
}

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;
