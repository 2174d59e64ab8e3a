//! Server error types.

use std::fmt;
use std::io;

use thiserror::Error;

use bpms_core::ConfigError;
use bpms_identity::CredentialError;
use bpms_model::ModelError;
use bpms_store::StoreError;

/// The listener a bind failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Plaintext device listener
    Coap,
    /// Secure device listener
    Coaps,
    /// Management HTTP listener
    Web,
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coap => f.write_str("coap"),
            Self::Coaps => f.write_str("coaps"),
            Self::Web => f.write_str("web"),
        }
    }
}

/// Why a listener could not bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindCause {
    AddressInUse,
    PermissionDenied,
    /// Host is resolvable but not an address of this machine.
    AddressUnavailable,
    UnresolvedHost,
    Other,
}

impl BindCause {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AddrNotAvailable => Self::AddressUnavailable,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for BindCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressInUse => f.write_str("address already in use"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::AddressUnavailable => f.write_str("address not available"),
            Self::UnresolvedHost => f.write_str("host could not be resolved"),
            Self::Other => f.write_str("bind failed"),
        }
    }
}

/// Listener startup failure. Nothing stays bound when this is returned.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Unable to bind {listener} listener on {target}: {cause}")]
    Bind {
        listener: Listener,
        target: String,
        cause: BindCause,
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    pub fn bind(listener: Listener, target: impl Into<String>, cause: BindCause, source: io::Error) -> Self {
        Self::Bind {
            listener,
            target: target.into(),
            cause,
            source,
        }
    }

    pub fn listener(&self) -> Listener {
        match self {
            Self::Bind { listener, .. } => *listener,
        }
    }

    pub fn cause(&self) -> BindCause {
        match self {
            Self::Bind { cause, .. } => *cause,
        }
    }

    /// Operator hint for the failure.
    pub fn remedy(&self) -> &'static str {
        match self.cause() {
            BindCause::AddressInUse => "another process holds this port; stop it or choose a different port",
            BindCause::PermissionDenied => {
                "ports below 1024 need elevated privileges; choose a port above 1024 or grant CAP_NET_BIND_SERVICE"
            }
            BindCause::AddressUnavailable => "the host is not an address of this machine; bind to a local address",
            BindCause::UnresolvedHost => "check the host name spelling or use an IP address",
            BindCause::Other => "check the listener host and port options",
        }
    }
}

/// Any failure that aborts server startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Startup(#[from] StartupError),
}

impl BootstrapError {
    /// Short name of the failing subsystem, for logs.
    pub fn subsystem(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Credential(_) => "credentials",
            Self::Store(_) => "store",
            Self::Model(_) => "object model",
            Self::Startup(_) => "listeners",
        }
    }

    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            Self::Startup(e) => Some(e.remedy()),
            Self::Store(StoreError::BackendUnreachable { .. }) => {
                Some("check the redis URL and that the server is reachable")
            }
            _ => None,
        }
    }
}
