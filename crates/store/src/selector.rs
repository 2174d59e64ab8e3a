//! Backend selection.
//!
//! The security and registration stores are always built as a pair over the
//! same backend kind. [`Stores`] makes a mixed pair unrepresentable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bpms_core::{ServerConfig, StoreConfig};
use tracing::info;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::local::{FileRegistrationStore, FileSecurityStore};
use crate::registration::RegistrationStore;
use crate::security::SecurityStore;
use crate::shared::{self, RedisRegistrationStore, RedisSecurityStore};

/// URL schemes understood by the shared backend client.
pub const SHARED_SCHEMES: &[&str] = &["redis", "rediss", "redis+unix", "unix"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// File-backed, single node.
    Local,
    /// Redis-backed, shared across nodes.
    Shared,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

/// Backend choice derived from the optional connection target.
///
/// `kind` is `Shared` exactly when a target is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSelection {
    target: Option<Url>,
}

impl BackendSelection {
    pub fn local() -> Self {
        Self { target: None }
    }

    /// Parses the target. A malformed target or an unknown scheme fails here,
    /// before any store exists.
    pub fn from_target(target: Option<&str>) -> StoreResult<Self> {
        let Some(raw) = target else {
            return Ok(Self::local());
        };

        let url = Url::parse(raw.trim())
            .map_err(|e| StoreError::unreachable(raw, format!("malformed URL: {e}")))?;
        if !SHARED_SCHEMES.contains(&url.scheme()) {
            return Err(StoreError::unreachable(
                shared::redact(&url),
                format!(
                    "unsupported scheme '{}', expected one of {}",
                    url.scheme(),
                    SHARED_SCHEMES.join(", ")
                ),
            ));
        }

        Ok(Self { target: Some(url) })
    }

    pub fn kind(&self) -> BackendKind {
        match self.target {
            Some(_) => BackendKind::Shared,
            None => BackendKind::Local,
        }
    }

    pub fn connection_target(&self) -> Option<&Url> {
        self.target.as_ref()
    }
}

/// Security and registration stores of one backend kind.
#[derive(Clone)]
pub enum Stores {
    Local {
        security: Arc<FileSecurityStore>,
        registration: Arc<FileRegistrationStore>,
    },
    Shared {
        security: Arc<RedisSecurityStore>,
        registration: Arc<RedisRegistrationStore>,
    },
}

impl Stores {
    /// Opens both local stores under `store.data_dir`.
    pub fn open_local(store: &StoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&store.data_dir).map_err(|e| StoreError::io(&store.data_dir, e))?;

        Ok(Self::Local {
            security: Arc::new(FileSecurityStore::open(store.security_file())?),
            registration: Arc::new(FileRegistrationStore::open(store.registration_file())?),
        })
    }

    /// Connects once and builds both shared stores over that connection.
    pub async fn connect_shared(target: &Url, timeout: Duration) -> StoreResult<Self> {
        let conn = shared::connect(target, timeout).await?;

        Ok(Self::Shared {
            security: Arc::new(RedisSecurityStore::new(conn.clone())),
            registration: Arc::new(RedisRegistrationStore::new(conn)),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::Shared { .. } => BackendKind::Shared,
        }
    }

    pub fn security(&self) -> Arc<dyn SecurityStore> {
        match self {
            Self::Local { security, .. } => security.clone(),
            Self::Shared { security, .. } => security.clone(),
        }
    }

    pub fn registration(&self) -> Arc<dyn RegistrationStore> {
        match self {
            Self::Local { registration, .. } => registration.clone(),
            Self::Shared { registration, .. } => registration.clone(),
        }
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").field("kind", &self.kind()).finish()
    }
}

/// Builds the store pair for `config`.
pub struct StoreSelector;

impl StoreSelector {
    pub async fn select(config: &ServerConfig) -> StoreResult<Stores> {
        let selection = BackendSelection::from_target(config.redis.url.as_deref())?;
        Self::select_with(&selection, config).await
    }

    pub async fn select_with(selection: &BackendSelection, config: &ServerConfig) -> StoreResult<Stores> {
        let stores = match selection.connection_target() {
            None => Stores::open_local(&config.store)?,
            Some(target) => {
                let timeout = Duration::from_secs(config.redis.connect_timeout_secs);
                Stores::connect_shared(target, timeout).await?
            }
        };

        info!(backend = %stores.kind(), "Selected security and registration stores");
        Ok(stores)
    }
}
