//! Local file-backed stores.
//!
//! Each store keeps its entries in memory behind a [`parking_lot::RwLock`]
//! and rewrites its JSON file on every mutation. The rewrite goes through a
//! temporary file in the same directory followed by a rename, so a crash
//! never leaves a truncated file behind.
//!
//! Mutations are serialized by an async write gate. The in-memory change is
//! made under the lock, the file is written on the blocking pool with the
//! lock released, and a failed write reverts the in-memory change.
//!
//! Nothing is shared between nodes: two servers pointed at different data
//! directories have independent state.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::registration::{Registration, RegistrationStore, RegistrationUpdate};
use crate::security::{SecurityInfo, SecurityStore};
use crate::BackendKind;

fn load_records<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn encode_records<'a, T, I>(records: I) -> StoreResult<Vec<u8>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let records: Vec<&T> = records.into_iter().collect();
    Ok(serde_json::to_vec_pretty(&records)?)
}

fn write_atomic(path: &Path, json: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(json).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Writes the encoded records on the blocking pool.
async fn persist(path: &Path, json: Vec<u8>) -> StoreResult<()> {
    let target = path.to_path_buf();
    let len = json.len();
    tokio::task::spawn_blocking(move || write_atomic(&target, &json))
        .await
        .map_err(|e| StoreError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    debug!(path = %path.display(), bytes = len, "Persisted store file");
    Ok(())
}

/// Security entries persisted to a JSON file.
#[derive(Debug)]
pub struct FileSecurityStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, SecurityInfo>>,
    writes: Mutex<()>,
}

impl FileSecurityStore {
    /// Opens the store, loading any existing file.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries: BTreeMap<_, _> = load_records::<SecurityInfo>(&path)?
            .into_iter()
            .map(|info| (info.endpoint.clone(), info))
            .collect();

        info!(path = %path.display(), entries = entries.len(), "Opened local security store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            writes: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecurityStore for FileSecurityStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>> {
        Ok(self.entries.read().get(endpoint).cloned())
    }

    async fn get_by_identity(&self, identity: &str) -> StoreResult<Option<SecurityInfo>> {
        Ok(self
            .entries
            .read()
            .values()
            .find(|info| info.psk_identity() == Some(identity))
            .cloned())
    }

    async fn put(&self, info: SecurityInfo) -> StoreResult<Option<SecurityInfo>> {
        let _gate = self.writes.lock().await;
        let endpoint = info.endpoint.clone();

        let (previous, json) = {
            let mut entries = self.entries.write();
            if let Some(identity) = info.psk_identity() {
                let owner = entries
                    .values()
                    .find(|other| other.endpoint != info.endpoint && other.psk_identity() == Some(identity));
                if let Some(owner) = owner {
                    return Err(StoreError::non_unique(identity, owner.endpoint.clone()));
                }
            }

            let previous = entries.insert(endpoint.clone(), info);
            (previous, encode_records(entries.values()))
        };

        let result = match json {
            Ok(json) => persist(&self.path, json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let mut entries = self.entries.write();
            match &previous {
                Some(previous) => entries.insert(endpoint, previous.clone()),
                None => entries.remove(&endpoint),
            };
            return Err(e);
        }
        Ok(previous)
    }

    async fn remove(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>> {
        let _gate = self.writes.lock().await;

        let (previous, json) = {
            let mut entries = self.entries.write();
            let Some(previous) = entries.remove(endpoint) else {
                return Ok(None);
            };
            (previous, encode_records(entries.values()))
        };

        let result = match json {
            Ok(json) => persist(&self.path, json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.entries.write().insert(endpoint.to_string(), previous);
            return Err(e);
        }
        Ok(Some(previous))
    }

    async fn all(&self) -> StoreResult<Vec<SecurityInfo>> {
        Ok(self.entries.read().values().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct RegistrationIndex {
    by_id: HashMap<String, Registration>,
    by_endpoint: BTreeMap<String, String>,
}

impl RegistrationIndex {
    fn insert(&mut self, registration: Registration) -> Option<Registration> {
        let previous = self
            .by_endpoint
            .insert(registration.endpoint.clone(), registration.id.clone())
            .and_then(|old_id| self.by_id.remove(&old_id));
        self.by_id.insert(registration.id.clone(), registration);
        previous
    }

    fn remove(&mut self, id: &str) -> Option<Registration> {
        let removed = self.by_id.remove(id)?;
        self.by_endpoint.remove(&removed.endpoint);
        Some(removed)
    }

    fn ordered(&self) -> impl Iterator<Item = &Registration> {
        self.by_endpoint.values().filter_map(|id| self.by_id.get(id))
    }
}

/// Registration records persisted to a JSON file.
#[derive(Debug)]
pub struct FileRegistrationStore {
    path: PathBuf,
    index: RwLock<RegistrationIndex>,
    writes: Mutex<()>,
}

impl FileRegistrationStore {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut index = RegistrationIndex::default();
        for registration in load_records::<Registration>(&path)? {
            index.insert(registration);
        }

        info!(path = %path.display(), registrations = index.by_id.len(), "Opened local registration store");
        Ok(Self {
            path,
            index: RwLock::new(index),
            writes: Mutex::new(()),
        })
    }

    async fn write_out(&self, json: StoreResult<Vec<u8>>) -> StoreResult<()> {
        persist(&self.path, json?).await
    }
}

#[async_trait]
impl RegistrationStore for FileRegistrationStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn add(&self, registration: Registration) -> StoreResult<Option<Registration>> {
        let _gate = self.writes.lock().await;
        let id = registration.id.clone();

        let (previous, json) = {
            let mut index = self.index.write();
            let previous = index.insert(registration);
            (previous, encode_records(index.ordered()))
        };

        if let Err(e) = self.write_out(json).await {
            let mut index = self.index.write();
            index.remove(&id);
            if let Some(previous) = previous {
                index.insert(previous);
            }
            return Err(e);
        }
        Ok(previous)
    }

    async fn update(&self, id: &str, update: RegistrationUpdate) -> StoreResult<Option<Registration>> {
        let _gate = self.writes.lock().await;

        let (before, updated, json) = {
            let mut index = self.index.write();
            let Some(current) = index.by_id.get_mut(id) else {
                return Ok(None);
            };
            let before = current.clone();
            update.apply_to(current, Utc::now());
            let updated = current.clone();
            (before, updated, encode_records(index.ordered()))
        };

        if let Err(e) = self.write_out(json).await {
            self.index.write().by_id.insert(id.to_string(), before);
            return Err(e);
        }
        Ok(Some(updated))
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Registration>> {
        Ok(self.index.read().by_id.get(id).cloned())
    }

    async fn get_by_endpoint(&self, endpoint: &str) -> StoreResult<Option<Registration>> {
        let index = self.index.read();
        Ok(index
            .by_endpoint
            .get(endpoint)
            .and_then(|id| index.by_id.get(id))
            .cloned())
    }

    async fn remove(&self, id: &str) -> StoreResult<Option<Registration>> {
        let _gate = self.writes.lock().await;

        let (removed, json) = {
            let mut index = self.index.write();
            let Some(removed) = index.remove(id) else {
                return Ok(None);
            };
            (removed, encode_records(index.ordered()))
        };

        if let Err(e) = self.write_out(json).await {
            self.index.write().insert(removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    async fn all(&self) -> StoreResult<Vec<Registration>> {
        Ok(self.index.read().ordered().cloned().collect())
    }
}
