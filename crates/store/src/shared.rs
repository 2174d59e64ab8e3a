//! Redis-backed stores for clustered deployments.
//!
//! Both stores share one [`ConnectionManager`], a multiplexed connection
//! handle that is cheap to clone and reconnects on its own. Consistency is
//! whatever Redis gives per command; PSK identity uniqueness relies on
//! `HSETNX`.
//!
//! Hash layout:
//!
//! | Key | Field | Value |
//! |-----|-------|-------|
//! | `bpms:sec:ep` | endpoint | security entry (JSON) |
//! | `bpms:sec:pskid` | PSK identity | endpoint |
//! | `bpms:reg:ep` | endpoint | registration (JSON) |
//! | `bpms:reg:id` | registration id | endpoint |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::registration::{Registration, RegistrationStore, RegistrationUpdate};
use crate::security::{SecurityInfo, SecurityStore};
use crate::BackendKind;

const SEC_BY_ENDPOINT: &str = "bpms:sec:ep";
const SEC_BY_PSK_ID: &str = "bpms:sec:pskid";
const REG_BY_ENDPOINT: &str = "bpms:reg:ep";
const REG_BY_ID: &str = "bpms:reg:id";

/// Backoff parameters are unused with zero retries but required by the constructor.
const BACKOFF_BASE_MS: u64 = 2;
const BACKOFF_FACTOR: u64 = 100;

/// Opens the shared connection with a single attempt bounded by `timeout`.
///
/// A refused or timed-out first connection is final. Once established, the
/// manager re-dials on its own when a later command finds the link broken.
pub async fn connect(target: &Url, timeout: Duration) -> StoreResult<ConnectionManager> {
    let shown = redact(target);
    let client = redis::Client::open(target.as_str())
        .map_err(|e| StoreError::unreachable(&shown, e.to_string()))?;

    let manager = tokio::time::timeout(
        timeout,
        ConnectionManager::new_with_backoff(client, BACKOFF_BASE_MS, BACKOFF_FACTOR, 0),
    )
    .await
    .map_err(|_| StoreError::unreachable(&shown, format!("no connection within {timeout:?}")))?
    .map_err(|e| StoreError::unreachable(&shown, e.to_string()))?;

    info!(backend = %shown, "Connected to shared backend");
    Ok(manager)
}

/// Connection target with any password masked, for logs and errors.
pub fn redact(target: &Url) -> String {
    let mut shown = target.clone();
    if shown.password().is_some() {
        // Only fails for cannot-be-a-base URLs, which carry no password.
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}

fn decode<T: serde::de::DeserializeOwned>(json: Option<String>) -> StoreResult<Option<T>> {
    json.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(StoreError::from)
}

/// Security entries in Redis hashes.
#[derive(Clone)]
pub struct RedisSecurityStore {
    conn: ConnectionManager,
}

impl RedisSecurityStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SecurityStore for RedisSecurityStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }

    async fn get(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.hget(SEC_BY_ENDPOINT, endpoint).await?;
        decode(json)
    }

    async fn get_by_identity(&self, identity: &str) -> StoreResult<Option<SecurityInfo>> {
        let mut conn = self.conn.clone();
        let endpoint: Option<String> = conn.hget(SEC_BY_PSK_ID, identity).await?;
        match endpoint {
            Some(endpoint) => self.get(&endpoint).await,
            None => Ok(None),
        }
    }

    async fn put(&self, info: SecurityInfo) -> StoreResult<Option<SecurityInfo>> {
        let mut conn = self.conn.clone();

        if let Some(identity) = info.psk_identity() {
            let claimed: bool = conn.hset_nx(SEC_BY_PSK_ID, identity, &info.endpoint).await?;
            if !claimed {
                let owner: Option<String> = conn.hget(SEC_BY_PSK_ID, identity).await?;
                match owner {
                    Some(owner) if owner != info.endpoint => {
                        return Err(StoreError::non_unique(identity, owner));
                    }
                    Some(_) => {}
                    // Released between the two commands.
                    None => {
                        let _: () = conn.hset(SEC_BY_PSK_ID, identity, &info.endpoint).await?;
                    }
                }
            }
        }

        let json = serde_json::to_string(&info)?;
        let previous: Option<SecurityInfo> =
            decode(conn.hget(SEC_BY_ENDPOINT, &info.endpoint).await?)?;
        let _: () = conn.hset(SEC_BY_ENDPOINT, &info.endpoint, json).await?;

        if let Some(old_identity) = previous.as_ref().and_then(|p| p.psk_identity()) {
            if info.psk_identity() != Some(old_identity) {
                let _: () = conn.hdel(SEC_BY_PSK_ID, old_identity).await?;
            }
        }

        debug!(endpoint = %info.endpoint, "Stored security entry");
        Ok(previous)
    }

    async fn remove(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>> {
        let mut conn = self.conn.clone();
        let previous: Option<SecurityInfo> = decode(conn.hget(SEC_BY_ENDPOINT, endpoint).await?)?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let _: () = conn.hdel(SEC_BY_ENDPOINT, endpoint).await?;
        if let Some(identity) = previous.psk_identity() {
            let _: () = conn.hdel(SEC_BY_PSK_ID, identity).await?;
        }
        Ok(Some(previous))
    }

    async fn all(&self) -> StoreResult<Vec<SecurityInfo>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(SEC_BY_ENDPOINT).await?;
        let mut entries = raw
            .into_values()
            .map(|json| serde_json::from_str::<SecurityInfo>(&json))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(entries)
    }
}

/// Registration records in Redis hashes.
#[derive(Clone)]
pub struct RedisRegistrationStore {
    conn: ConnectionManager,
}

impl RedisRegistrationStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn write(&self, registration: &Registration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(registration)?;
        let _: () = conn.hset(REG_BY_ENDPOINT, &registration.endpoint, json).await?;
        let _: () = conn.hset(REG_BY_ID, &registration.id, &registration.endpoint).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for RedisRegistrationStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }

    async fn add(&self, registration: Registration) -> StoreResult<Option<Registration>> {
        let previous = self.get_by_endpoint(&registration.endpoint).await?;
        self.write(&registration).await?;

        if let Some(previous) = &previous {
            if previous.id != registration.id {
                let mut conn = self.conn.clone();
                let _: () = conn.hdel(REG_BY_ID, &previous.id).await?;
            }
        }
        Ok(previous)
    }

    async fn update(&self, id: &str, update: RegistrationUpdate) -> StoreResult<Option<Registration>> {
        let Some(mut registration) = self.get(id).await? else {
            return Ok(None);
        };
        update.apply_to(&mut registration, Utc::now());
        self.write(&registration).await?;
        Ok(Some(registration))
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Registration>> {
        let mut conn = self.conn.clone();
        let endpoint: Option<String> = conn.hget(REG_BY_ID, id).await?;
        let Some(endpoint) = endpoint else {
            return Ok(None);
        };
        // The endpoint may have re-registered under a new id.
        Ok(self
            .get_by_endpoint(&endpoint)
            .await?
            .filter(|registration| registration.id == id))
    }

    async fn get_by_endpoint(&self, endpoint: &str) -> StoreResult<Option<Registration>> {
        let mut conn = self.conn.clone();
        decode(conn.hget(REG_BY_ENDPOINT, endpoint).await?)
    }

    async fn remove(&self, id: &str) -> StoreResult<Option<Registration>> {
        let Some(registration) = self.get(id).await? else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let _: () = conn.hdel(REG_BY_ENDPOINT, &registration.endpoint).await?;
        let _: () = conn.hdel(REG_BY_ID, id).await?;
        Ok(Some(registration))
    }

    async fn all(&self) -> StoreResult<Vec<Registration>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(REG_BY_ENDPOINT).await?;
        let mut registrations = raw
            .into_values()
            .map(|json| serde_json::from_str::<Registration>(&json))
            .collect::<Result<Vec<_>, _>>()?;
        registrations.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(registrations)
    }
}
