//! Client registration records.

use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::BackendKind;

/// Object instance advertised by a client at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLink {
    pub object_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u16>,
}

impl ObjectLink {
    pub fn new(object_id: u16, instance_id: Option<u16>) -> Self {
        Self {
            object_id,
            instance_id,
        }
    }
}

/// Current registration of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub endpoint: String,
    pub address: SocketAddr,
    pub lifetime_secs: u64,
    pub lwm2m_version: String,
    pub binding: String,
    #[serde(default)]
    pub objects: Vec<ObjectLink>,
    pub registered_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Registration {
    /// Registration is alive until `last_update + lifetime`.
    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        let lifetime = Duration::seconds(self.lifetime_secs.min(u64::from(u32::MAX)) as i64);
        self.last_update
            .checked_add_signed(lifetime)
            .map_or(true, |expiry| now <= expiry)
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Utc::now())
    }
}

/// Fields a registration update may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
    #[serde(default)]
    pub address: Option<SocketAddr>,
    #[serde(default)]
    pub lifetime_secs: Option<u64>,
    #[serde(default)]
    pub binding: Option<String>,
    #[serde(default)]
    pub objects: Option<Vec<ObjectLink>>,
}

impl RegistrationUpdate {
    /// Applies the update and refreshes `last_update`.
    pub fn apply_to(&self, registration: &mut Registration, now: DateTime<Utc>) {
        if let Some(address) = self.address {
            registration.address = address;
        }
        if let Some(lifetime) = self.lifetime_secs {
            registration.lifetime_secs = lifetime;
        }
        if let Some(binding) = &self.binding {
            registration.binding = binding.clone();
        }
        if let Some(objects) = &self.objects {
            registration.objects = objects.clone();
        }
        registration.last_update = now;
    }
}

/// Registration records keyed by registration id, indexed by endpoint.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Adds a registration and returns the one it replaced for the same endpoint.
    async fn add(&self, registration: Registration) -> StoreResult<Option<Registration>>;

    /// Applies an update; `None` when the id is unknown.
    async fn update(&self, id: &str, update: RegistrationUpdate) -> StoreResult<Option<Registration>>;

    async fn get(&self, id: &str) -> StoreResult<Option<Registration>>;

    async fn get_by_endpoint(&self, endpoint: &str) -> StoreResult<Option<Registration>>;

    async fn remove(&self, id: &str) -> StoreResult<Option<Registration>>;

    /// All registrations ordered by endpoint.
    async fn all(&self) -> StoreResult<Vec<Registration>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        let now = Utc::now();
        Registration {
            id: "reg-1".to_string(),
            endpoint: "sensor-1".to_string(),
            address: "192.0.2.10:5683".parse().unwrap(),
            lifetime_secs: 60,
            lwm2m_version: "1.1".to_string(),
            binding: "U".to_string(),
            objects: vec![ObjectLink::new(3, Some(0))],
            registered_at: now,
            last_update: now,
        }
    }

    #[test]
    fn test_update_applies_only_given_fields() {
        let mut reg = registration();
        let later = reg.last_update + Duration::seconds(30);
        let update = RegistrationUpdate {
            lifetime_secs: Some(120),
            ..Default::default()
        };

        update.apply_to(&mut reg, later);

        assert_eq!(reg.lifetime_secs, 120);
        assert_eq!(reg.binding, "U");
        assert_eq!(reg.objects.len(), 1);
        assert_eq!(reg.last_update, later);
    }

    #[test]
    fn test_liveness() {
        let reg = registration();
        assert!(reg.is_alive_at(reg.last_update + Duration::seconds(60)));
        assert!(!reg.is_alive_at(reg.last_update + Duration::seconds(61)));
    }
}
