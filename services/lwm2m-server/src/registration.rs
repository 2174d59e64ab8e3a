//! Registration lifecycle and event feed.
//!
//! The device protocol drives registrations through [`RegistrationService`];
//! every change is published on a broadcast channel that the management
//! surface turns into server-sent events.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use bpms_store::{ObjectLink, Registration, RegistrationStore, RegistrationUpdate, StoreResult};

/// Capacity of the event channel; slow subscribers skip older events.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationEvent {
    Registered {
        registration: Registration,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous: Option<Registration>,
    },
    Updated {
        registration: Registration,
    },
    Deregistered {
        registration: Registration,
        expired: bool,
    },
}

impl RegistrationEvent {
    pub fn registration(&self) -> &Registration {
        match self {
            Self::Registered { registration, .. }
            | Self::Updated { registration }
            | Self::Deregistered { registration, .. } => registration,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.registration().endpoint
    }

    /// Event name on the management event stream.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "REGISTRATION",
            Self::Updated { .. } => "UPDATED",
            Self::Deregistered { .. } => "DEREGISTRATION",
        }
    }
}

/// Registration request as decoded by the device protocol.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub endpoint: String,
    pub address: SocketAddr,
    pub lifetime_secs: u64,
    pub lwm2m_version: String,
    pub binding: String,
    pub objects: Vec<ObjectLink>,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn RegistrationStore>,
    events: broadcast::Sender<RegistrationEvent>,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RegistrationEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    pub async fn register(&self, request: RegistrationRequest) -> StoreResult<Registration> {
        let now = Utc::now();
        let registration = Registration {
            id: Uuid::new_v4().simple().to_string(),
            endpoint: request.endpoint,
            address: request.address,
            lifetime_secs: request.lifetime_secs,
            lwm2m_version: request.lwm2m_version,
            binding: request.binding,
            objects: request.objects,
            registered_at: now,
            last_update: now,
        };

        let previous = self.store.add(registration.clone()).await?;
        info!(
            endpoint = %registration.endpoint,
            id = %registration.id,
            address = %registration.address,
            "Client registered"
        );
        self.publish(RegistrationEvent::Registered {
            registration: registration.clone(),
            previous,
        });
        Ok(registration)
    }

    pub async fn update(&self, id: &str, update: RegistrationUpdate) -> StoreResult<Option<Registration>> {
        let updated = self.store.update(id, update).await?;
        if let Some(registration) = &updated {
            debug!(endpoint = %registration.endpoint, id, "Registration updated");
            self.publish(RegistrationEvent::Updated {
                registration: registration.clone(),
            });
        }
        Ok(updated)
    }

    pub async fn deregister(&self, id: &str) -> StoreResult<Option<Registration>> {
        let removed = self.store.remove(id).await?;
        if let Some(registration) = &removed {
            info!(endpoint = %registration.endpoint, id, "Client deregistered");
            self.publish(RegistrationEvent::Deregistered {
                registration: registration.clone(),
                expired: false,
            });
        }
        Ok(removed)
    }

    /// Removes every registration whose lifetime elapsed.
    pub async fn remove_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for registration in self.store.all().await? {
            if registration.is_alive_at(now) {
                continue;
            }
            if let Some(registration) = self.store.remove(&registration.id).await? {
                info!(endpoint = %registration.endpoint, "Registration expired");
                self.publish(RegistrationEvent::Deregistered {
                    registration,
                    expired: true,
                });
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Registration>> {
        self.store.get(id).await
    }

    pub async fn get_by_endpoint(&self, endpoint: &str) -> StoreResult<Option<Registration>> {
        self.store.get_by_endpoint(endpoint).await
    }

    pub async fn all(&self) -> StoreResult<Vec<Registration>> {
        self.store.all().await
    }
}
