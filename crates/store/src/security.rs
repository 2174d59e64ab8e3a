//! Per-client security configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::BackendKind;

/// How a client authenticates on the secure listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credential {
    #[serde(rename = "psk")]
    PreSharedKey {
        identity: String,
        #[serde(with = "hex_bytes")]
        key: Vec<u8>,
    },

    /// DER SubjectPublicKeyInfo the client must present.
    #[serde(rename = "rpk")]
    RawPublicKey {
        #[serde(with = "hex_bytes")]
        public_key: Vec<u8>,
    },

    /// Client certificate validated against the server trust anchors.
    #[serde(rename = "x509")]
    X509,
}

/// Security entry for one client endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub endpoint: String,
    pub credential: Credential,
}

impl SecurityInfo {
    pub fn psk(endpoint: impl Into<String>, identity: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::PreSharedKey {
                identity: identity.into(),
                key,
            },
        }
    }

    pub fn rpk(endpoint: impl Into<String>, public_key: Vec<u8>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::RawPublicKey { public_key },
        }
    }

    pub fn x509(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::X509,
        }
    }

    /// PSK identity, if this entry uses a pre-shared key.
    pub fn psk_identity(&self) -> Option<&str> {
        match &self.credential {
            Credential::PreSharedKey { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Security entries keyed by client endpoint name.
///
/// Read by the device endpoint on every session negotiation and written by
/// the management surface. Implementations own their locking.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>>;

    /// Looks up the entry owning a PSK identity.
    async fn get_by_identity(&self, identity: &str) -> StoreResult<Option<SecurityInfo>>;

    /// Stores `info` and returns the entry it replaced.
    ///
    /// Fails with `NonUniqueIdentity` when the PSK identity belongs to a
    /// different endpoint.
    async fn put(&self, info: SecurityInfo) -> StoreResult<Option<SecurityInfo>>;

    async fn remove(&self, endpoint: &str) -> StoreResult<Option<SecurityInfo>>;

    /// All entries ordered by endpoint.
    async fn all(&self) -> StoreResult<Vec<SecurityInfo>>;
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_layout() {
        let info = SecurityInfo::psk("sensor-1", "sensor-1-id", vec![0xde, 0xad]);
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["endpoint"], "sensor-1");
        assert_eq!(json["credential"]["type"], "psk");
        assert_eq!(json["credential"]["key"], "dead");

        let x509: SecurityInfo =
            serde_json::from_str(r#"{"endpoint":"cam","credential":{"type":"x509"}}"#).unwrap();
        assert_eq!(x509, SecurityInfo::x509("cam"));
        assert_eq!(x509.psk_identity(), None);
    }

    #[test]
    fn test_rejects_bad_hex() {
        let result: Result<SecurityInfo, _> = serde_json::from_str(
            r#"{"endpoint":"cam","credential":{"type":"rpk","public_key":"xyz"}}"#,
        );
        assert!(result.is_err());
    }
}
