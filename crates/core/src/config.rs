//! Configuration management for the BPMS management server.
//!
//! Every section is optional in the TOML file; missing values fall back to
//! the defaults documented on each field.
//!
//! ```toml
//! [coap]
//! port = 5683
//!
//! [coaps]
//! port = 5684
//!
//! [web]
//! port = 8080
//!
//! [keystore]
//! path = "/etc/bpms/server.p12"
//! password = "secret"
//! alias = "leshan"
//!
//! [redis]
//! url = "redis://localhost:6379"
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use crate::error::{ConfigError, Result};

/// Default plaintext CoAP port.
pub const DEFAULT_COAP_PORT: u16 = 5683;
/// Default DTLS-secured CoAP port.
pub const DEFAULT_COAPS_PORT: u16 = 5684;
/// Default management HTTP port.
pub const DEFAULT_WEB_PORT: u16 = 8080;
/// Alias looked up in the certificate store when none is configured.
pub const DEFAULT_KEYSTORE_ALIAS: &str = "leshan";
/// File the raw public key is written to for out-of-band distribution.
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "server_pub.der";
/// Address used when no bind host is configured.
pub const ANY_LOCAL_ADDRESS: &str = "0.0.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Plaintext device-protocol listener.
    #[serde(default = "EndpointConfig::coap", deserialize_with = "EndpointConfig::deserialize_coap")]
    pub coap: EndpointConfig,

    /// Secure device-protocol listener.
    #[serde(default = "EndpointConfig::coaps", deserialize_with = "EndpointConfig::deserialize_coaps")]
    pub coaps: EndpointConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    /// Shared backend. Absent URL means single-node local storage.
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Certificate store. A configured path enables certificate-chain mode.
    #[serde(default)]
    pub keystore: KeystoreConfig,

    /// Raw public key material, used only without a certificate store.
    #[serde(default)]
    pub rpk: RpkConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::load(&path_str, e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::load(&path_str, e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Validates option ranges and mutually exclusive combinations.
    pub fn validate(&self) -> Result<()> {
        self.coap.validate("coap")?;
        self.coaps.validate("coaps")?;
        self.web.validate()?;
        self.models.validate()?;
        self.redis.validate()?;
        self.keystore.validate()?;
        self.rpk.validate()?;

        if self.coap.port != 0
            && self.coap.port == self.coaps.port
            && self.coap.bind_host() == self.coaps.bind_host()
        {
            return Err(ConfigError::invalid(
                "coaps.port",
                format!(
                    "plaintext and secure listeners both use {}:{}",
                    self.coap.bind_host(),
                    self.coap.port
                ),
            ));
        }

        if self.keystore.path.is_some() {
            if let Some(field) = self.rpk.first_explicit_field() {
                return Err(ConfigError::exclusive("keystore.path", field));
            }
        } else if !self.rpk.has_explicit_key() && !self.rpk.allow_demo_key {
            return Err(ConfigError::invalid(
                "rpk",
                "no certificate store or raw key configured and the built-in demo key is disabled",
            ));
        }

        Ok(())
    }

    /// Returns true when the server identity comes from a certificate store.
    pub fn uses_certificate_store(&self) -> bool {
        self.keystore.path.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            coap: EndpointConfig::coap(),
            coaps: EndpointConfig::coaps(),
            web: WebConfig::default(),
            models: ModelsConfig::default(),
            redis: RedisConfig::default(),
            store: StoreConfig::default(),
            keystore: KeystoreConfig::default(),
            rpk: RpkConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Bind address of one listener. A section may set either field alone; the
/// other keeps the listener's default.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Host name or address. Defaults to any local address.
    #[serde(default)]
    pub host: Option<String>,

    /// Port. Zero asks the OS for an ephemeral port.
    pub port: u16,
}

impl EndpointConfig {
    pub fn coap() -> Self {
        Self {
            host: None,
            port: DEFAULT_COAP_PORT,
        }
    }

    pub fn coaps() -> Self {
        Self {
            host: None,
            port: DEFAULT_COAPS_PORT,
        }
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
        }
    }

    fn deserialize_coap<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        EndpointSection::deserialize(deserializer).map(|section| section.over(Self::coap()))
    }

    fn deserialize_coaps<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        EndpointSection::deserialize(deserializer).map(|section| section.over(Self::coaps()))
    }

    /// Host to bind, falling back to the wildcard address.
    pub fn bind_host(&self) -> &str {
        self.host.as_deref().unwrap_or(ANY_LOCAL_ADDRESS)
    }

    /// `host:port` string suitable for address resolution.
    pub fn bind_target(&self) -> String {
        let host = self.bind_host();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if matches!(self.host.as_deref(), Some(h) if h.trim().is_empty()) {
            return Err(ConfigError::invalid(
                format!("{section}.host"),
                "must not be empty",
            ));
        }
        Ok(())
    }
}

/// `[coap]` / `[coaps]` as written in the file.
#[derive(Deserialize)]
struct EndpointSection {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

impl EndpointSection {
    fn over(self, defaults: EndpointConfig) -> EndpointConfig {
        EndpointConfig {
            host: self.host.or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
        }
    }
}

/// Management HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_web_port")]
    pub port: u16,

    /// Bearer token required on `/api/*` and `/event` when set.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl WebConfig {
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn validate(&self) -> Result<()> {
        self.endpoint().validate("web")?;
        if matches!(self.api_token.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::invalid("web.api_token", "must not be empty"));
        }
        Ok(())
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_WEB_PORT,
            api_token: None,
        }
    }
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

/// Object model sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Directory of JSON object definitions replacing the built-in extension set.
    #[serde(default)]
    pub extension_dir: Option<PathBuf>,

    /// Explicitly run with the baseline definitions only.
    #[serde(default)]
    pub skip_extensions: bool,
}

impl ModelsConfig {
    fn validate(&self) -> Result<()> {
        if self.skip_extensions && self.extension_dir.is_some() {
            return Err(ConfigError::exclusive(
                "models.extension_dir",
                "models.skip_extensions",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `redis://:password@hostname:port/db_number`
    #[serde(default)]
    pub url: Option<String>,

    /// Upper bound for establishing the initial connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "redis.connect_timeout_secs",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    5
}

/// Local backend persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StoreConfig {
    pub fn security_file(&self) -> PathBuf {
        self.data_dir.join("security.json")
    }

    pub fn registration_file(&self) -> PathBuf {
        self.data_dir.join("registrations.json")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Supported certificate store formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreType {
    Pkcs12,
}

impl FromStr for KeystoreType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs12" | "p12" => Ok(Self::Pkcs12),
            other => Err(ConfigError::invalid(
                "keystore.store_type",
                format!("unsupported store type '{other}', expected pkcs12"),
            )),
        }
    }
}

impl fmt::Display for KeystoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pkcs12 => f.write_str("pkcs12"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_store_type")]
    pub store_type: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Alias of the private-key entry holding the server credentials.
    #[serde(default = "default_alias")]
    pub alias: String,

    /// Password of the alias entry. PKCS#12 uses one password for the whole
    /// file, so this must match `password` when given.
    #[serde(default)]
    pub alias_password: Option<String>,
}

impl KeystoreConfig {
    pub fn kind(&self) -> Result<KeystoreType> {
        self.store_type.parse()
    }

    /// Password used to open the store; an unset password opens with "".
    pub fn store_password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    fn validate(&self) -> Result<()> {
        self.kind()?;

        if self.path.is_none() {
            if self.password.is_some() {
                return Err(ConfigError::invalid(
                    "keystore.password",
                    "requires keystore.path",
                ));
            }
            if self.alias_password.is_some() {
                return Err(ConfigError::invalid(
                    "keystore.alias_password",
                    "requires keystore.path",
                ));
            }
            return Ok(());
        }

        if self.alias.trim().is_empty() {
            return Err(ConfigError::invalid("keystore.alias", "must not be empty"));
        }

        if let Some(alias_password) = &self.alias_password {
            if alias_password != self.store_password() {
                return Err(ConfigError::invalid(
                    "keystore.alias_password",
                    "pkcs12 stores use a single password; it must match keystore.password",
                ));
            }
        }

        Ok(())
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            store_type: default_store_type(),
            password: None,
            alias: default_alias(),
            alias_password: None,
        }
    }
}

fn default_store_type() -> String {
    KeystoreType::Pkcs12.to_string()
}

fn default_alias() -> String {
    DEFAULT_KEYSTORE_ALIAS.to_string()
}

/// Raw public key (secp256r1) coordinates, hex encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpkConfig {
    #[serde(default)]
    pub public_x: Option<String>,

    #[serde(default)]
    pub public_y: Option<String>,

    #[serde(default)]
    pub private_s: Option<String>,

    /// Fall back to the publicly known demo key pair when nothing is configured.
    #[serde(default = "default_true")]
    pub allow_demo_key: bool,

    #[serde(default = "default_public_key_file")]
    pub public_key_file: PathBuf,
}

impl RpkConfig {
    /// True when all three coordinates are configured.
    pub fn has_explicit_key(&self) -> bool {
        self.public_x.is_some() && self.public_y.is_some() && self.private_s.is_some()
    }

    fn first_explicit_field(&self) -> Option<&'static str> {
        if self.public_x.is_some() {
            Some("rpk.public_x")
        } else if self.public_y.is_some() {
            Some("rpk.public_y")
        } else if self.private_s.is_some() {
            Some("rpk.private_s")
        } else {
            None
        }
    }

    fn validate(&self) -> Result<()> {
        let set = [&self.public_x, &self.public_y, &self.private_s]
            .iter()
            .filter(|v| v.is_some())
            .count();
        if set != 0 && set != 3 {
            return Err(ConfigError::invalid(
                "rpk",
                "public_x, public_y and private_s must be configured together",
            ));
        }
        Ok(())
    }
}

impl Default for RpkConfig {
    fn default() -> Self {
        Self {
            public_x: None,
            public_y: None,
            private_s: None,
            allow_demo_key: true,
            public_key_file: default_public_key_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_public_key_file() -> PathBuf {
    PathBuf::from(DEFAULT_PUBLIC_KEY_FILE)
}

/// DNS-SD announcement of the server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub publish: bool,

    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            publish: false,
            instance_name: default_instance_name(),
        }
    }
}

fn default_instance_name() -> String {
    "leshan".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();

        assert_eq!(config.coap.port, DEFAULT_COAP_PORT);
        assert_eq!(config.coaps.port, DEFAULT_COAPS_PORT);
        assert_eq!(config.web.port, DEFAULT_WEB_PORT);
        assert_eq!(config.coap.bind_host(), ANY_LOCAL_ADDRESS);
        assert_eq!(config.keystore.alias, DEFAULT_KEYSTORE_ALIAS);
        assert_eq!(config.keystore.kind().unwrap(), KeystoreType::Pkcs12);
        assert!(config.redis.url.is_none());
        assert!(config.rpk.allow_demo_key);
        assert!(!config.uses_certificate_store());
        assert_eq!(config.store.security_file(), PathBuf::from("data/security.json"));
    }

    #[test]
    fn test_keystore_and_raw_key_are_exclusive() {
        let result = ServerConfig::from_toml_str(
            r#"
            [keystore]
            path = "server.p12"

            [rpk]
            public_x = "00"
            public_y = "00"
            private_s = "00"
            "#,
        );

        assert!(matches!(
            result,
            Err(ConfigError::MutuallyExclusive { ref second, .. }) if second == "rpk.public_x"
        ));
    }

    #[test]
    fn test_partial_raw_key_rejected() {
        let result = ServerConfig::from_toml_str(
            r#"
            [rpk]
            public_x = "00"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_demo_key_can_be_disabled() {
        let result = ServerConfig::from_toml_str(
            r#"
            [rpk]
            allow_demo_key = false
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { ref field, .. }) if field == "rpk"));

        let config = ServerConfig::from_toml_str(
            r#"
            [keystore]
            path = "server.p12"

            [rpk]
            allow_demo_key = false
            "#,
        )
        .unwrap();
        assert!(config.uses_certificate_store());
    }

    #[test]
    fn test_unsupported_store_type() {
        let result = ServerConfig::from_toml_str(
            r#"
            [keystore]
            path = "server.jks"
            store_type = "jks"
            "#,
        );
        assert!(
            matches!(result, Err(ConfigError::Invalid { ref field, .. }) if field == "keystore.store_type")
        );
        assert_eq!("P12".parse::<KeystoreType>().unwrap(), KeystoreType::Pkcs12);
    }

    #[test]
    fn test_alias_password_must_match_store_password() {
        let result = ServerConfig::from_toml_str(
            r#"
            [keystore]
            path = "server.p12"
            password = "one"
            alias_password = "two"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_store_password_without_path() {
        let result = ServerConfig::from_toml_str(
            r#"
            [keystore]
            password = "secret"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { ref field, .. }) if field == "keystore.password"));
    }

    #[test]
    fn test_same_device_ports_rejected() {
        let result = ServerConfig::from_toml_str(
            r#"
            [coap]
            port = 6000

            [coaps]
            port = 6000
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        // Ephemeral ports never collide.
        let config = ServerConfig::from_toml_str(
            r#"
            [coap]
            port = 0

            [coaps]
            port = 0
            "#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_models_options_exclusive() {
        let result = ServerConfig::from_toml_str(
            r#"
            [models]
            extension_dir = "models"
            skip_extensions = true
            "#,
        );
        assert!(matches!(result, Err(ConfigError::MutuallyExclusive { .. })));
    }

    #[test]
    fn test_endpoint_section_keeps_default_port() {
        let config = ServerConfig::from_toml_str(
            r#"
            [coap]
            host = "127.0.0.1"

            [coaps]
            host = "127.0.0.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.coap, EndpointConfig::new("127.0.0.1", DEFAULT_COAP_PORT));
        assert_eq!(config.coaps, EndpointConfig::new("127.0.0.1", DEFAULT_COAPS_PORT));

        let config = ServerConfig::from_toml_str("[coaps]\nport = 15684\n").unwrap();
        assert_eq!(config.coaps.bind_host(), ANY_LOCAL_ADDRESS);
        assert_eq!(config.coaps.port, 15684);
        assert_eq!(config.coap, EndpointConfig::coap());
    }

    #[test]
    fn test_bind_target_formats_ipv6() {
        assert_eq!(EndpointConfig::new("::1", 5683).bind_target(), "[::1]:5683");
        assert_eq!(EndpointConfig::new("localhost", 80).bind_target(), "localhost:80");
        assert_eq!(EndpointConfig::coaps().bind_target(), "0.0.0.0:5684");
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");

        let mut config = ServerConfig::default();
        config.redis.url = Some("redis://localhost:6379".to_string());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.redis.url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(loaded.coaps, EndpointConfig::coaps());

        let missing = ServerConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Load { .. })));
    }
}
