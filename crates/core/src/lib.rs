//! Core functionality for the BPMS device management server.
//!
//! This crate provides the configuration model, configuration errors and
//! logging setup shared by every other crate of the workspace.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    DiscoveryConfig, EndpointConfig, KeystoreConfig, KeystoreType, LoggingConfig, ModelsConfig,
    RedisConfig, RpkConfig, ServerConfig, StoreConfig, WebConfig,
};
pub use error::{ConfigError, Result};
