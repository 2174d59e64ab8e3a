//! bpms-server entry point.
//!
//! ```bash
//! bpms-server --config /etc/bpms/server.toml
//! bpms-server --coapport 5683 --coapsport 5684 --webport 8080 --redis redis://localhost:6379
//! bpms-server --keystore server.p12 --storepass secret --alias leshan
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use bpms_core::{logging, LoggingConfig, ServerConfig};
use bpms_server::BootstrapError;

/// LwM2M management server
#[derive(Parser, Debug)]
#[command(name = "bpms-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; command line options override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address of the plaintext device listener (default: any local address)
    #[arg(long = "coaphost")]
    coap_host: Option<String>,

    /// Port of the plaintext device listener (default: 5683)
    #[arg(long = "coapport")]
    coap_port: Option<u16>,

    /// Address of the secure device listener (default: any local address)
    #[arg(long = "coapshost")]
    coaps_host: Option<String>,

    /// Port of the secure device listener (default: 5684)
    #[arg(long = "coapsport")]
    coaps_port: Option<u16>,

    /// Certificate store holding the server key and chain. Enables certificate mode
    #[arg(long = "keystore")]
    keystore: Option<PathBuf>,

    /// Certificate store password
    #[arg(long = "storepass")]
    store_password: Option<String>,

    /// Certificate store type (default: pkcs12)
    #[arg(long = "storetype")]
    store_type: Option<String>,

    /// Alias of the server key entry (default: leshan)
    #[arg(long = "alias")]
    alias: Option<String>,

    /// Password of the server key entry
    #[arg(long = "keypass")]
    key_password: Option<String>,

    /// Address of the management HTTP listener (default: any local address)
    #[arg(long = "webhost")]
    web_host: Option<String>,

    /// Port of the management HTTP listener (default: 8080)
    #[arg(long = "webport")]
    web_port: Option<u16>,

    /// Directory of JSON object definitions replacing the built-in extension set
    #[arg(long = "modelsfolder")]
    models_folder: Option<PathBuf>,

    /// Shared backend URL: redis://:password@hostname:port/db_number
    #[arg(long = "redis")]
    redis: Option<String>,

    /// Announce the server endpoints with DNS-SD
    #[arg(long = "mdns")]
    mdns: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.coap_host {
            config.coap.host = Some(host.clone());
        }
        if let Some(port) = self.coap_port {
            config.coap.port = port;
        }
        if let Some(host) = &self.coaps_host {
            config.coaps.host = Some(host.clone());
        }
        if let Some(port) = self.coaps_port {
            config.coaps.port = port;
        }
        if let Some(path) = &self.keystore {
            config.keystore.path = Some(path.clone());
        }
        if let Some(password) = &self.store_password {
            config.keystore.password = Some(password.clone());
        }
        if let Some(store_type) = &self.store_type {
            config.keystore.store_type = store_type.clone();
        }
        if let Some(alias) = &self.alias {
            config.keystore.alias = alias.clone();
        }
        if let Some(password) = &self.key_password {
            config.keystore.alias_password = Some(password.clone());
        }
        if let Some(host) = &self.web_host {
            config.web.host = Some(host.clone());
        }
        if let Some(port) = self.web_port {
            config.web.port = port;
        }
        if let Some(dir) = &self.models_folder {
            config.models.extension_dir = Some(dir.clone());
        }
        if let Some(url) = &self.redis {
            config.redis.url = Some(url.clone());
        }
        if self.mdns {
            config.discovery.publish = true;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init_from_config(&LoggingConfig::default());
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    logging::init_from_config(&config.logging);

    let mut server = match bpms_server::bootstrap(&config).await {
        Ok(server) => server,
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Received Ctrl-C, shutting down");
        }
        task = server.wait() => {
            error!("{} task stopped unexpectedly, shutting down", task.unwrap_or("listener"));
        }
    }

    server.shutdown().await;
}

fn report(err: &BootstrapError) {
    error!(subsystem = err.subsystem(), "Startup failed: {}", err);
    if let Some(remedy) = err.remedy() {
        error!("Hint: {}", remedy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
            [coap]
            host = "10.0.0.1"
            port = 15683

            [web]
            port = 9090

            [redis]
            url = "redis://cache:6379"
            "#,
        )
        .unwrap();
        let config_arg = path.to_string_lossy().to_string();

        let cli = Cli::try_parse_from([
            "bpms-server",
            "--config",
            config_arg.as_str(),
            "--coapport",
            "1",
            "--mdns",
            "--redis",
            "redis://other:6380",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.coap.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.coap.port, 1);
        assert_eq!(config.web.port, 9090);
        assert_eq!(config.redis.url.as_deref(), Some("redis://other:6380"));
        assert!(config.discovery.publish);
    }

    #[test]
    fn test_cli_without_file_uses_defaults() {
        let cli = Cli::try_parse_from([
            "bpms-server",
            "--keystore",
            "server.p12",
            "--storepass",
            "secret",
            "--alias",
            "bpms",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();

        assert_eq!(config.coap.port, 5683);
        assert_eq!(config.coaps.port, 5684);
        assert!(!config.discovery.publish);
        assert!(config.uses_certificate_store());
        assert_eq!(config.keystore.alias, "bpms");
        assert_eq!(config.keystore.store_password(), "secret");
        assert!(config.validate().is_ok());
    }
}
