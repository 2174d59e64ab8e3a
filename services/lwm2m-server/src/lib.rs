//! BPMS LwM2M management server.
//!
//! Startup is strictly sequential: credentials, stores, object model,
//! listeners. Every step fails with a typed error and nothing is left
//! running when one does.

pub mod assembler;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod management;
pub mod protocol;
pub mod registration;
pub mod state;

pub use assembler::{RunningServer, ServerAssembler};
pub use error::{BindCause, BootstrapError, Listener, StartupError};
pub use protocol::{DeviceProtocol, DroppingProtocol, ProtocolContext, Transport};
pub use registration::{RegistrationEvent, RegistrationRequest, RegistrationService};
pub use state::AppState;

use std::sync::Arc;

use tracing::info;

use bpms_core::ServerConfig;
use bpms_identity::CredentialSource;
use bpms_model::{ObjectModelProvider, StaticModelProvider};
use bpms_store::StoreSelector;

/// Starts the server with the default device protocol engine.
pub async fn bootstrap(config: &ServerConfig) -> Result<RunningServer, BootstrapError> {
    bootstrap_with(config, Arc::new(DroppingProtocol)).await
}

/// Starts the server with `protocol` handling device datagrams.
pub async fn bootstrap_with(
    config: &ServerConfig,
    protocol: Arc<dyn DeviceProtocol>,
) -> Result<RunningServer, BootstrapError> {
    config.validate()?;

    let identity = CredentialSource::resolve(config)?;
    let stores = StoreSelector::select(config).await?;
    let models: Arc<dyn ObjectModelProvider> = Arc::new(StaticModelProvider::from_config(&config.models)?);

    let server = ServerAssembler::assemble(config, identity, stores, models, protocol).await?;
    info!(
        mode = server.mode(),
        coap = %server.coap_addr(),
        coaps = %server.coaps_addr(),
        "Server started"
    );
    Ok(server)
}
