//! Credential resolution from configuration.

use bpms_core::{ConfigError, ServerConfig};
use tracing::{info, warn};

use crate::error::CredentialResult;
use crate::identity::ServerIdentity;
use crate::keystore;
use crate::rpk;

/// Resolves the server identity.
///
/// Mode selection is presence based: a configured certificate store path
/// selects certificate-chain mode, its absence selects raw-public-key mode.
pub struct CredentialSource;

impl CredentialSource {
    pub fn resolve(config: &ServerConfig) -> CredentialResult<ServerIdentity> {
        match &config.keystore.path {
            Some(path) => {
                let settings = &config.keystore;
                settings.kind()?;

                let store = keystore::open_store(path, settings.store_password())?;
                let identity = keystore::resolve_from_store(&store, &settings.alias)?;

                info!(
                    path = %path.display(),
                    alias = %settings.alias,
                    subject = %identity.leaf().subject,
                    chain = identity.certificate_count(),
                    trusted = identity.trusted_count(),
                    "Using certificate-chain credentials"
                );
                Ok(ServerIdentity::CertificateChain(identity))
            }
            None => {
                let rpk = &config.rpk;
                let identity = match (&rpk.public_x, &rpk.public_y, &rpk.private_s) {
                    (Some(x), Some(y), Some(s)) => rpk::reconstruct(x, y, s)?,
                    (None, None, None) if rpk.allow_demo_key => {
                        warn!("No server key configured, using the publicly known demo key pair");
                        rpk::demo_key()?
                    }
                    (None, None, None) => {
                        return Err(ConfigError::invalid(
                            "rpk",
                            "no certificate store or raw key configured and the built-in demo key is disabled",
                        )
                        .into())
                    }
                    _ => {
                        return Err(ConfigError::invalid(
                            "rpk",
                            "public_x, public_y and private_s must be configured together",
                        )
                        .into())
                    }
                };

                let identity = ServerIdentity::RawPublicKey(identity);
                rpk::write_public_key_file(&rpk.public_key_file, identity.public_key_der());

                info!(
                    public_key = %hex::encode(identity.public_key_der()),
                    "Using raw-public-key credentials"
                );
                Ok(identity)
            }
        }
    }
}
