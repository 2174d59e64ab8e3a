use std::sync::Arc;

use serde::Serialize;

use bpms_identity::{CredentialMode, ServerIdentity};
use bpms_model::ObjectModelProvider;
use bpms_store::{BackendKind, SecurityStore};

use crate::registration::RegistrationService;

/// Shared state of the management surface.
pub struct AppState {
    pub security: Arc<dyn SecurityStore>,
    pub registrations: RegistrationService,
    pub models: Arc<dyn ObjectModelProvider>,
    pub server_security: ServerSecurityView,
    pub backend: BackendKind,
    pub api_token: Option<String>,
}

/// Public part of the server identity, for display.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSecurityView {
    pub mode: CredentialMode,
    /// Certificate store alias the credentials were read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Hex DER SubjectPublicKeyInfo.
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateView>,
    pub trusted_certificates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateView {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: i64,
    pub not_after: i64,
    /// Hex DER of the leaf certificate.
    pub der: String,
}

impl ServerSecurityView {
    pub fn from_identity(identity: &ServerIdentity) -> Self {
        let certificate = identity.certificate_chain().first().map(|leaf| CertificateView {
            subject: leaf.subject.clone(),
            issuer: leaf.issuer.clone(),
            serial: leaf.serial.clone(),
            not_before: leaf.not_before,
            not_after: leaf.not_after,
            der: hex::encode(&leaf.der),
        });

        let alias = match identity {
            ServerIdentity::CertificateChain(id) => Some(id.alias().to_string()),
            ServerIdentity::RawPublicKey(_) => None,
        };

        Self {
            mode: identity.mode(),
            alias,
            public_key: hex::encode(identity.public_key_der()),
            certificate,
            trusted_certificates: identity.trusted_certificates().len(),
        }
    }
}
