//! X.509 certificate handling for certificate-chain mode.
//!
//! Certificates are kept in their DER encoding; the parsed fields are
//! extracted once so logs and the management surface can show them.

use serde::{Deserialize, Serialize};
use x509_parser::prelude::FromDer;

/// DER-encoded X.509 certificate with its descriptive fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    /// Certificate serial number (hex, colon separated)
    pub serial: String,
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Subject public key (DER-encoded SubjectPublicKeyInfo)
    pub public_key: Vec<u8>,
    /// Not valid before (Unix timestamp, seconds)
    pub not_before: i64,
    /// Not valid after (Unix timestamp, seconds)
    pub not_after: i64,
    /// Complete certificate encoding
    pub der: Vec<u8>,
}

impl Certificate {
    /// Parse a single DER certificate. Trailing bytes are rejected.
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        let (rest, cert) = x509_parser::certificate::X509Certificate::from_der(der)
            .map_err(|e| format!("X.509 parse failure: {e}"))?;
        if !rest.is_empty() {
            return Err(format!(
                "{} trailing bytes after X.509 certificate",
                rest.len()
            ));
        }

        Ok(Self {
            serial: cert.raw_serial_as_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            public_key: cert.public_key().raw.to_vec(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            der: der.to_vec(),
        })
    }

    /// Check the validity window against a Unix timestamp.
    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }
}

/// Parse an ordered chain (leaf first). The whole chain must be X.509.
pub fn parse_der_chain<D: AsRef<[u8]>>(chain: &[D]) -> Result<Vec<Certificate>, String> {
    chain
        .iter()
        .enumerate()
        .map(|(position, der)| {
            Certificate::from_der(der.as_ref())
                .map_err(|reason| format!("certificate #{position}: {reason}"))
        })
        .collect()
}
