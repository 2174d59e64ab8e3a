//! Server identity material.
//!
//! The two credential modes carry disjoint material sets, so they are two
//! variants of one sum type rather than optional fields on a single struct.

use std::fmt;

use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::certificate::Certificate;
use crate::error::{CredentialError, CredentialResult};

/// Which credential mode the server authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    CertificateChain,
    RawPublicKey,
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertificateChain => f.write_str("certificate-chain"),
            Self::RawPublicKey => f.write_str("raw-public-key"),
        }
    }
}

/// Validated server credentials, created once at startup.
pub enum ServerIdentity {
    CertificateChain(CertificateIdentity),
    RawPublicKey(RawKeyIdentity),
}

impl ServerIdentity {
    pub fn mode(&self) -> CredentialMode {
        match self {
            Self::CertificateChain(_) => CredentialMode::CertificateChain,
            Self::RawPublicKey(_) => CredentialMode::RawPublicKey,
        }
    }

    /// Server public key as DER SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> &[u8] {
        match self {
            Self::CertificateChain(id) => &id.public_key,
            Self::RawPublicKey(id) => &id.public_der,
        }
    }

    /// Server private key as DER PKCS#8.
    pub fn private_key_der(&self) -> &[u8] {
        match self {
            Self::CertificateChain(id) => &id.private_key,
            Self::RawPublicKey(id) => &id.private_der,
        }
    }

    /// Leaf-first chain. Empty in raw-public-key mode.
    pub fn certificate_chain(&self) -> &[Certificate] {
        match self {
            Self::CertificateChain(id) => &id.chain,
            Self::RawPublicKey(_) => &[],
        }
    }

    /// Trust anchors from the certificate store. Empty in raw-public-key mode.
    pub fn trusted_certificates(&self) -> &[Certificate] {
        match self {
            Self::CertificateChain(id) => &id.trusted,
            Self::RawPublicKey(_) => &[],
        }
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertificateChain(id) => f.debug_tuple("CertificateChain").field(id).finish(),
            Self::RawPublicKey(id) => f.debug_tuple("RawPublicKey").field(id).finish(),
        }
    }
}

/// Private key, leaf-first chain and trust anchors read from a certificate store.
pub struct CertificateIdentity {
    alias: String,
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
    chain: Vec<Certificate>,
    trusted: Vec<Certificate>,
}

impl CertificateIdentity {
    /// Builds the identity; the chain must hold at least the leaf.
    pub fn new(
        alias: impl Into<String>,
        private_key: Zeroizing<Vec<u8>>,
        chain: Vec<Certificate>,
        trusted: Vec<Certificate>,
    ) -> CredentialResult<Self> {
        let alias = alias.into();
        let public_key = match chain.first() {
            Some(leaf) => leaf.public_key.clone(),
            None => return Err(CredentialError::invalid_chain(alias, "certificate chain is empty")),
        };

        Ok(Self {
            alias,
            private_key,
            public_key,
            chain,
            trusted,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn leaf(&self) -> &Certificate {
        // Non-empty by construction.
        &self.chain[0]
    }

    pub fn certificate_count(&self) -> usize {
        self.chain.len()
    }

    pub fn trusted_count(&self) -> usize {
        self.trusted.len()
    }
}

impl fmt::Debug for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateIdentity")
            .field("alias", &self.alias)
            .field("subject", &self.leaf().subject)
            .field("chain_len", &self.chain.len())
            .field("trusted_len", &self.trusted.len())
            .finish_non_exhaustive()
    }
}

/// secp256r1 key pair used without certificates.
pub struct RawKeyIdentity {
    secret: SecretKey,
    public: PublicKey,
    private_der: Zeroizing<Vec<u8>>,
    public_der: Vec<u8>,
}

impl RawKeyIdentity {
    pub fn new(secret: SecretKey, public: PublicKey) -> CredentialResult<Self> {
        if secret.public_key() != public {
            return Err(CredentialError::malformed(
                "private scalar does not derive the configured public point",
            ));
        }

        let private_der = secret
            .to_pkcs8_der()
            .map_err(|e| CredentialError::malformed(format!("private key encoding: {e}")))?;
        let public_der = public
            .to_public_key_der()
            .map_err(|e| CredentialError::malformed(format!("public key encoding: {e}")))?;

        Ok(Self {
            private_der: Zeroizing::new(private_der.as_bytes().to_vec()),
            public_der: public_der.as_bytes().to_vec(),
            secret,
            public,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for RawKeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKeyIdentity")
            .field("public_key", &hex::encode(&self.public_der))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(byte: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        SecretKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_raw_identity_exposes_no_chain() {
        let secret = scalar(7);
        let public = secret.public_key();
        let identity = ServerIdentity::RawPublicKey(RawKeyIdentity::new(secret, public).unwrap());

        assert_eq!(identity.mode(), CredentialMode::RawPublicKey);
        assert!(identity.certificate_chain().is_empty());
        assert!(identity.trusted_certificates().is_empty());
        assert!(!identity.public_key_der().is_empty());
        assert!(!identity.private_key_der().is_empty());
    }

    #[test]
    fn test_raw_identity_rejects_mismatched_pair() {
        let public = scalar(9).public_key();
        let result = RawKeyIdentity::new(scalar(8), public);
        assert!(matches!(result, Err(CredentialError::MalformedKeyMaterial(_))));
    }

    #[test]
    fn test_certificate_identity_requires_leaf() {
        let result = CertificateIdentity::new("leshan", Zeroizing::new(vec![1]), vec![], vec![]);
        assert!(matches!(result, Err(CredentialError::InvalidChain { .. })));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let secret = scalar(3);
        let public = secret.public_key();
        let identity = RawKeyIdentity::new(secret, public).unwrap();
        let private_hex = hex::encode(&*identity.private_der);

        let rendered = format!("{:?}", ServerIdentity::RawPublicKey(identity));
        assert!(!rendered.contains(&private_hex));
    }
}
