//! PKCS#12 certificate store access.
//!
//! The store is scanned once. Certificate-only entries become trust anchors;
//! the private-key entry under the configured alias supplies the server key
//! and chain. Anything else in the file is ignored.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use p12_keystore::{KeyStore, KeyStoreEntry};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::certificate::{parse_der_chain, Certificate};
use crate::error::{CredentialError, CredentialResult};
use crate::identity::CertificateIdentity;

/// Opens a PKCS#12 file. A bad MAC or password is reported as unreadable.
pub fn open_store(path: &Path, password: &str) -> CredentialResult<KeyStore> {
    let bytes = std::fs::read(path)
        .map_err(|e| CredentialError::store_unreadable(path, e.to_string()))?;

    KeyStore::from_pkcs12(&bytes, password)
        .map_err(|e| CredentialError::store_unreadable(path, e.to_string()))
}

/// Resolves the server credentials held under `alias`.
pub fn resolve_from_store(store: &KeyStore, alias: &str) -> CredentialResult<CertificateIdentity> {
    let mut trusted = Vec::new();
    let mut key_entry = None;
    let mut alias_kind = "no entry";

    for (name, entry) in store.entries() {
        match entry {
            KeyStoreEntry::Certificate(cert) => {
                if name == alias {
                    alias_kind = "a certificate entry";
                }
                match Certificate::from_der(cert.as_der()) {
                    Ok(parsed) => trusted.push(parsed),
                    Err(reason) => warn!(alias = %name, %reason, "Ignoring unparsable trusted certificate"),
                }
            }
            KeyStoreEntry::PrivateKeyChain(chain) if name == alias => {
                key_entry = Some(chain);
            }
            _ => debug!(alias = %name, "Ignoring certificate store entry"),
        }
    }

    let key_entry = key_entry.ok_or_else(|| CredentialError::wrong_entry(alias, alias_kind))?;

    let ders: Vec<&[u8]> = key_entry.chain().iter().map(|c| c.as_der()).collect();
    let chain = validate_chain(alias, &ders)?;

    let key = key_entry.key();
    validate_private_key(alias, key)?;

    let now = unix_now();
    if let Some(leaf) = chain.first().filter(|leaf| !leaf.is_valid_at(now)) {
        warn!(
            alias,
            subject = %leaf.subject,
            not_before = leaf.not_before,
            not_after = leaf.not_after,
            "Server certificate is outside its validity period"
        );
    }

    CertificateIdentity::new(alias, Zeroizing::new(key.to_vec()), chain, trusted)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Chain must be non-empty and made only of X.509 certificates.
pub fn validate_chain(alias: &str, chain: &[&[u8]]) -> CredentialResult<Vec<Certificate>> {
    if chain.is_empty() {
        return Err(CredentialError::invalid_chain(alias, "certificate chain is empty"));
    }
    parse_der_chain(chain).map_err(|reason| CredentialError::invalid_chain(alias, reason))
}

/// Key bytes must be a PKCS#8 private key.
pub fn validate_private_key(alias: &str, key: &[u8]) -> CredentialResult<()> {
    p256::pkcs8::PrivateKeyInfo::try_from(key)
        .map(|_| ())
        .map_err(|_| CredentialError::wrong_entry(alias, "an entry without a PKCS#8 private key"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p12_keystore::PrivateKeyChain;

    fn self_signed(cn: &str) -> (rcgen::KeyPair, Vec<u8>) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        let der = params.self_signed(&key).unwrap().der().to_vec();
        (key, der)
    }

    #[test]
    fn test_empty_chain_rejected() {
        let (key, _) = self_signed("server");
        let mut store = KeyStore::new();
        store.add_entry(
            "leshan",
            KeyStoreEntry::PrivateKeyChain(PrivateKeyChain::new(key.serialize_der(), [1u8; 20], vec![])),
        );

        let result = resolve_from_store(&store, "leshan");
        assert!(matches!(result, Err(CredentialError::InvalidChain { .. })));
    }

    #[test]
    fn test_non_x509_chain_rejected() {
        let (_, leaf) = self_signed("server");
        let chain: Vec<&[u8]> = vec![&leaf, b"not a certificate"];

        let result = validate_chain("leshan", &chain);
        assert!(matches!(result, Err(CredentialError::InvalidChain { ref reason, .. }) if reason.contains("#1")));
    }

    #[test]
    fn test_missing_alias() {
        let (_, der) = self_signed("anchor");
        let mut store = KeyStore::new();
        store.add_entry(
            "anchor",
            KeyStoreEntry::Certificate(p12_keystore::Certificate::from_der(&der).unwrap()),
        );

        let result = resolve_from_store(&store, "leshan");
        assert!(matches!(
            result,
            Err(CredentialError::MissingOrWrongEntryType { ref found, .. }) if found == "no entry"
        ));
    }

    #[test]
    fn test_non_pkcs8_key_rejected() {
        let result = validate_private_key("leshan", &[0x30, 0x03, 0x02, 0x01, 0x00]);
        assert!(matches!(result, Err(CredentialError::MissingOrWrongEntryType { .. })));

        let (key, _) = self_signed("server");
        assert!(validate_private_key("leshan", &key.serialize_der()).is_ok());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_store(&dir.path().join("absent.p12"), "secret");
        assert!(matches!(result, Err(CredentialError::StoreUnreadable { .. })));
    }
}
