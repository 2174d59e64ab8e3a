//! Server credential provisioning for the BPMS device management server.
//!
//! The server authenticates to devices either with an X.509 certificate
//! chain read from a PKCS#12 store, or with a bare secp256r1 key pair
//! (raw public key). [`CredentialSource::resolve`] picks the mode from the
//! configuration, validates the material and returns a [`ServerIdentity`].
//!
//! # Validation order
//!
//! Certificate-chain mode fails fast, in this order:
//! 1. the store opens with the configured password
//! 2. the alias names a private-key entry
//! 3. the chain is non-empty
//! 4. every chain element is an X.509 certificate
//! 5. the key is a PKCS#8 private key
//!
//! No partially populated identity is ever returned.

pub mod certificate;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod rpk;
pub mod source;

pub use certificate::Certificate;
pub use error::{CredentialError, CredentialResult};
pub use identity::{CertificateIdentity, CredentialMode, RawKeyIdentity, ServerIdentity};
pub use source::CredentialSource;
