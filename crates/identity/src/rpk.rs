//! Raw public key pair on secp256r1.
//!
//! Coordinates and the private scalar are 32-byte big-endian values written
//! as hex. The public point must lie on the curve and the scalar must derive
//! it; either failure aborts before a key object exists.

use std::path::Path;

use p256::{PublicKey, SecretKey};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{CredentialError, CredentialResult};
use crate::identity::RawKeyIdentity;

/// Publicly known demo key pair. Never use it outside of a lab.
pub const DEMO_PUBLIC_X: &str = "fcc28728c123b155be410fc1c0651da374fc6ebe7f96606e90d927d188894a73";
pub const DEMO_PUBLIC_Y: &str = "d2ffaa73957d76984633fc1cc54d0b763ca0559a9dff9706e9f4557dacc3f52a";
pub const DEMO_PRIVATE_S: &str = "1dae121ba406802ef07c193c1ee4df91115aabd79c1ed7f4c0ef7ef6a5449400";

const FIELD_LEN: usize = 32;

/// Uncompressed SEC1 point tag.
const SEC1_UNCOMPRESSED: u8 = 0x04;

fn decode_component(name: &str, value: &str) -> CredentialResult<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(
        hex::decode(value.trim())
            .map_err(|e| CredentialError::malformed(format!("{name} is not valid hex: {e}")))?,
    );
    if bytes.len() != FIELD_LEN {
        return Err(CredentialError::malformed(format!(
            "{name} must be {FIELD_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Rebuilds the key pair from hex coordinates `x`, `y` and scalar `s`.
pub fn reconstruct(x: &str, y: &str, s: &str) -> CredentialResult<RawKeyIdentity> {
    let x = decode_component("public_x", x)?;
    let y = decode_component("public_y", y)?;
    let s = decode_component("private_s", s)?;

    let mut point = Vec::with_capacity(1 + 2 * FIELD_LEN);
    point.push(SEC1_UNCOMPRESSED);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);

    let public = PublicKey::from_sec1_bytes(&point)
        .map_err(|_| CredentialError::malformed("public point is not on secp256r1"))?;
    let secret = SecretKey::from_slice(&s)
        .map_err(|_| CredentialError::malformed("private scalar is out of range for secp256r1"))?;

    RawKeyIdentity::new(secret, public)
}

/// Demo key pair.
pub fn demo_key() -> CredentialResult<RawKeyIdentity> {
    reconstruct(DEMO_PUBLIC_X, DEMO_PUBLIC_Y, DEMO_PRIVATE_S)
}

/// Writes the public key for out-of-band distribution, overwriting any
/// previous file. Failures are logged and reported as `false`.
pub fn write_public_key_file(path: &Path, public_key_der: &[u8]) -> bool {
    match std::fs::write(path, public_key_der) {
        Ok(()) => {
            info!(path = %path.display(), "Server public key written");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unable to write server public key file");
            false
        }
    }
}
