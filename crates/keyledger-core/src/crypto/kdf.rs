//! PBKDF2-HMAC-SHA256 password stretching for the wrapping key.

use crate::crypto::keys::WrappingKey;
use crate::crypto::{PBKDF2_ITERATIONS, RAW_KEY_LEN, SALT_LEN};
use crate::error::{KeyledgerError, KeyledgerResult};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

/// Derive the 256-bit wrapping key for `password` under `salt`.
///
/// Deterministic for identical inputs. The salt must be exactly
/// [`SALT_LEN`] bytes; anything else means the blob it came from is damaged.
pub fn derive_wrapping_key(password: &str, salt: &[u8]) -> KeyledgerResult<WrappingKey> {
    derive_with_iterations(password, salt, PBKDF2_ITERATIONS)
}

pub(crate) fn derive_with_iterations(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> KeyledgerResult<WrappingKey> {
    if salt.len() != SALT_LEN {
        return Err(KeyledgerError::CorruptBlob(format!(
            "salt must be {SALT_LEN} bytes (got {})",
            salt.len()
        )));
    }

    let mut derived = [0u8; RAW_KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations.max(1), &mut derived);
    Ok(WrappingKey::from_bytes(derived))
}

pub(crate) fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}
