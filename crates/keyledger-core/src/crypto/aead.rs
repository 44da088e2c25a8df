//! AES-256-GCM sealing shared by key wrapping and message encryption.
//!
//! The 16-byte authentication tag is appended to the ciphertext, matching the
//! layout other AES-GCM implementations (WebCrypto included) produce.

use crate::crypto::{IV_LEN, RAW_KEY_LEN};
use crate::error::{KeyledgerError, KeyledgerResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

pub(crate) fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

pub(crate) fn seal(
    key: &[u8; RAW_KEY_LEN],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> KeyledgerResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|err| KeyledgerError::CorruptBlob(format!("invalid AES key: {err}")))?;
    // Encryption only fails for plaintexts beyond the GCM length limit.
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| KeyledgerError::CorruptBlob("plaintext too large for AES-GCM".into()))
}

/// Decrypt and verify. Any tag mismatch surfaces as `AuthenticationFailure`;
/// a wrong key and a modified ciphertext are indistinguishable here.
pub(crate) fn open(
    key: &[u8; RAW_KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> KeyledgerResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|err| KeyledgerError::CorruptBlob(format!("invalid AES key: {err}")))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| KeyledgerError::AuthenticationFailure)
}
