//! Cryptographic engine: password stretching, key wrapping and message
//! encryption. Nothing in here performs I/O.
//!
//! | parameter        | value              |
//! |------------------|--------------------|
//! | KDF              | PBKDF2-HMAC-SHA256 |
//! | KDF iterations   | 100,000            |
//! | cipher           | AES-256-GCM        |
//! | salt / IV / tag  | 16 / 12 / 16 bytes |
//! | raw key          | 32 bytes           |

mod aead;
mod blob;
mod kdf;
mod keys;

pub use blob::{
    decrypt_message, encrypt_message, unwrap_key_material, wrap_key_material, BlobMetadata,
    CipherBundle, EncryptedKeyBlob,
};
pub(crate) use blob::{unwrap_with_iterations, wrap_with_iterations};
pub use kdf::derive_wrapping_key;
pub use keys::{generate_raw_key, RawKeyMaterial, WrappingKey};

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const RAW_KEY_LEN: usize = 32;

pub const BLOB_VERSION: &str = "1.0";
pub const ALGORITHM: &str = "AES-256-GCM";
pub const KEY_TYPE: &str = "symmetric";

/// Standard padded base64, the encoding used by every persisted binary field.
pub(crate) mod b64 {
    use crate::error::{KeyledgerError, KeyledgerResult};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode(encoded: &str, field: &str) -> KeyledgerResult<Vec<u8>> {
        STANDARD
            .decode(encoded)
            .map_err(|err| KeyledgerError::CorruptBlob(format!("{field} is not valid base64: {err}")))
    }

    pub fn decode_array<const N: usize>(encoded: &str, field: &str) -> KeyledgerResult<[u8; N]> {
        let bytes = decode(encoded, field)?;
        bytes.as_slice().try_into().map_err(|_| {
            KeyledgerError::CorruptBlob(format!(
                "{field} must be {N} bytes (got {})",
                bytes.len()
            ))
        })
    }
}
