//! Secret key containers. Both types wipe their bytes on drop and never print
//! their contents through `Debug`.

use crate::crypto::{b64, RAW_KEY_LEN};
use crate::error::{KeyledgerError, KeyledgerResult};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The managed 256-bit secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RawKeyMaterial([u8; RAW_KEY_LEN]);

impl RawKeyMaterial {
    pub fn from_bytes(bytes: [u8; RAW_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != RAW_KEY_LEN {
            return None;
        }
        let mut bytes = [0u8; RAW_KEY_LEN];
        bytes.copy_from_slice(slice);
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; RAW_KEY_LEN] {
        &self.0
    }

    /// Base64 export for the one-time display after registration or rotation.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(b64::encode(self.0))
    }

    pub fn from_base64(encoded: &str) -> KeyledgerResult<Self> {
        let decoded = Zeroizing::new(b64::decode(encoded.trim(), "raw key")?);
        Self::from_slice(&decoded).ok_or_else(|| {
            KeyledgerError::CorruptBlob(format!(
                "raw key must be {RAW_KEY_LEN} bytes (got {})",
                decoded.len()
            ))
        })
    }
}

impl PartialEq for RawKeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for RawKeyMaterial {}

impl fmt::Debug for RawKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawKeyMaterial(<redacted>)")
    }
}

/// Password-derived key. Only ever used to wrap or unwrap raw key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey([u8; RAW_KEY_LEN]);

impl WrappingKey {
    pub(crate) fn from_bytes(bytes: [u8; RAW_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RAW_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WrappingKey(<redacted>)")
    }
}

/// Draw a fresh raw key from the operating system's CSPRNG.
pub fn generate_raw_key() -> RawKeyMaterial {
    let mut bytes = [0u8; RAW_KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    RawKeyMaterial(bytes)
}
