use crate::crypto::keys::RawKeyMaterial;
use crate::crypto::{aead, b64, kdf};
use crate::crypto::{
    ALGORITHM, BLOB_VERSION, IV_LEN, KEY_TYPE, PBKDF2_ITERATIONS, RAW_KEY_LEN, SALT_LEN,
};
use crate::error::{KeyledgerError, KeyledgerResult};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Self-contained, password-protected container for one raw key. This is the
/// JSON document written to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKeyBlob {
    pub version: String,
    pub algorithm: String,
    /// Base64 ciphertext with the GCM tag appended.
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub metadata: BlobMetadata,
}

/// Non-sensitive descriptive fields carried alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub created_at: u64,
    pub key_type: String,
    pub name: String,
}

/// Output of [`encrypt_message`]; never persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBundle {
    pub ciphertext: String,
    pub iv: String,
    pub algorithm: String,
}

/// Protect `raw` under `password` with a fresh salt and IV.
pub fn wrap_key_material(
    raw: &RawKeyMaterial,
    password: &str,
    name: &str,
) -> KeyledgerResult<EncryptedKeyBlob> {
    wrap_with_iterations(raw, password, name, PBKDF2_ITERATIONS)
}

pub(crate) fn wrap_with_iterations(
    raw: &RawKeyMaterial,
    password: &str,
    name: &str,
    iterations: u32,
) -> KeyledgerResult<EncryptedKeyBlob> {
    let salt = kdf::generate_salt();
    let iv = aead::generate_iv();
    let wrapping = kdf::derive_with_iterations(password, &salt, iterations)?;
    let ciphertext = aead::seal(wrapping.as_bytes(), &iv, raw.as_bytes())?;

    Ok(EncryptedKeyBlob {
        version: BLOB_VERSION.to_string(),
        algorithm: ALGORITHM.to_string(),
        ciphertext: b64::encode(&ciphertext),
        iv: b64::encode(iv),
        salt: b64::encode(salt),
        metadata: BlobMetadata {
            created_at: crate::unix_now(),
            key_type: KEY_TYPE.to_string(),
            name: name.to_string(),
        },
    })
}

/// Recover the raw key from `blob`.
///
/// A wrong password and a tampered blob both fail the tag check and are
/// reported as [`KeyledgerError::AuthenticationFailure`]. Structural damage
/// (bad base64, wrong field lengths, unknown cipher) is `CorruptBlob`.
pub fn unwrap_key_material(
    blob: &EncryptedKeyBlob,
    password: &str,
) -> KeyledgerResult<RawKeyMaterial> {
    unwrap_with_iterations(blob, password, PBKDF2_ITERATIONS)
}

pub(crate) fn unwrap_with_iterations(
    blob: &EncryptedKeyBlob,
    password: &str,
    iterations: u32,
) -> KeyledgerResult<RawKeyMaterial> {
    if blob.version != BLOB_VERSION {
        return Err(KeyledgerError::CorruptBlob(format!(
            "unsupported blob version `{}`",
            blob.version
        )));
    }
    check_algorithm(&blob.algorithm)?;

    let salt: [u8; SALT_LEN] = b64::decode_array(&blob.salt, "salt")?;
    let iv: [u8; IV_LEN] = b64::decode_array(&blob.iv, "iv")?;
    let ciphertext = b64::decode(&blob.ciphertext, "ciphertext")?;

    let wrapping = kdf::derive_with_iterations(password, &salt, iterations)?;
    let plaintext = Zeroizing::new(aead::open(wrapping.as_bytes(), &iv, &ciphertext)?);

    RawKeyMaterial::from_slice(&plaintext).ok_or_else(|| {
        KeyledgerError::CorruptBlob(format!(
            "wrapped key must be {RAW_KEY_LEN} bytes (got {})",
            plaintext.len()
        ))
    })
}

/// Encrypt an arbitrary message with an already unlocked raw key.
pub fn encrypt_message(plaintext: &str, key: &RawKeyMaterial) -> KeyledgerResult<CipherBundle> {
    let iv = aead::generate_iv();
    let ciphertext = aead::seal(key.as_bytes(), &iv, plaintext.as_bytes())?;
    Ok(CipherBundle {
        ciphertext: b64::encode(&ciphertext),
        iv: b64::encode(iv),
        algorithm: ALGORITHM.to_string(),
    })
}

pub fn decrypt_message(bundle: &CipherBundle, key: &RawKeyMaterial) -> KeyledgerResult<String> {
    check_algorithm(&bundle.algorithm)?;
    let iv: [u8; IV_LEN] = b64::decode_array(&bundle.iv, "iv")?;
    let ciphertext = b64::decode(&bundle.ciphertext, "ciphertext")?;
    let plaintext = aead::open(key.as_bytes(), &iv, &ciphertext)?;
    String::from_utf8(plaintext)
        .map_err(|_| KeyledgerError::CorruptBlob("decrypted message is not UTF-8".into()))
}

fn check_algorithm(algorithm: &str) -> KeyledgerResult<()> {
    if algorithm == ALGORITHM {
        Ok(())
    } else {
        Err(KeyledgerError::CorruptBlob(format!(
            "unsupported algorithm `{algorithm}`"
        )))
    }
}
