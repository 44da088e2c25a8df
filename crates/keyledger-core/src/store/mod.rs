//! Content-addressed storage for encrypted key blobs.
//!
//! Stores only ever see opaque bytes; the typed helpers here handle the JSON
//! form of [`EncryptedKeyBlob`]. Backends have no cryptographic awareness.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use crate::crypto::EncryptedKeyBlob;
use crate::error::{KeyledgerError, KeyledgerResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Identifier returned by a store for a persisted blob (an IPFS CID for
/// remote stores, a `sha256-` digest for the local ones).
pub type ContentRef = String;

/// Abstraction over a content-addressed blob store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &str;

    /// Persist `bytes` and return a stable reference to them.
    ///
    /// Fails with `StoreUnavailable` when the backend cannot be reached.
    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef>;

    /// Fetch the bytes behind `content_ref`.
    ///
    /// Fails with `NotFound` for unknown references and `StoreUnavailable`
    /// for transport trouble.
    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>>;
}

#[async_trait]
impl<T: ContentStore + ?Sized> ContentStore for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef> {
        (**self).put(bytes).await
    }

    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>> {
        (**self).get(content_ref).await
    }
}

#[async_trait]
impl<T: ContentStore + ?Sized> ContentStore for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef> {
        (**self).put(bytes).await
    }

    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>> {
        (**self).get(content_ref).await
    }
}

/// Serialize `blob` and persist it through `store`.
pub async fn put_blob<S>(store: &S, blob: &EncryptedKeyBlob) -> KeyledgerResult<ContentRef>
where
    S: ContentStore + ?Sized,
{
    let bytes = serde_json::to_vec(blob)?;
    store.put(bytes).await
}

/// Fetch and deserialize the blob behind `content_ref`.
pub async fn get_blob<S>(store: &S, content_ref: &str) -> KeyledgerResult<EncryptedKeyBlob>
where
    S: ContentStore + ?Sized,
{
    let bytes = store.get(content_ref).await?;
    serde_json::from_slice(&bytes).map_err(|err| {
        KeyledgerError::CorruptBlob(format!("content {content_ref} is not a key blob: {err}"))
    })
}

/// Local content address: `sha256-<hex digest>`.
pub(crate) fn local_content_ref(bytes: &[u8]) -> ContentRef {
    format!("sha256-{}", hex::encode(Sha256::digest(bytes)))
}

pub(crate) fn is_local_content_ref(candidate: &str) -> bool {
    candidate
        .strip_prefix("sha256-")
        .map(|digest| {
            digest.len() == 64
                && digest
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BlobMetadata;

    fn sample_blob() -> EncryptedKeyBlob {
        EncryptedKeyBlob {
            version: "1.0".into(),
            algorithm: "AES-256-GCM".into(),
            ciphertext: "AAAA".into(),
            iv: "AAAAAAAAAAAAAAAA".into(),
            salt: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
            metadata: BlobMetadata {
                created_at: 1_700_000_000,
                key_type: "symmetric".into(),
                name: "sample".into(),
            },
        }
    }

    #[test]
    fn local_refs_are_content_hashes() {
        let a = local_content_ref(b"one");
        assert_eq!(a, local_content_ref(b"one"));
        assert_ne!(a, local_content_ref(b"two"));
        assert!(is_local_content_ref(&a));
    }

    #[test]
    fn local_ref_validation_rejects_paths() {
        assert!(!is_local_content_ref("../etc/passwd"));
        assert!(!is_local_content_ref("sha256-"));
        assert!(!is_local_content_ref(&format!("sha256-{}", "G".repeat(64))));
        assert!(!is_local_content_ref("QmTestCID123456789abcdef"));
    }

    #[tokio::test]
    async fn typed_helpers_round_trip() {
        let store = MemoryStore::new();
        let blob = sample_blob();
        let cid = put_blob(&store, &blob).await.unwrap();
        assert_eq!(get_blob(&store, &cid).await.unwrap(), blob);
    }

    #[tokio::test]
    async fn non_blob_content_is_corrupt() {
        let store = MemoryStore::new();
        let cid = store.put(b"{\"hello\":1}".to_vec()).await.unwrap();
        let err = get_blob(&store, &cid).await.unwrap_err();
        assert!(matches!(err, KeyledgerError::CorruptBlob(_)));
    }
}
