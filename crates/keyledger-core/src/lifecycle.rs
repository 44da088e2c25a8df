//! Lifecycle orchestration across the three tiers: local derivation, the
//! content store, and the ledger.
//!
//! Every write runs in the same order: generate and wrap key material, persist
//! the blob, then commit its reference on the ledger. The first failing step
//! aborts the sequence with its own error. Nothing is retried or rolled back,
//! so a ledger failure after a successful upload leaves an unreferenced blob
//! behind.

use crate::crypto::{self, EncryptedKeyBlob, RawKeyMaterial, PBKDF2_ITERATIONS};
use crate::error::{KeyledgerError, KeyledgerResult};
use crate::identity::{KeyId, Principal};
use crate::registry::{Confirmation, KeyRecord, LedgerRegistry, LifecycleEvent};
use crate::store::{get_blob, put_blob, ContentRef, ContentStore};
use log::{debug, info, warn};
use zeroize::Zeroizing;

/// Outcome of [`LifecycleManager::register_key`].
///
/// `raw_key` is the only copy of the new secret outside its encrypted blob.
#[derive(Debug)]
pub struct Registration {
    pub key_id: KeyId,
    pub content_ref: ContentRef,
    pub raw_key: RawKeyMaterial,
    pub confirmation: Confirmation,
}

/// Outcome of [`LifecycleManager::rotate_key`].
#[derive(Debug)]
pub struct Rotation {
    pub content_ref: ContentRef,
    pub raw_key: RawKeyMaterial,
    pub confirmation: Confirmation,
}

/// Stateless coordinator over a content store and a ledger session.
pub struct LifecycleManager<S: ContentStore, L: LedgerRegistry> {
    store: S,
    ledger: L,
    iterations: u32,
}

impl<S: ContentStore, L: LedgerRegistry> LifecycleManager<S, L> {
    pub fn new(store: S, ledger: L) -> Self {
        Self::with_iterations(store, ledger, PBKDF2_ITERATIONS)
    }

    /// Reduced work factor for unit tests.
    pub(crate) fn with_iterations(store: S, ledger: L, iterations: u32) -> Self {
        Self {
            store,
            ledger,
            iterations,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn principal(&self) -> &Principal {
        self.ledger.principal()
    }

    /// Create, protect and register a new key named `name`.
    pub async fn register_key(&self, name: &str, password: &str) -> KeyledgerResult<Registration> {
        let key_id = KeyId::from_name(name);
        debug!("register {key_id}: wrapping fresh key material");
        let (raw_key, blob) = self.seal_fresh_key(name, password).await?;

        debug!("register {key_id}: uploading blob to {} store", self.store.name());
        let content_ref = put_blob(&self.store, &blob).await?;

        debug!("register {key_id}: committing {content_ref} to ledger");
        let confirmation = self.ledger.register(&key_id, &content_ref).await?;

        info!(
            "registered key {key_id} at {content_ref} (block {})",
            confirmation.block_number
        );
        Ok(Registration {
            key_id,
            content_ref,
            raw_key,
            confirmation,
        })
    }

    /// Replace the material behind `key_id` with a freshly generated key
    /// protected by `password`.
    ///
    /// The new password is not checked against the previous one.
    pub async fn rotate_key(&self, key_id: &KeyId, password: &str) -> KeyledgerResult<Rotation> {
        debug!("rotate {key_id}: wrapping fresh key material");
        let (raw_key, blob) = self.seal_fresh_key(&key_id.to_string(), password).await?;

        debug!("rotate {key_id}: uploading blob to {} store", self.store.name());
        let content_ref = put_blob(&self.store, &blob).await?;

        debug!("rotate {key_id}: committing {content_ref} to ledger");
        let confirmation = self.ledger.rotate(key_id, &content_ref).await?;

        info!(
            "rotated key {key_id} to {content_ref} (block {})",
            confirmation.block_number
        );
        Ok(Rotation {
            content_ref,
            raw_key,
            confirmation,
        })
    }

    pub async fn revoke_key(&self, key_id: &KeyId) -> KeyledgerResult<Confirmation> {
        debug!("revoke {key_id}: committing to ledger");
        let confirmation = self.ledger.revoke(key_id).await?;
        info!(
            "revoked key {key_id} (block {})",
            confirmation.block_number
        );
        Ok(confirmation)
    }

    /// Records for every key `owner` registered, in registration order.
    pub async fn list_keys(&self, owner: &Principal) -> KeyledgerResult<Vec<KeyRecord>> {
        let ids = self.ledger.get_keys_for_owner(owner).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            records.push(self.ledger.get_metadata(id).await?);
        }
        Ok(records)
    }

    pub async fn list_events(&self, key_id: &KeyId) -> KeyledgerResult<Vec<LifecycleEvent>> {
        self.ledger.get_events(key_id).await
    }

    /// Fetch the current blob for `key_id` and decrypt it with `password`.
    ///
    /// A wrong password surfaces as [`KeyledgerError::AuthenticationFailure`].
    pub async fn unlock_key(&self, key_id: &KeyId, password: &str) -> KeyledgerResult<RawKeyMaterial> {
        let record = self.ledger.get_metadata(key_id).await?;
        if !record.is_active() {
            warn!("unlocking revoked key {key_id}");
        }

        debug!(
            "unlock {key_id}: fetching {} from {} store",
            record.content_ref,
            self.store.name()
        );
        let blob = get_blob(&self.store, &record.content_ref).await?;

        debug!("unlock {key_id}: deriving wrapping key");
        let raw_key = self.open_blob(blob, password).await?;
        info!("unlocked key {key_id}");
        Ok(raw_key)
    }

    pub async fn unlock_by_name(&self, name: &str, password: &str) -> KeyledgerResult<RawKeyMaterial> {
        self.unlock_key(&KeyId::from_name(name), password).await
    }

    async fn seal_fresh_key(
        &self,
        name: &str,
        password: &str,
    ) -> KeyledgerResult<(RawKeyMaterial, EncryptedKeyBlob)> {
        let name = name.to_string();
        let password = Zeroizing::new(password.to_string());
        let iterations = self.iterations;
        run_blocking(move || {
            let raw_key = crypto::generate_raw_key();
            let blob = crypto::wrap_with_iterations(&raw_key, &password, &name, iterations)?;
            Ok((raw_key, blob))
        })
        .await
    }

    async fn open_blob(&self, blob: EncryptedKeyBlob, password: &str) -> KeyledgerResult<RawKeyMaterial> {
        let password = Zeroizing::new(password.to_string());
        let iterations = self.iterations;
        run_blocking(move || crypto::unwrap_with_iterations(&blob, &password, iterations)).await
    }
}

/// Run PBKDF2-bound work on the blocking pool so async callers keep moving.
async fn run_blocking<T, F>(work: F) -> KeyledgerResult<T>
where
    F: FnOnce() -> KeyledgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(KeyledgerError::Io(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EventKind, KeyState, MemoryLedger};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FAST: u32 = 1;

    fn alice() -> Principal {
        Principal::new("0x00000000000000000000000000000000000a11ce")
    }

    fn manager() -> LifecycleManager<MemoryStore, crate::registry::LedgerSession> {
        let ledger = MemoryLedger::new().connect(alice());
        LifecycleManager::with_iterations(MemoryStore::new(), ledger, FAST)
    }

    /// Ledger double that counts calls and can refuse every write.
    struct CountingLedger {
        inner: crate::registry::LedgerSession,
        writes: AtomicUsize,
        fail_writes: bool,
    }

    impl CountingLedger {
        fn new(fail_writes: bool) -> Self {
            Self {
                inner: MemoryLedger::new().connect(alice()),
                writes: AtomicUsize::new(0),
                fail_writes,
            }
        }

        fn write_attempt(&self) -> KeyledgerResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                Err(KeyledgerError::LedgerUnavailable("rpc timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl LedgerRegistry for CountingLedger {
        fn principal(&self) -> &Principal {
            self.inner.principal()
        }

        async fn register(&self, key_id: &KeyId, content_ref: &str) -> KeyledgerResult<Confirmation> {
            self.write_attempt()?;
            self.inner.register(key_id, content_ref).await
        }

        async fn rotate(&self, key_id: &KeyId, new_content_ref: &str) -> KeyledgerResult<Confirmation> {
            self.write_attempt()?;
            self.inner.rotate(key_id, new_content_ref).await
        }

        async fn revoke(&self, key_id: &KeyId) -> KeyledgerResult<Confirmation> {
            self.write_attempt()?;
            self.inner.revoke(key_id).await
        }

        async fn get_metadata(&self, key_id: &KeyId) -> KeyledgerResult<KeyRecord> {
            self.inner.get_metadata(key_id).await
        }

        async fn get_keys_for_owner(&self, owner: &Principal) -> KeyledgerResult<Vec<KeyId>> {
            self.inner.get_keys_for_owner(owner).await
        }

        async fn get_events(&self, key_id: &KeyId) -> KeyledgerResult<Vec<LifecycleEvent>> {
            self.inner.get_events(key_id).await
        }
    }

    #[tokio::test]
    async fn register_then_unlock_returns_same_material() {
        let manager = manager();
        let registration = manager.register_key("MyTestKey", "pw").await.unwrap();

        assert_eq!(registration.key_id, KeyId::from_name("MyTestKey"));
        assert!(manager.store().contains(&registration.content_ref));

        let unlocked = manager.unlock_by_name("MyTestKey", "pw").await.unwrap();
        assert_eq!(unlocked, registration.raw_key);
    }

    #[tokio::test]
    async fn unlock_with_wrong_password_is_authentication_failure() {
        let manager = manager();
        let registration = manager.register_key("k", "right").await.unwrap();
        let err = manager
            .unlock_key(&registration.key_id, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyledgerError::AuthenticationFailure));
    }

    #[tokio::test]
    async fn rotation_replaces_material_and_reference() {
        let manager = manager();
        let registration = manager.register_key("k", "pw").await.unwrap();
        let rotation = manager.rotate_key(&registration.key_id, "pw2").await.unwrap();

        assert_ne!(rotation.content_ref, registration.content_ref);
        assert_ne!(rotation.raw_key, registration.raw_key);
        assert!(rotation.confirmation.block_number > registration.confirmation.block_number);

        let unlocked = manager.unlock_key(&registration.key_id, "pw2").await.unwrap();
        assert_eq!(unlocked, rotation.raw_key);
        // The superseded blob stays in the store and still opens with the old password.
        assert!(manager.store().contains(&registration.content_ref));
    }

    #[tokio::test]
    async fn store_failure_never_reaches_the_ledger() {
        let store = MemoryStore::new();
        store.set_available(false);
        let manager = LifecycleManager::with_iterations(store, CountingLedger::new(false), FAST);

        let err = manager.register_key("k", "pw").await.unwrap_err();
        assert!(matches!(err, KeyledgerError::StoreUnavailable(_)));
        assert_eq!(manager.ledger().writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ledger_failure_leaves_an_orphaned_blob() {
        let manager =
            LifecycleManager::with_iterations(MemoryStore::new(), CountingLedger::new(true), FAST);

        let err = manager.register_key("k", "pw").await.unwrap_err();
        assert!(matches!(err, KeyledgerError::LedgerUnavailable(_)));
        assert_eq!(manager.store().len(), 1);
        assert!(matches!(
            manager.ledger().get_metadata(&KeyId::from_name("k")).await,
            Err(KeyledgerError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_after_upload() {
        let manager = manager();
        let first = manager.register_key("dup", "pw").await.unwrap();
        let err = manager.register_key("dup", "pw").await.unwrap_err();
        assert!(matches!(err, KeyledgerError::KeyAlreadyExists(_)));
        assert_eq!(manager.store().put_count(), 2);

        let record = manager.ledger().get_metadata(&first.key_id).await.unwrap();
        assert_eq!(record.content_ref, first.content_ref);
        let unlocked = manager.unlock_key(&first.key_id, "pw").await.unwrap();
        assert_eq!(unlocked, first.raw_key);
    }

    #[tokio::test]
    async fn revoked_keys_cannot_rotate() {
        let manager = manager();
        let registration = manager.register_key("k", "pw").await.unwrap();
        manager.revoke_key(&registration.key_id).await.unwrap();

        let err = manager
            .rotate_key(&registration.key_id, "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyledgerError::KeyRevoked(_)));

        let record = manager.ledger().get_metadata(&registration.key_id).await.unwrap();
        assert_eq!(record.state, KeyState::Revoked);
        assert_eq!(record.content_ref, registration.content_ref);
    }

    #[tokio::test]
    async fn list_keys_follows_registration_order() {
        let manager = manager();
        manager.register_key("b", "pw").await.unwrap();
        manager.register_key("a", "pw").await.unwrap();

        let records = manager.list_keys(&alice()).await.unwrap();
        let ids: Vec<KeyId> = records.iter().map(|record| record.key_id).collect();
        assert_eq!(ids, vec![KeyId::from_name("b"), KeyId::from_name("a")]);
        assert!(records.iter().all(KeyRecord::is_active));
    }

    #[tokio::test]
    async fn events_track_each_transition() {
        let manager = manager();
        let id = manager.register_key("k", "pw").await.unwrap().key_id;
        manager.rotate_key(&id, "pw").await.unwrap();
        manager.revoke_key(&id).await.unwrap();

        let kinds: Vec<EventKind> = manager
            .list_events(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::Registered, EventKind::Rotated, EventKind::Revoked]
        );
    }

    #[tokio::test]
    async fn boxed_and_shared_stores_work_as_backends() {
        let shared = Arc::new(MemoryStore::new());
        let boxed: Box<dyn ContentStore> = Box::new(Arc::clone(&shared));
        let ledger = MemoryLedger::new().connect(alice());
        let manager = LifecycleManager::with_iterations(boxed, ledger, FAST);

        let registration = manager.register_key("k", "pw").await.unwrap();
        assert!(shared.contains(&registration.content_ref));
        assert_eq!(manager.store().name(), "memory");
    }
}
