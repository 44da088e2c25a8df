use super::{local_content_ref, ContentRef, ContentStore};
use crate::error::{KeyledgerError, KeyledgerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-process store used by the self-test drill and the test suites.
///
/// Availability can be toggled to simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<ContentRef, Vec<u8>>>,
    offline: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or recover).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, content_ref: &str) -> bool {
        self.lock().contains_key(content_ref)
    }

    /// Overwrite stored bytes in place, bypassing content addressing.
    /// Lets tests model a store that hands back damaged data.
    pub fn replace(&self, content_ref: &str, bytes: Vec<u8>) {
        self.lock().insert(content_ref.to_string(), bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ContentRef, Vec<u8>>> {
        // A poisoned map is still structurally valid.
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> KeyledgerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(KeyledgerError::StoreUnavailable(
                "memory store is offline".into(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef> {
        self.ensure_available()?;
        let content_ref = local_content_ref(&bytes);
        self.lock().insert(content_ref.clone(), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(content_ref)
    }

    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>> {
        self.ensure_available()?;
        self.lock()
            .get(content_ref)
            .cloned()
            .ok_or_else(|| KeyledgerError::NotFound(content_ref.to_string()))
    }
}
