//! Reference ledger: the lifecycle state machine held in process, optionally
//! mirrored to a JSON snapshot so a local CLI keeps state between runs.
//!
//! With a snapshot the file is the source of truth. Every commit holds an
//! exclusive lock on `<snapshot>.lock`, re-reads the snapshot, applies the
//! transition and renames the new snapshot into place before releasing the
//! lock, so several processes can share one ledger file.

use super::{Confirmation, EventKind, KeyRecord, KeyState, LedgerRegistry, LifecycleEvent};
use crate::error::{KeyledgerError, KeyledgerResult};
use crate::identity::{KeyId, Principal};
use async_trait::async_trait;
use fd_lock::RwLock;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    keys: BTreeMap<KeyId, KeyRecord>,
    owners: BTreeMap<Principal, Vec<KeyId>>,
    events: Vec<LifecycleEvent>,
    block_number: u64,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<LedgerState>,
    snapshot: Option<PathBuf>,
}

/// Shared ledger state. Clones refer to the same ledger; use
/// [`MemoryLedger::connect`] to act on it as a particular principal.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Volatile ledger, lost when the last handle is dropped.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedgerState::default()),
                snapshot: None,
            }),
        }
    }

    /// Ledger persisted at `path`. A missing file starts an empty ledger;
    /// every committed transition rewrites the snapshot.
    pub fn open(path: impl AsRef<Path>) -> KeyledgerResult<Self> {
        let path = path.as_ref();
        let state = read_snapshot(path)?;
        debug!(
            "opened ledger snapshot {} at block {}",
            path.display(),
            state.block_number
        );
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                snapshot: Some(path.to_path_buf()),
            }),
        })
    }

    /// Handle that submits writes as `principal`.
    pub fn connect(&self, principal: Principal) -> LedgerSession {
        LedgerSession {
            ledger: self.clone(),
            principal,
        }
    }

    /// Height of the latest block this handle has seen (0 before the first
    /// commit).
    pub fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.inner.snapshot.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// State for a read, refreshed from the snapshot when there is one.
    fn current(&self) -> KeyledgerResult<MutexGuard<'_, LedgerState>> {
        let mut guard = self.lock();
        if let Some(path) = &self.inner.snapshot {
            *guard = read_snapshot(path)?;
        }
        Ok(guard)
    }

    /// Apply `transition` to a copy of the latest state, persist it, then
    /// publish it. A failing transition or snapshot write leaves the ledger
    /// untouched.
    fn commit<F>(
        &self,
        kind: EventKind,
        key_id: &KeyId,
        actor: &Principal,
        transition: F,
    ) -> KeyledgerResult<Confirmation>
    where
        F: FnOnce(&mut LedgerState, u64) -> KeyledgerResult<Option<String>>,
    {
        let mut guard = self.lock();
        let (next, confirmation) = match self.inner.snapshot.as_deref() {
            None => advance(&guard, kind, key_id, actor, transition)?,
            Some(path) => {
                let mut lock = lock_file(path)?;
                let _held = lock.write().map_err(|err| unavailable(path, err))?;
                *guard = read_snapshot(path)?;
                let (next, confirmation) = advance(&guard, kind, key_id, actor, transition)?;
                write_snapshot(path, &next)?;
                (next, confirmation)
            }
        };
        *guard = next;

        info!(
            "{} {} by {} in block {}",
            kind.event_name(),
            key_id,
            actor,
            confirmation.block_number
        );
        Ok(confirmation)
    }
}

/// Build the state that follows `state` once `transition` commits.
fn advance<F>(
    state: &LedgerState,
    kind: EventKind,
    key_id: &KeyId,
    actor: &Principal,
    transition: F,
) -> KeyledgerResult<(LedgerState, Confirmation)>
where
    F: FnOnce(&mut LedgerState, u64) -> KeyledgerResult<Option<String>>,
{
    let mut next = state.clone();
    let now = crate::unix_now();
    let content_ref = transition(&mut next, now)?;

    next.block_number += 1;
    let block_number = next.block_number;
    let tx_hash = tx_hash(block_number, kind, key_id, actor);
    next.events.push(LifecycleEvent {
        kind,
        key_id: *key_id,
        content_ref,
        actor: actor.clone(),
        timestamp: now,
        block_number,
        tx_hash: tx_hash.clone(),
    });

    Ok((
        next,
        Confirmation {
            tx_hash,
            block_number,
        },
    ))
}

/// A [`MemoryLedger`] bound to the principal that signs its writes.
#[derive(Debug, Clone)]
pub struct LedgerSession {
    ledger: MemoryLedger,
    principal: Principal,
}

impl LedgerSession {
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl LedgerRegistry for LedgerSession {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    async fn register(&self, key_id: &KeyId, content_ref: &str) -> KeyledgerResult<Confirmation> {
        let owner = self.principal.clone();
        self.ledger
            .commit(EventKind::Registered, key_id, &self.principal, |state, now| {
                require_reference(content_ref)?;
                if state.keys.contains_key(key_id) {
                    return Err(KeyledgerError::KeyAlreadyExists(key_id.to_string()));
                }
                state.keys.insert(
                    *key_id,
                    KeyRecord {
                        key_id: *key_id,
                        content_ref: content_ref.to_string(),
                        state: KeyState::Active,
                        owner: owner.clone(),
                        registered_at: now,
                        rotated_at: 0,
                    },
                );
                state.owners.entry(owner).or_default().push(*key_id);
                Ok(Some(content_ref.to_string()))
            })
    }

    async fn rotate(
        &self,
        key_id: &KeyId,
        new_content_ref: &str,
    ) -> KeyledgerResult<Confirmation> {
        let caller = &self.principal;
        self.ledger
            .commit(EventKind::Rotated, key_id, caller, |state, now| {
                require_reference(new_content_ref)?;
                let record = mutable_record(state, key_id, caller)?;
                record.content_ref = new_content_ref.to_string();
                record.rotated_at = now;
                Ok(Some(new_content_ref.to_string()))
            })
    }

    async fn revoke(&self, key_id: &KeyId) -> KeyledgerResult<Confirmation> {
        let caller = &self.principal;
        self.ledger
            .commit(EventKind::Revoked, key_id, caller, |state, _| {
                let record = mutable_record(state, key_id, caller)?;
                record.state = KeyState::Revoked;
                Ok(None)
            })
    }

    async fn get_metadata(&self, key_id: &KeyId) -> KeyledgerResult<KeyRecord> {
        let record = self.ledger.current()?.keys.get(key_id).cloned();
        record.ok_or_else(|| KeyledgerError::KeyNotFound(key_id.to_string()))
    }

    async fn get_keys_for_owner(&self, owner: &Principal) -> KeyledgerResult<Vec<KeyId>> {
        let ids = self.ledger.current()?.owners.get(owner).cloned();
        Ok(ids.unwrap_or_default())
    }

    async fn get_events(&self, key_id: &KeyId) -> KeyledgerResult<Vec<LifecycleEvent>> {
        let mut events: Vec<LifecycleEvent> = self
            .ledger
            .current()?
            .events
            .iter()
            .filter(|event| &event.key_id == key_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.block_number);
        Ok(events)
    }
}

fn require_reference(content_ref: &str) -> KeyledgerResult<()> {
    if content_ref.is_empty() {
        Err(KeyledgerError::InvalidReference)
    } else {
        Ok(())
    }
}

/// Look up a record that `caller` is allowed to mutate: it must exist, be
/// owned by `caller`, and still be active.
fn mutable_record<'a>(
    state: &'a mut LedgerState,
    key_id: &KeyId,
    caller: &Principal,
) -> KeyledgerResult<&'a mut KeyRecord> {
    let record = state
        .keys
        .get_mut(key_id)
        .ok_or_else(|| KeyledgerError::KeyNotFound(key_id.to_string()))?;
    if &record.owner != caller {
        return Err(KeyledgerError::Unauthorized {
            key_id: key_id.to_string(),
            caller: caller.to_string(),
        });
    }
    if record.state == KeyState::Revoked {
        return Err(KeyledgerError::KeyRevoked(key_id.to_string()));
    }
    Ok(record)
}

fn tx_hash(block_number: u64, kind: EventKind, key_id: &KeyId, actor: &Principal) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(block_number.to_be_bytes());
    hasher.update(kind.event_name().as_bytes());
    hasher.update(key_id.as_bytes());
    hasher.update(actor.as_str().as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

fn unavailable(path: &Path, err: io::Error) -> KeyledgerError {
    KeyledgerError::LedgerUnavailable(format!("{}: {err}", path.display()))
}

fn read_snapshot(path: &Path) -> KeyledgerResult<LedgerState> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(LedgerState::default()),
        Err(err) => Err(err.into()),
    }
}

/// Advisory lock guarding commits to the snapshot at `path`.
fn lock_file(path: &Path) -> KeyledgerResult<RwLock<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| unavailable(path, err))?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path.with_extension("lock"))
        .map_err(|err| unavailable(path, err))?;
    Ok(RwLock::new(file))
}

/// Caller must hold the snapshot lock.
fn write_snapshot(path: &Path, state: &LedgerState) -> KeyledgerResult<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let staging = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&staging, bytes).map_err(|err| unavailable(path, err))?;
    fs::set_permissions(&staging, fs::Permissions::from_mode(0o600))
        .map_err(|err| unavailable(path, err))?;
    fs::rename(&staging, path).map_err(|err| unavailable(path, err))?;
    Ok(())
}
