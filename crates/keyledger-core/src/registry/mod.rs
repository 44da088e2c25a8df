//! Typed surface over the ledger's key-lifecycle state machine.
//!
//! ```text
//! UNREGISTERED --register--> ACTIVE --rotate--> ACTIVE
//!                              |
//!                              +----revoke----> REVOKED (terminal)
//! ```
//!
//! Every write commits exactly one transition together with its event, or
//! nothing at all, and returns only once the transition is durable.

mod memory;

pub use memory::{LedgerSession, MemoryLedger};

use crate::error::KeyledgerResult;
use crate::identity::{KeyId, Principal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger-side lifecycle state of a registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyState {
    Active,
    Revoked,
}

impl KeyState {
    pub fn label(self) -> &'static str {
        match self {
            KeyState::Active => "ACTIVE",
            KeyState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ledger-resident metadata for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: KeyId,
    pub content_ref: String,
    pub state: KeyState,
    pub owner: Principal,
    /// Unix seconds; set once at registration.
    pub registered_at: u64,
    /// Unix seconds of the latest rotation, 0 if never rotated.
    pub rotated_at: u64,
}

impl KeyRecord {
    pub fn is_active(&self) -> bool {
        self.state == KeyState::Active
    }

    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn was_rotated(&self) -> bool {
        self.rotated_at != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Registered,
    Rotated,
    Revoked,
}

impl EventKind {
    /// Event name as emitted by the ledger contract.
    pub fn event_name(self) -> &'static str {
        match self {
            EventKind::Registered => "KeyRegistered",
            EventKind::Rotated => "KeyRotated",
            EventKind::Revoked => "KeyRevoked",
        }
    }
}

/// Append-only fact emitted for each committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub key_id: KeyId,
    /// New content reference for `Registered` and `Rotated`.
    pub content_ref: Option<String>,
    pub actor: Principal,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: String,
}

/// Proof that a write was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Client for the on-chain registry, bound to the principal that signs writes.
#[async_trait]
pub trait LedgerRegistry: Send + Sync {
    /// Principal every write is submitted as.
    fn principal(&self) -> &Principal;

    /// UNREGISTERED -> ACTIVE. Fails with `KeyAlreadyExists` or
    /// `InvalidReference`.
    async fn register(&self, key_id: &KeyId, content_ref: &str) -> KeyledgerResult<Confirmation>;

    /// ACTIVE -> ACTIVE with a new content reference, owner only.
    async fn rotate(&self, key_id: &KeyId, new_content_ref: &str)
        -> KeyledgerResult<Confirmation>;

    /// ACTIVE -> REVOKED, owner only. Revoking twice is an error.
    async fn revoke(&self, key_id: &KeyId) -> KeyledgerResult<Confirmation>;

    async fn get_metadata(&self, key_id: &KeyId) -> KeyledgerResult<KeyRecord>;

    /// Key ids registered by `owner`, in registration order.
    async fn get_keys_for_owner(&self, owner: &Principal) -> KeyledgerResult<Vec<KeyId>>;

    /// All events for `key_id`, ordered by block number ascending.
    async fn get_events(&self, key_id: &KeyId) -> KeyledgerResult<Vec<LifecycleEvent>>;
}
