pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod names;
pub mod registry;
pub mod store;
pub mod workflow;

pub use config::{KeyledgerConfig, LedgerCfg, NamesCfg, StoreBackend, StoreCfg};
pub use crypto::{CipherBundle, EncryptedKeyBlob, RawKeyMaterial};
pub use error::{ErrorClass, KeyledgerError, KeyledgerResult};
pub use identity::{KeyId, Principal};
pub use lifecycle::{LifecycleManager, Registration, Rotation};
pub use names::NameBook;
pub use registry::{
    Confirmation, EventKind, KeyRecord, KeyState, LedgerRegistry, LedgerSession, LifecycleEvent,
    MemoryLedger,
};
pub use store::{ContentRef, ContentStore, DirStore, MemoryStore};

/// Current unix time in seconds; 0 if the clock reads before the epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
