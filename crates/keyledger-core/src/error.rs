use thiserror::Error;

/// Result alias for core operations.
pub type KeyledgerResult<T> = Result<T, KeyledgerError>;

#[derive(Error, Debug)]
pub enum KeyledgerError {
    #[error("[KL1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[KL1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[KL1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[KL1003] json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[KL1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[KL2000] authentication failed: wrong password or tampered ciphertext")]
    AuthenticationFailure,

    #[error("[KL2001] invalid key id `{0}`")]
    InvalidKeyId(String),

    #[error("[KL3000] key {0} is already registered")]
    KeyAlreadyExists(String),

    #[error("[KL3001] key {0} is not registered")]
    KeyNotFound(String),

    #[error("[KL3002] key {0} has been revoked")]
    KeyRevoked(String),

    #[error("[KL3003] {caller} is not the owner of key {key_id}")]
    Unauthorized { key_id: String, caller: String },

    #[error("[KL3004] content reference must not be empty")]
    InvalidReference,

    #[error("[KL3100] ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("[KL4000] content store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("[KL4001] content `{0}` not found in store")]
    NotFound(String),

    #[error("[KL4002] corrupt blob: {0}")]
    CorruptBlob(String),
}

/// Coarse grouping used by callers to decide how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Wrong password or tampered data; prompt again.
    Crypto,
    /// Lifecycle-state problem reported by the ledger.
    Ledger,
    /// Content store trouble; usually worth retrying later.
    Store,
    /// Local configuration, filesystem or input problem.
    Local,
}

impl KeyledgerError {
    pub fn code(&self) -> &'static str {
        match self {
            KeyledgerError::Io(_) => "KL1000",
            KeyledgerError::Toml(_) => "KL1001",
            KeyledgerError::Yaml(_) => "KL1002",
            KeyledgerError::Json(_) => "KL1003",
            KeyledgerError::InvalidConfig(_) => "KL1100",
            KeyledgerError::AuthenticationFailure => "KL2000",
            KeyledgerError::InvalidKeyId(_) => "KL2001",
            KeyledgerError::KeyAlreadyExists(_) => "KL3000",
            KeyledgerError::KeyNotFound(_) => "KL3001",
            KeyledgerError::KeyRevoked(_) => "KL3002",
            KeyledgerError::Unauthorized { .. } => "KL3003",
            KeyledgerError::InvalidReference => "KL3004",
            KeyledgerError::LedgerUnavailable(_) => "KL3100",
            KeyledgerError::StoreUnavailable(_) => "KL4000",
            KeyledgerError::NotFound(_) => "KL4001",
            KeyledgerError::CorruptBlob(_) => "KL4002",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            KeyledgerError::AuthenticationFailure => ErrorClass::Crypto,
            KeyledgerError::KeyAlreadyExists(_)
            | KeyledgerError::KeyNotFound(_)
            | KeyledgerError::KeyRevoked(_)
            | KeyledgerError::Unauthorized { .. }
            | KeyledgerError::InvalidReference
            | KeyledgerError::LedgerUnavailable(_) => ErrorClass::Ledger,
            KeyledgerError::StoreUnavailable(_)
            | KeyledgerError::NotFound(_)
            | KeyledgerError::CorruptBlob(_) => ErrorClass::Store,
            KeyledgerError::Io(_)
            | KeyledgerError::Toml(_)
            | KeyledgerError::Yaml(_)
            | KeyledgerError::Json(_)
            | KeyledgerError::InvalidConfig(_)
            | KeyledgerError::InvalidKeyId(_) => ErrorClass::Local,
        }
    }
}
