use crate::error::{KeyledgerError, KeyledgerResult};
use crate::identity::Principal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `store.jwt`.
pub const PINATA_JWT_ENV: &str = "KEYLEDGER_PINATA_JWT";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LedgerCfg {
    /// Account every write is submitted as.
    pub principal: String,

    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_state_path() -> String {
    "/var/lib/keyledger/ledger.json".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Directory,
    Pinata,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoreCfg {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_dir")]
    pub dir: String,

    #[serde(default)]
    pub jwt: Option<String>,

    #[serde(default = "default_upload_url")]
    pub upload_url: String,

    #[serde(default = "default_legacy_url")]
    pub legacy_url: String,

    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_dir() -> String {
    "/var/lib/keyledger/blobs".to_string()
}

fn default_upload_url() -> String {
    "https://uploads.pinata.cloud/v3/files".to_string()
}

fn default_legacy_url() -> String {
    "https://api.pinata.cloud/pinning/pinJSONToIPFS".to_string()
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud/ipfs".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: default_store_dir(),
            jwt: None,
            upload_url: default_upload_url(),
            legacy_url: default_legacy_url(),
            gateway_url: default_gateway_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NamesCfg {
    #[serde(default = "default_names_path")]
    pub path: String,
}

fn default_names_path() -> String {
    "/var/lib/keyledger/names.json".to_string()
}

impl Default for NamesCfg {
    fn default() -> Self {
        Self {
            path: default_names_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeyledgerConfig {
    pub ledger: LedgerCfg,

    #[serde(default)]
    pub store: StoreCfg,

    #[serde(default)]
    pub names: NamesCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl KeyledgerConfig {
    /// Load a config file, TOML for `.toml` and YAML otherwise, then apply
    /// environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> KeyledgerResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.apply_env_overrides();

        if cfg.ledger.principal.trim().is_empty() {
            return Err(KeyledgerError::InvalidConfig(
                "ledger.principal must name the acting account".to_string(),
            ));
        }

        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(jwt) = std::env::var(PINATA_JWT_ENV) {
            if !jwt.trim().is_empty() {
                self.store.jwt = Some(jwt.trim().to_string());
            }
        }
    }

    /// Human-readable problems that would make the configured backends unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.ledger.principal.trim().is_empty() {
            issues.push("ledger.principal is empty".to_string());
        }
        if self.ledger.state_path.trim().is_empty() {
            issues.push("ledger.state_path is empty".to_string());
        }
        if self.names.path.trim().is_empty() {
            issues.push("names.path is empty".to_string());
        }

        match self.store.backend {
            StoreBackend::Directory => {
                if self.store.dir.trim().is_empty() {
                    issues.push("store.dir is empty but backend = \"directory\"".to_string());
                }
            }
            StoreBackend::Pinata => {
                if self.pinata_jwt().is_none() {
                    issues.push(format!(
                        "store.backend = \"pinata\" needs store.jwt or {PINATA_JWT_ENV}"
                    ));
                }
                for (field, url) in [
                    ("store.upload_url", &self.store.upload_url),
                    ("store.legacy_url", &self.store.legacy_url),
                    ("store.gateway_url", &self.store.gateway_url),
                ] {
                    if !(url.starts_with("https://") || url.starts_with("http://")) {
                        issues.push(format!("{field} must be an http(s) URL (got `{url}`)"));
                    }
                }
                if self.store.timeout_secs == 0 {
                    issues.push("store.timeout_secs must be at least 1".to_string());
                }
            }
        }

        issues
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.ledger.principal.as_str())
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.ledger.state_path)
    }

    pub fn store_dir(&self) -> PathBuf {
        PathBuf::from(&self.store.dir)
    }

    pub fn names_path(&self) -> PathBuf {
        PathBuf::from(&self.names.path)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs)
    }

    pub fn pinata_jwt(&self) -> Option<&str> {
        self.store
            .jwt
            .as_deref()
            .map(str::trim)
            .filter(|jwt| !jwt.is_empty())
    }
}
