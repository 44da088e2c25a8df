//! Local name book: remembers which human name produced each key id.
//!
//! Key ids are one-way hashes, so listings would otherwise show bare digests.
//! The book is display-only; lifecycle operations never consult it.

use crate::error::KeyledgerResult;
use crate::identity::KeyId;
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct NameBook {
    path: PathBuf,
    entries: BTreeMap<KeyId, String>,
}

impl NameBook {
    /// Load the book stored at `path`; a missing file yields an empty book.
    pub fn load(path: impl Into<PathBuf>) -> KeyledgerResult<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember `name` and return the id it hashes to.
    pub fn record(&mut self, name: &str) -> KeyId {
        let id = KeyId::from_name(name);
        self.entries.insert(id, name.to_string());
        id
    }

    pub fn lookup(&self, id: &KeyId) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    /// Name for display, falling back to the abbreviated id.
    pub fn display_name(&self, id: &KeyId) -> String {
        self.lookup(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.short())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the book back with owner-only permissions.
    pub fn save(&self) -> KeyledgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(&self.path, bytes)?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        debug!(
            "saved {} names to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
