use super::{is_local_content_ref, local_content_ref, ContentRef, ContentStore};
use crate::error::{KeyledgerError, KeyledgerResult};
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Content-addressed directory: each blob lives at `<root>/<ref>.json`,
/// readable by the owner only.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, content_ref: &str) -> PathBuf {
        self.root.join(format!("{content_ref}.json"))
    }
}

#[async_trait]
impl ContentStore for DirStore {
    fn name(&self) -> &str {
        "directory"
    }

    async fn put(&self, bytes: Vec<u8>) -> KeyledgerResult<ContentRef> {
        let content_ref = local_content_ref(&bytes);
        let path = self.path_for(&content_ref);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| unavailable(&self.root, err))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| unavailable(&path, err))?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|err| unavailable(&path, err))?;

        debug!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(content_ref)
    }

    async fn get(&self, content_ref: &str) -> KeyledgerResult<Vec<u8>> {
        if !is_local_content_ref(content_ref) {
            return Err(KeyledgerError::NotFound(content_ref.to_string()));
        }

        let path = self.path_for(content_ref);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(KeyledgerError::NotFound(content_ref.to_string()))
            }
            Err(err) => Err(unavailable(&path, err)),
        }
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> KeyledgerError {
    KeyledgerError::StoreUnavailable(format!("{}: {err}", path.display()))
}
