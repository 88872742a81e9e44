//! Image object storage.
//!
//! Filesystem-backed store for submitted image payloads, addressed by opaque
//! keys of the form `submissions/<uuid>.png`. Writes go through a temp file
//! and an atomic rename so a crashed write never leaves a partial object.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Errors from object storage.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// Filesystem operation failed.
    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),
    /// Key escapes the store root or is malformed.
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
}

/// Filesystem object store rooted at a directory.
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open a store rooted at `root`, creating the directory tree as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Io`] when the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ObjectStoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("submissions"))?;
        Ok(Self { root })
    }

    /// Mint a fresh submission object key.
    pub fn mint_key() -> String {
        format!("submissions/{}.png", Uuid::new_v4())
    }

    /// Store `bytes` under `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::InvalidKey`] for a malformed key,
    /// [`ObjectStoreError::Io`] on write failure.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let path = self.resolve(key)?;
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, bytes = bytes.len(), "object stored");
        Ok(())
    }

    /// Fetch the object stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Io`] (kind `NotFound`) for a missing
    /// object, [`ObjectStoreError::InvalidKey`] for a malformed key.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Delete the object stored under `key`. Missing objects are not an
    /// error; deletion is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Io`] on filesystem failure other than a
    /// missing object.
    pub async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Map a key to a path under the root, rejecting traversal components.
    fn resolve(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = Path::new(key);
        let traversal = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_))
        });
        if key.is_empty() || traversal {
            return Err(ObjectStoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}
