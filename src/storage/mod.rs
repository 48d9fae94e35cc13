//! Persistence layer.
//!
//! A small key/value blob store used by the spatial cache. Keys are cell
//! identifiers, values are serialized payloads. The file-backed store
//! writes through a temporary file and renames it into place, so readers
//! never observe a half-written entry.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::StorageError;

/// Durable key/value storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    /// Create the backing location if it does not exist yet.
    async fn init(&self) -> Result<(), StorageError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Replace the value stored under `key`.
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read the value under `key`; `StorageError::NotFound` if absent.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// One file per key inside a single directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn io_error(context: impl Into<String>, source: std::io::Error) -> StorageError {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for FileStore {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(format!("create {}", self.dir.display()), e))?;

        let meta = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| Self::io_error(format!("stat {}", self.dir.display()), e))?;

        if !meta.is_dir() || meta.permissions().readonly() {
            return Err(Self::io_error(
                format!("{} is not a writable directory", self.dir.display()),
                std::io::Error::from(ErrorKind::PermissionDenied),
            ));
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Self::io_error(format!("list {}", self.dir.display()), e))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(format!("list {}", self.dir.display()), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(keys)
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Self::io_error(format!("write {}", tmp.display()), e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
            }
            return Err(Self::io_error(format!("rename into {}", target.display()), e));
        }

        debug!(key, bytes = data.len(), "Blob written");
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(Self::io_error(format!("read {}", path.display()), e)),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(format!("remove {}", path.display()), e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
