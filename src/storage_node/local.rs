use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::{StorageNode, VersionInfo};
use crate::core::storage::{Storage, StorageCapabilities};
use crate::error::StorageError;

/// A storage node backed by a file on local disk, rooted under a tenant's
/// configured directory. The only concrete backend this crate ships;
/// s3/gcs/azure/webdav are represented only as configuration.
pub struct LocalFsNode {
    absolute_path: PathBuf,
    relative_path: String,
}

impl LocalFsNode {
    /// Resolve `relative_path` against `storage`'s configured root.
    ///
    /// # Errors
    /// Returns an error if `storage.config` does not name a usable root
    /// directory, or if `relative_path` attempts to escape that root.
    pub fn resolve(storage: &Storage, relative_path: &str) -> Result<Self, StorageError> {
        let root = PathBuf::from(&storage.config);
        let absolute_path = root.join(relative_path);

        // Reject path traversal out of the configured root.
        let normalized = normalize(&absolute_path);
        if !normalized.starts_with(normalize(&root)) {
            return Err(StorageError::NotFound {
                storage: storage.name.clone(),
                path: relative_path.to_string(),
            });
        }

        Ok(Self {
            absolute_path,
            relative_path: relative_path.to_string(),
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl StorageNode for LocalFsNode {
    fn basename(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.relative_path.clone())
    }

    fn mimetype(&self) -> String {
        mime_guess::from_path(&self.absolute_path)
            .first_or_octet_stream()
            .to_string()
    }

    async fn exists(&self) -> Result<bool, StorageError> {
        Ok(tokio::fs::metadata(&self.absolute_path).await.is_ok())
    }

    async fn size(&self) -> Result<i64, StorageError> {
        let metadata = tokio::fs::metadata(&self.absolute_path)
            .await
            .map_err(|source| self.io_error(source))?;
        Ok(i64::try_from(metadata.len()).unwrap_or(i64::MAX))
    }

    async fn mtime(&self) -> Result<DateTime<Utc>, StorageError> {
        let metadata = tokio::fs::metadata(&self.absolute_path)
            .await
            .map_err(|source| self.io_error(source))?;
        let modified = metadata.modified().map_err(|source| self.io_error(source))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn read_bytes(&self) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(&self.absolute_path)
            .await
            .map_err(|source| self.io_error(source))
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.absolute_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        // Atomic-replace: write to a sibling temp file, then rename over
        // the target so a cancelled write never leaves a torn file.
        let tmp_path = self.absolute_path.with_extension("wopi-tmp");
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp_path, &self.absolute_path)
            .await
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn capabilities(&self) -> StorageCapabilities {
        Storage::local_capabilities()
    }

    async fn versions(&self) -> Result<Vec<VersionInfo>, StorageError> {
        // Local disk carries no version history.
        Ok(Vec::new())
    }
}

impl LocalFsNode {
    fn io_error(&self, source: std::io::Error) -> StorageError {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                storage: String::new(),
                path: self.relative_path.clone(),
            }
        } else {
            StorageError::Io {
                storage: String::new(),
                path: self.relative_path.clone(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{StorageCapabilities, StorageProtocol};
    use uuid::Uuid;

    fn storage(root: &Path) -> Storage {
        Storage {
            tenant_id: Uuid::new_v4(),
            name: "docs".to_string(),
            protocol: StorageProtocol::Local,
            config: root.to_string_lossy().to_string(),
            capabilities: StorageCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let node = LocalFsNode::resolve(&storage, "a/b.txt").unwrap();

        node.write_bytes(b"hello").await.unwrap();
        let bytes = node.read_bytes().await.unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(node.size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn size_of_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let node = LocalFsNode::resolve(&storage, "missing.txt").unwrap();

        assert!(!node.exists().await.unwrap());
        assert!(matches!(node.size().await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn rejects_path_traversal_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let result = LocalFsNode::resolve(&storage, "../../etc/passwd");
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
