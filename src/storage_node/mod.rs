//! A uniform read/write/size/mtime interface over heterogeneous storage
//! backends.

mod local;

pub use local::LocalFsNode;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::storage::StorageCapabilities;
use crate::error::StorageError;

/// One version of a file, newest first.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version_id: String,
    pub mtime: DateTime<Utc>,
    pub size: i64,
}

/// A handle to a single file in a backend.
#[async_trait]
pub trait StorageNode: Send + Sync {
    fn basename(&self) -> String;

    fn mimetype(&self) -> String;

    async fn exists(&self) -> Result<bool, StorageError>;

    async fn size(&self) -> Result<i64, StorageError>;

    async fn mtime(&self) -> Result<DateTime<Utc>, StorageError>;

    async fn read_bytes(&self) -> Result<Vec<u8>, StorageError>;

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), StorageError>;

    fn capabilities(&self) -> StorageCapabilities;

    /// Ordered newest-first; empty if versioning is unsupported.
    async fn versions(&self) -> Result<Vec<VersionInfo>, StorageError>;

    async fn version_count(&self) -> Result<usize, StorageError> {
        Ok(self.versions().await?.len())
    }

    /// The version string CheckFileInfo/GetFile/PutFile report: the newest
    /// version id if versioning and history exist, otherwise a
    /// mtime-derived tag.
    async fn version_tag(&self) -> Result<String, StorageError> {
        if self.capabilities().versioning {
            let versions = self.versions().await?;
            if let Some(newest) = versions.first() {
                return Ok(newest.version_id.clone());
            }
        }
        let mtime = self.mtime().await?;
        Ok(format!("v{}", mtime.timestamp()))
    }
}
