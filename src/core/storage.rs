use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A storage backend protocol. Only `Local` has a concrete node
/// implementation in this crate; the others are recognized configuration
/// values whose node resolution fails with `UnsupportedCapability` until an
/// adapter is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProtocol {
    Local,
    S3,
    Gcs,
    Azure,
    Webdav,
}

/// Capability flags a storage backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StorageCapabilities {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub versioning: bool,
    pub version_listing: bool,
    pub version_access: bool,
    pub presigned_urls: bool,
}

/// A per-tenant storage-backend definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub tenant_id: Uuid,
    pub name: String,
    pub protocol: StorageProtocol,
    /// Opaque, backend-specific configuration (e.g. a root path for
    /// `Local`). Treated as encrypted-at-rest by the persistence layer;
    /// this crate does not interpret the encryption itself.
    pub config: String,
    pub capabilities: StorageCapabilities,
}

impl Storage {
    /// The capabilities a fresh local-disk backend reports.
    #[must_use]
    pub const fn local_capabilities() -> StorageCapabilities {
        StorageCapabilities {
            read: true,
            write: true,
            delete: true,
            versioning: false,
            version_listing: false,
            version_access: false,
            presigned_urls: false,
        }
    }
}
