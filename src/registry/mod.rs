//! In-process, read-mostly caches over the tenant/storage tables, and the
//! single place that turns a `(tenant_id, storage_name, path)` triple into a
//! live [`StorageNode`].

mod storage_registry;
mod tenant_registry;

pub use storage_registry::StorageRegistry;
pub use tenant_registry::TenantRegistry;

use crate::core::storage::Storage;
use crate::core::tenant::Tenant;
use crate::error::SessionError;
use crate::storage_node::{LocalFsNode, StorageNode};

/// Resolve `editor_url_for(tenant)` per editor mode.
///
/// # Errors
/// Returns [`SessionError::EditorDisabled`] if the tenant has disabled its
/// editor.
pub fn editor_url_for(tenant: &Tenant, pool_editor_url: Option<&str>) -> Result<String, SessionError> {
    use crate::core::tenant::EditorMode;

    match tenant.editor_mode {
        EditorMode::Disabled => Err(SessionError::EditorDisabled { tenant_id: tenant.id }),
        EditorMode::Own => Ok(tenant.editor_url.clone().unwrap_or_default()),
        EditorMode::Pool => Ok(pool_editor_url.unwrap_or_default().to_string()),
    }
}

/// Resolve a live storage node for `storage` + `path`. `Local` is the only
/// protocol with a concrete backend; anything else reports
/// `UnsupportedCapability` until an adapter is registered.
///
/// # Errors
/// Returns a [`crate::error::StorageError`] wrapped in `anyhow` if the path
/// cannot be resolved against the storage's configured root, or if the
/// storage's protocol has no concrete backend.
pub fn resolve_node(storage: &Storage, path: &str) -> anyhow::Result<Box<dyn StorageNode>> {
    use crate::core::storage::StorageProtocol;
    use crate::error::StorageError;

    match storage.protocol {
        StorageProtocol::Local => Ok(Box::new(LocalFsNode::resolve(storage, path)?)),
        other => Err(StorageError::UnsupportedCapability {
            storage: storage.name.clone(),
            capability: format!("{other:?}"),
        }
        .into()),
    }
}
