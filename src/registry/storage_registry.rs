use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::storage::Storage;
use crate::store::StorageRepository;

struct CachedStorage {
    storage: Storage,
    cached_at: Instant,
}

/// Read-mostly cache in front of [`StorageRepository`], keyed by
/// `(tenant_id, name)`. Same TTL/invalidation discipline as
/// [`super::TenantRegistry`].
pub struct StorageRegistry {
    repo: Arc<dyn StorageRepository>,
    by_key: DashMap<(Uuid, String), CachedStorage>,
    ttl: Duration,
}

impl StorageRegistry {
    #[must_use]
    pub fn new(repo: Arc<dyn StorageRepository>, ttl: Duration) -> Self {
        Self { repo, by_key: DashMap::new(), ttl }
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn get_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<Option<Storage>> {
        let key = (tenant_id, name.to_string());

        if let Some(entry) = self.by_key.get(&key) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(Some(entry.storage.clone()));
            }
        }

        let storage = self.repo.get_storage(tenant_id, name).await?;
        if let Some(storage) = &storage {
            self.by_key.insert(key, CachedStorage { storage: storage.clone(), cached_at: Instant::now() });
        } else {
            self.by_key.remove(&key);
        }
        Ok(storage)
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn upsert_storage(&self, storage: &Storage) -> anyhow::Result<()> {
        self.repo.upsert_storage(storage).await?;
        self.by_key.remove(&(storage.tenant_id, storage.name.clone()));
        Ok(())
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn remove_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<()> {
        self.repo.remove_storage(tenant_id, name).await?;
        self.by_key.remove(&(tenant_id, name.to_string()));
        Ok(())
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn list_storages(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Storage>> {
        self.repo.list_storages(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{StorageCapabilities, StorageProtocol};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRepo {
        storages: Mutex<Vec<Storage>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl StorageRepository for FakeRepo {
        async fn get_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<Option<Storage>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .storages
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.tenant_id == tenant_id && s.name == name)
                .cloned())
        }

        async fn upsert_storage(&self, storage: &Storage) -> anyhow::Result<()> {
            let mut storages = self.storages.lock().unwrap();
            storages.retain(|s| !(s.tenant_id == storage.tenant_id && s.name == storage.name));
            storages.push(storage.clone());
            Ok(())
        }

        async fn remove_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<()> {
            self.storages
                .lock()
                .unwrap()
                .retain(|s| !(s.tenant_id == tenant_id && s.name == name));
            Ok(())
        }

        async fn list_storages(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Storage>> {
            Ok(self.storages.lock().unwrap().iter().filter(|s| s.tenant_id == tenant_id).cloned().collect())
        }
    }

    fn storage(tenant_id: Uuid) -> Storage {
        Storage {
            tenant_id,
            name: "docs".to_string(),
            protocol: StorageProtocol::Local,
            config: "/srv/docs".to_string(),
            capabilities: StorageCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn repeated_lookups_within_ttl_hit_the_cache() {
        let tenant_id = Uuid::new_v4();
        let repo = Arc::new(FakeRepo { storages: Mutex::new(vec![storage(tenant_id)]), calls: Mutex::new(0) });
        let registry = StorageRegistry::new(repo.clone(), Duration::from_secs(60));

        registry.get_storage(tenant_id, "docs").await.unwrap();
        registry.get_storage(tenant_id, "docs").await.unwrap();

        assert_eq!(*repo.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_invalidates_the_cache() {
        let tenant_id = Uuid::new_v4();
        let repo = Arc::new(FakeRepo { storages: Mutex::new(vec![storage(tenant_id)]), calls: Mutex::new(0) });
        let registry = StorageRegistry::new(repo.clone(), Duration::from_secs(60));

        assert!(registry.get_storage(tenant_id, "docs").await.unwrap().is_some());
        registry.remove_storage(tenant_id, "docs").await.unwrap();
        assert!(registry.get_storage(tenant_id, "docs").await.unwrap().is_none());
    }
}
