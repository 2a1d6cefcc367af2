use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::tenant::Tenant;
use crate::store::TenantRepository;

struct CachedTenant {
    tenant: Tenant,
    cached_at: Instant,
}

/// Read-mostly cache in front of [`TenantRepository`]. Entries are refreshed
/// from the backing store on a TTL and dropped immediately on administrative
/// writes (`upsert`/`remove`), so writes are always immediately visible.
pub struct TenantRegistry {
    repo: Arc<dyn TenantRepository>,
    by_id: DashMap<Uuid, CachedTenant>,
    ttl: Duration,
}

impl TenantRegistry {
    #[must_use]
    pub fn new(repo: Arc<dyn TenantRepository>, ttl: Duration) -> Self {
        Self { repo, by_id: DashMap::new(), ttl }
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn get_tenant(&self, tenant_id: Uuid) -> anyhow::Result<Option<Tenant>> {
        if let Some(entry) = self.by_id.get(&tenant_id) {
            if entry.cached_at.elapsed() < self.ttl {
                return Ok(Some(entry.tenant.clone()));
            }
        }

        let tenant = self.repo.get_tenant(tenant_id).await?;
        if let Some(tenant) = &tenant {
            self.by_id.insert(
                tenant_id,
                CachedTenant { tenant: tenant.clone(), cached_at: Instant::now() },
            );
        } else {
            self.by_id.remove(&tenant_id);
        }
        Ok(tenant)
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn get_tenant_by_api_token_hash(&self, hash: &str) -> anyhow::Result<Option<Tenant>> {
        // Token-hash lookups are rare (admin-auth path only); go straight to
        // the store rather than maintaining a second index.
        self.repo.get_tenant_by_api_token_hash(hash).await
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn upsert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()> {
        self.repo.upsert_tenant(tenant).await?;
        self.by_id.remove(&tenant.id);
        Ok(())
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn remove_tenant(&self, tenant_id: Uuid) -> anyhow::Result<()> {
        self.repo.remove_tenant(tenant_id).await?;
        self.by_id.remove(&tenant_id);
        Ok(())
    }

    /// # Errors
    /// Propagates any error from the backing store.
    pub async fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        self.repo.list_tenants().await
    }
}
