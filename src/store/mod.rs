pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::session::Session;
use crate::core::storage::Storage;
use crate::core::tenant::Tenant;

/// Result of [`SessionStore::set_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    AlreadyLocked(String),
}

/// Result of [`SessionStore::release_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    Mismatch(String),
    NotLocked,
}

/// Result of [`SessionStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Transactional CRUD + secondary lookups + lock fields over the `sessions`
/// table. Every operation here is atomic; `set_lock` and `release_lock` are
/// additionally serialized per `session.id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> anyhow::Result<InsertOutcome>;

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Session>>;

    async fn get_by_file_id(&self, file_id: Uuid) -> anyhow::Result<Option<Session>>;

    async fn get_by_token(&self, access_token: &str) -> anyhow::Result<Option<Session>>;

    async fn touch(&self, id: Uuid, ts: DateTime<Utc>) -> anyhow::Result<()>;

    async fn set_lock(&self, id: Uuid, lock_id: &str, ttl: chrono::Duration) -> anyhow::Result<LockOutcome>;

    async fn release_lock(&self, id: Uuid, lock_id: &str) -> anyhow::Result<ReleaseOutcome>;

    async fn get_lock(&self, id: Uuid) -> anyhow::Result<Option<String>>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;

    async fn list_active(&self, tenant_id: Option<Uuid>) -> anyhow::Result<Vec<Session>>;

    /// Sessions with `expires_at <= now`, optionally scoped to a tenant.
    /// Unlike [`Self::list_active`], this is the expired complement, not its
    /// negation computed client-side.
    async fn list_expired(&self, tenant_id: Option<Uuid>) -> anyhow::Result<Vec<Session>>;

    async fn cleanup_expired(&self) -> anyhow::Result<usize>;

    /// Atomically mark a session's document as opened; returns `true` the
    /// first time this is called for a given session, `false` on every call
    /// after. Used to gate the first-`GetFile` callback independent of
    /// `last_accessed_at`, which `touch` also advances.
    async fn mark_opened(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Persistence-side source for tenant rows, consumed by the in-process
/// [`crate::registry::TenantRegistry`] cache.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn get_tenant(&self, tenant_id: Uuid) -> anyhow::Result<Option<Tenant>>;

    async fn get_tenant_by_api_token_hash(&self, hash: &str) -> anyhow::Result<Option<Tenant>>;

    async fn upsert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()>;

    async fn remove_tenant(&self, tenant_id: Uuid) -> anyhow::Result<()>;

    async fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>>;
}

/// Persistence-side source for storage rows, consumed by the in-process
/// [`crate::registry::StorageRegistry`] cache.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn get_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<Option<Storage>>;

    async fn upsert_storage(&self, storage: &Storage) -> anyhow::Result<()>;

    async fn remove_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<()>;

    async fn list_storages(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Storage>>;
}
