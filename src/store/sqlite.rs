use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::{InsertOutcome, LockOutcome, ReleaseOutcome, SessionStore, StorageRepository, TenantRepository};
use crate::core::audit::{AuditEntry, AuditLog};
use crate::core::session::{Permissions, Session};
use crate::core::storage::{Storage, StorageCapabilities, StorageProtocol};
use crate::core::tenant::{EditorMode, Tenant};

/// `SQLite`-backed implementation of the session/tenant/storage/audit
/// tables. Same migration-by-version bootstrap, same row/entity
/// `TryFrom` conversion style, same `?`-bound queries throughout.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path` and run
    /// migrations.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created/opened or
    /// migrations fail.
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Open an in-memory database, primarily for tests.
    ///
    /// # Errors
    /// Returns an error if migrations fail.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;

        let current_version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_optional(pool)
            .await?
            .flatten();
        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_to_v1(pool).await?;
        }

        Ok(())
    }

    async fn migrate_to_v1(pool: &SqlitePool) -> anyhow::Result<()> {
        tracing::info!("applying migration v1: initial schema");

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL,
                editor_mode TEXT NOT NULL,
                editor_url TEXT,
                callback_base_url TEXT,
                callback_auth TEXT,
                api_token_hash TEXT NOT NULL,
                allow_edit INTEGER NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tenants_api_token_hash ON tenants(api_token_hash)")
            .execute(pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS storages (
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                protocol TEXT NOT NULL,
                config TEXT NOT NULL,
                capabilities TEXT NOT NULL,
                PRIMARY KEY (tenant_id, name)
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                storage_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_id TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL UNIQUE,
                permissions TEXT NOT NULL,
                account TEXT NOT NULL,
                user TEXT,
                origin_connection_id TEXT,
                origin_page_id TEXT,
                lock_id TEXT,
                lock_expires_at TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                document_opened INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_tenant_id ON sessions(tenant_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)")
            .execute(pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS command_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                account TEXT NOT NULL,
                user TEXT,
                command TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_command_log_tenant_id ON command_log(tenant_id)")
            .execute(pool)
            .await?;

        let now = Utc::now();
        sqlx::query("INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(1)
            .bind(now.to_rfc3339())
            .execute(pool)
            .await?;

        tracing::info!("migration v1 complete");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, session: &Session) -> anyhow::Result<InsertOutcome> {
        let permissions = serde_json::to_string(&session.permissions)?;

        let result = sqlx::query(
            r"
            INSERT INTO sessions (
                id, tenant_id, storage_name, file_path, file_id, access_token,
                permissions, account, user, origin_connection_id, origin_page_id,
                lock_id, lock_expires_at, created_at, expires_at, last_accessed_at,
                document_opened
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(session.id.to_string())
        .bind(session.tenant_id.to_string())
        .bind(&session.storage_name)
        .bind(&session.file_path)
        .bind(session.file_id.to_string())
        .bind(&session.access_token)
        .bind(permissions)
        .bind(&session.account)
        .bind(&session.user)
        .bind(&session.origin_connection_id)
        .bind(&session.origin_page_id)
        .bind(&session.lock_id)
        .bind(session.lock_expires_at.map(|t| t.to_rfc3339()))
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.last_accessed_at.to_rfc3339())
        .bind(session.document_opened)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_file_id(&self, file_id: Uuid) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE file_id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_token(&self, access_token: &str) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE access_token = ?")
            .bind(access_token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn touch(&self, id: Uuid, ts: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE sessions SET last_accessed_at = ? WHERE id = ?")
            .bind(ts.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_lock(&self, id: Uuid, lock_id: &str, ttl: Duration) -> anyhow::Result<LockOutcome> {
        let now = Utc::now();
        let new_expiry = now + ttl;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE sessions
            SET lock_id = ?, lock_expires_at = ?
            WHERE id = ?
              AND (lock_id IS NULL OR lock_expires_at <= ? OR lock_id = ?)
            ",
        )
        .bind(lock_id)
        .bind(new_expiry.to_rfc3339())
        .bind(id.to_string())
        .bind(now.to_rfc3339())
        .bind(lock_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(LockOutcome::Acquired);
        }

        let existing: Option<String> = sqlx::query_scalar("SELECT lock_id FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .flatten();
        tx.commit().await?;

        Ok(LockOutcome::AlreadyLocked(existing.unwrap_or_default()))
    }

    async fn release_lock(&self, id: Uuid, lock_id: &str) -> anyhow::Result<ReleaseOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT lock_id, lock_expires_at FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(ReleaseOutcome::NotLocked);
        };

        let current_lock_id: Option<String> = row.try_get("lock_id")?;
        let current_expiry: Option<String> = row.try_get("lock_expires_at")?;
        let effective_lock = current_lock_id.filter(|_| {
            current_expiry
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_some_and(|expiry| DateTime::<Utc>::from(expiry) > now)
        });

        let outcome = match effective_lock {
            None => ReleaseOutcome::NotLocked,
            Some(current) if current == lock_id => {
                sqlx::query("UPDATE sessions SET lock_id = NULL, lock_expires_at = NULL WHERE id = ?")
                    .bind(id.to_string())
                    .execute(&mut *tx)
                    .await?;
                ReleaseOutcome::Released
            }
            Some(current) => ReleaseOutcome::Mismatch(current),
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_lock(&self, id: Uuid) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT lock_id, lock_expires_at FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let lock_id: Option<String> = row.try_get("lock_id")?;
        let expires_at: Option<String> = row.try_get("lock_expires_at")?;
        let now = Utc::now();

        Ok(lock_id.filter(|_| {
            expires_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .is_some_and(|expiry| DateTime::<Utc>::from(expiry) > now)
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active(&self, tenant_id: Option<Uuid>) -> anyhow::Result<Vec<Session>> {
        let now = Utc::now().to_rfc3339();

        let rows = if let Some(tenant_id) = tenant_id {
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE expires_at > ? AND tenant_id = ?")
                .bind(now)
                .bind(tenant_id.to_string())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE expires_at > ?")
                .bind(now)
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_expired(&self, tenant_id: Option<Uuid>) -> anyhow::Result<Vec<Session>> {
        let now = Utc::now().to_rfc3339();

        let rows = if let Some(tenant_id) = tenant_id {
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE expires_at <= ? AND tenant_id = ?")
                .bind(now)
                .bind(tenant_id.to_string())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE expires_at <= ?")
                .bind(now)
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn cleanup_expired(&self) -> anyhow::Result<usize> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn mark_opened(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE sessions SET document_opened = 1 WHERE id = ? AND document_opened = 0")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TenantRepository for SqliteStore {
    async fn get_tenant(&self, tenant_id: Uuid) -> anyhow::Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = ?")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_tenant_by_api_token_hash(&self, hash: &str) -> anyhow::Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE api_token_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> anyhow::Result<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO tenants (
                id, name, active, editor_mode, editor_url, callback_base_url,
                callback_auth, api_token_hash, allow_edit
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(tenant.id.to_string())
        .bind(&tenant.name)
        .bind(tenant.active)
        .bind(serde_json::to_string(&tenant.editor_mode)?)
        .bind(&tenant.editor_url)
        .bind(&tenant.callback_base_url)
        .bind(&tenant.callback_auth)
        .bind(&tenant.api_token_hash)
        .bind(tenant.allow_edit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_tenant(&self, tenant_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tenants(&self) -> anyhow::Result<Vec<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl StorageRepository for SqliteStore {
    async fn get_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<Option<Storage>> {
        let row = sqlx::query_as::<_, StorageRow>("SELECT * FROM storages WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id.to_string())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert_storage(&self, storage: &Storage) -> anyhow::Result<()> {
        sqlx::query(
            r"
            INSERT OR REPLACE INTO storages (tenant_id, name, protocol, config, capabilities)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(storage.tenant_id.to_string())
        .bind(&storage.name)
        .bind(serde_json::to_string(&storage.protocol)?)
        .bind(&storage.config)
        .bind(serde_json::to_string(&storage.capabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_storage(&self, tenant_id: Uuid, name: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM storages WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_storages(&self, tenant_id: Uuid) -> anyhow::Result<Vec<Storage>> {
        let rows = sqlx::query_as::<_, StorageRow>("SELECT * FROM storages WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            r"
            INSERT INTO command_log (tenant_id, account, user, command, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(entry.tenant_id.to_string())
        .bind(&entry.account)
        .bind(&entry.user)
        .bind(&entry.command)
        .bind(&entry.details)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, CommandLogRow>(
            "SELECT * FROM command_log WHERE tenant_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(tenant_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    storage_name: String,
    file_path: String,
    file_id: String,
    access_token: String,
    permissions: String,
    account: String,
    user: Option<String>,
    origin_connection_id: Option<String>,
    origin_page_id: Option<String>,
    lock_id: Option<String>,
    lock_expires_at: Option<String>,
    created_at: String,
    expires_at: String,
    last_accessed_at: String,
    document_opened: bool,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id)?,
            tenant_id: Uuid::parse_str(&row.tenant_id)?,
            storage_name: row.storage_name,
            file_path: row.file_path,
            file_id: Uuid::parse_str(&row.file_id)?,
            access_token: row.access_token,
            permissions: serde_json::from_str::<Permissions>(&row.permissions)?,
            account: row.account,
            user: row.user,
            origin_connection_id: row.origin_connection_id,
            origin_page_id: row.origin_page_id,
            lock_id: row.lock_id,
            lock_expires_at: row
                .lock_expires_at
                .map(|s| DateTime::parse_from_rfc3339(&s).map(DateTime::<Utc>::from))
                .transpose()?,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)?.into(),
            expires_at: DateTime::parse_from_rfc3339(&row.expires_at)?.into(),
            last_accessed_at: DateTime::parse_from_rfc3339(&row.last_accessed_at)?.into(),
            document_opened: row.document_opened,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    active: bool,
    editor_mode: String,
    editor_url: Option<String>,
    callback_base_url: Option<String>,
    callback_auth: Option<String>,
    api_token_hash: String,
    allow_edit: bool,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = anyhow::Error;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id)?,
            name: row.name,
            active: row.active,
            editor_mode: serde_json::from_str::<EditorMode>(&row.editor_mode)?,
            editor_url: row.editor_url,
            callback_base_url: row.callback_base_url,
            callback_auth: row.callback_auth,
            api_token_hash: row.api_token_hash,
            allow_edit: row.allow_edit,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StorageRow {
    tenant_id: String,
    name: String,
    protocol: String,
    config: String,
    capabilities: String,
}

impl TryFrom<StorageRow> for Storage {
    type Error = anyhow::Error;

    fn try_from(row: StorageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: Uuid::parse_str(&row.tenant_id)?,
            name: row.name,
            protocol: serde_json::from_str::<StorageProtocol>(&row.protocol)?,
            config: row.config,
            capabilities: serde_json::from_str::<StorageCapabilities>(&row.capabilities)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommandLogRow {
    tenant_id: String,
    account: String,
    user: Option<String>,
    command: String,
    details: String,
    created_at: String,
}

impl TryFrom<CommandLogRow> for AuditEntry {
    type Error = anyhow::Error;

    fn try_from(row: CommandLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: Uuid::parse_str(&row.tenant_id)?,
            account: row.account,
            user: row.user,
            command: row.command,
            details: row.details,
            timestamp: DateTime::parse_from_rfc3339(&row.created_at)?.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{NewSession, Permissions as SessionPermissions, DEFAULT_SESSION_TTL, LOCK_TTL};

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    fn new_session(tenant_id: Uuid) -> Session {
        Session::new(
            NewSession {
                tenant_id,
                storage_name: "docs".to_string(),
                file_path: "a/b.xlsx".to_string(),
                permissions: SessionPermissions::normalize(true, true),
                account: "acct".to_string(),
                user: None,
                origin_connection_id: None,
                origin_page_id: None,
                ttl: DEFAULT_SESSION_TTL,
            },
            Uuid::new_v4().to_string(),
        )
    }

    #[tokio::test]
    async fn insert_then_lookup_by_file_id_and_token() {
        let store = store().await;
        let session = new_session(Uuid::new_v4());

        assert_eq!(store.insert(&session).await.unwrap(), InsertOutcome::Inserted);

        let by_file_id = store.get_by_file_id(session.file_id).await.unwrap().unwrap();
        assert_eq!(by_file_id.id, session.id);

        let by_token = store.get_by_token(&session.access_token).await.unwrap().unwrap();
        assert_eq!(by_token.id, session.id);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_file_id() {
        let store = store().await;
        let mut session = new_session(Uuid::new_v4());
        store.insert(&session).await.unwrap();

        session.id = Uuid::new_v4();
        session.access_token = Uuid::new_v4().to_string();
        assert_eq!(store.insert(&session).await.unwrap(), InsertOutcome::Conflict);
    }

    #[tokio::test]
    async fn concurrent_locks_exactly_one_wins() {
        let store = store().await;
        let session = new_session(Uuid::new_v4());
        store.insert(&session).await.unwrap();

        let a = store.set_lock(session.id, "A", LOCK_TTL).await.unwrap();
        let b = store.set_lock(session.id, "B", LOCK_TTL).await.unwrap();

        assert_eq!(a, LockOutcome::Acquired);
        assert_eq!(b, LockOutcome::AlreadyLocked("A".to_string()));
    }

    #[tokio::test]
    async fn release_requires_matching_lock() {
        let store = store().await;
        let session = new_session(Uuid::new_v4());
        store.insert(&session).await.unwrap();
        store.set_lock(session.id, "A", LOCK_TTL).await.unwrap();

        assert_eq!(
            store.release_lock(session.id, "B").await.unwrap(),
            ReleaseOutcome::Mismatch("A".to_string())
        );
        assert_eq!(store.release_lock(session.id, "A").await.unwrap(), ReleaseOutcome::Released);
        assert_eq!(store.get_lock(session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_expired_removes_only_expired_sessions() {
        let store = store().await;
        let mut expired = new_session(Uuid::new_v4());
        expired.expires_at = Utc::now() - Duration::seconds(1);
        let live = new_session(Uuid::new_v4());

        store.insert(&expired).await.unwrap();
        store.insert(&live).await.unwrap();

        let count = store.cleanup_expired().await.unwrap();
        assert_eq!(count, 1);

        let active = store.list_active(None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }
}
