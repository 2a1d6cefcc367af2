//! Business rules for session create/close/cleanup: orchestrates the tenant
//! and storage registries, the token service, the session store, the audit
//! log, and the callback dispatcher.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::audit::{self, AuditLog};
use crate::core::callback::{CallbackDispatcher, CallbackEvent};
use crate::core::session::{NewSession, Permissions, Session};
use crate::core::token::TokenService;
use crate::error::SessionError;
use crate::registry::{editor_url_for, StorageRegistry, TenantRegistry};
use crate::store::{InsertOutcome, SessionStore};

const MAX_INSERT_RETRIES: u32 = 3;

/// Everything [`SessionManager::create`] hands back to the caller.
#[derive(Debug, Clone)]
pub struct CreateResult {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub editor_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of [`SessionManager::cleanup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub expired_count: usize,
    pub lock_released_count: usize,
}

/// Parameters accepted by [`SessionManager::create`].
pub struct CreateRequest {
    pub tenant_id: Uuid,
    pub storage_name: String,
    pub file_path: String,
    pub requested_edit: bool,
    pub account: String,
    pub user: Option<String>,
    pub origin_connection_id: Option<String>,
    pub origin_page_id: Option<String>,
    pub ttl: Option<Duration>,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    tenants: Arc<TenantRegistry>,
    storages: Arc<StorageRegistry>,
    tokens: TokenService,
    audit: Arc<dyn AuditLog>,
    callbacks: Arc<CallbackDispatcher>,
    proxy_base_url: String,
    discovery_action_path: String,
    pool_editor_url: Option<String>,
    default_session_ttl: Duration,
}

impl SessionManager {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        tenants: Arc<TenantRegistry>,
        storages: Arc<StorageRegistry>,
        tokens: TokenService,
        audit: Arc<dyn AuditLog>,
        callbacks: Arc<CallbackDispatcher>,
        proxy_base_url: String,
        discovery_action_path: String,
        pool_editor_url: Option<String>,
        default_session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            tenants,
            storages,
            tokens,
            audit,
            callbacks,
            proxy_base_url,
            discovery_action_path,
            pool_editor_url,
            default_session_ttl,
        }
    }

    /// # Errors
    /// Returns [`SessionError`] if the tenant/storage cannot be resolved, the
    /// tenant or its editor is disabled, or the store fails after exhausting
    /// id-conflict retries.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateResult, SessionError> {
        let tenant = self
            .tenants
            .get_tenant(request.tenant_id)
            .await
            .map_err(|source| SessionError::Store { source })?
            .ok_or(SessionError::TenantNotFound { tenant_id: request.tenant_id })?;

        if !tenant.is_usable() {
            return Err(SessionError::TenantDisabled { tenant_id: tenant.id });
        }

        let storage = self
            .storages
            .get_storage(tenant.id, &request.storage_name)
            .await
            .map_err(|source| SessionError::Store { source })?
            .ok_or_else(|| SessionError::StorageNotFound {
                tenant_id: tenant.id,
                storage_name: request.storage_name.clone(),
            })?;

        let permissions = Permissions::normalize(request.requested_edit, tenant.allow_edit);
        let ttl = request.ttl.unwrap_or(self.default_session_ttl);

        let mut attempts = 0;
        let session = loop {
            attempts += 1;

            let candidate = Session::new(
                NewSession {
                    tenant_id: tenant.id,
                    storage_name: storage.name.clone(),
                    file_path: request.file_path.clone(),
                    permissions: permissions.clone(),
                    account: request.account.clone(),
                    user: request.user.clone(),
                    origin_connection_id: request.origin_connection_id.clone(),
                    origin_page_id: request.origin_page_id.clone(),
                    ttl,
                },
                String::new(),
            );
            let access_token =
                self.tokens.issue(candidate.id, candidate.expires_at).map_err(SessionError::Token)?;
            let candidate = Session { access_token, ..candidate };

            match self.store.insert(&candidate).await.map_err(|source| SessionError::Store { source })? {
                InsertOutcome::Inserted => break candidate,
                InsertOutcome::Conflict if attempts < MAX_INSERT_RETRIES => continue,
                InsertOutcome::Conflict => return Err(SessionError::IdExhaustion { attempts }),
            }
        };

        let editor_url = self.compose_editor_url(&tenant, &session)?;

        audit::record(
            self.audit.as_ref(),
            crate::core::audit::AuditEntry::new(
                tenant.id,
                &session.account,
                session.user.as_deref(),
                "session_created",
                format!("file_id={} storage={}", session.file_id, session.storage_name),
            ),
        )
        .await;

        self.callbacks
            .dispatch(&tenant, &session, CallbackEvent::SessionCreated, json!({}))
            .await;

        Ok(CreateResult {
            session_id: session.id,
            file_id: session.file_id,
            editor_url,
            expires_at: session.expires_at,
        })
    }

    fn compose_editor_url(&self, tenant: &crate::core::tenant::Tenant, session: &Session) -> Result<String, SessionError> {
        let base = editor_url_for(tenant, self.pool_editor_url.as_deref())?;
        let wopi_src = format!("{}/wopi/files/{}", self.proxy_base_url, session.file_id);
        Ok(format!(
            "{base}{path}?WOPISrc={src}&access_token={token}",
            path = self.discovery_action_path,
            src = urlencoding::encode(&wopi_src),
            token = session.access_token,
        ))
    }

    /// # Errors
    /// Returns [`SessionError::NotFound`] if the session does not exist, or
    /// propagates a store failure.
    pub async fn close(&self, session_id: Uuid) -> Result<(), SessionError> {
        let session = self
            .store
            .get_by_id(session_id)
            .await
            .map_err(|source| SessionError::Store { source })?
            .ok_or(SessionError::NotFound { session_id })?;

        if let Some(lock_id) = session.lock_id.clone() {
            let _ = self
                .store
                .release_lock(session_id, &lock_id)
                .await
                .map_err(|source| SessionError::Store { source })?;
        }

        self.store.delete(session_id).await.map_err(|source| SessionError::Store { source })?;

        audit::record(
            self.audit.as_ref(),
            crate::core::audit::AuditEntry::new(
                session.tenant_id,
                &session.account,
                session.user.as_deref(),
                "session_closed",
                format!("file_id={}", session.file_id),
            ),
        )
        .await;

        Ok(())
    }

    /// Sweep expired sessions. When `dry_run`, only counts what would be
    /// removed and releases nothing. When `tenant_id` is `Some`, the sweep
    /// is scoped to that tenant's sessions only; `None` sweeps every tenant.
    /// Every session actually removed has its lock released (counted in the
    /// report) and a `session_expired` callback dispatched, best-effort,
    /// regardless of which scope triggered the sweep.
    ///
    /// # Errors
    /// Propagates a store failure.
    pub async fn cleanup(&self, tenant_id: Option<Uuid>, dry_run: bool) -> Result<CleanupReport, SessionError> {
        let expired =
            self.store.list_expired(tenant_id).await.map_err(|source| SessionError::Store { source })?;

        if dry_run {
            return Ok(CleanupReport { expired_count: expired.len(), lock_released_count: 0 });
        }

        let mut lock_released_count = 0;
        for session in &expired {
            if let Some(lock_id) = session.lock_id.clone() {
                if self
                    .store
                    .release_lock(session.id, &lock_id)
                    .await
                    .map_err(|source| SessionError::Store { source })?
                    == crate::store::ReleaseOutcome::Released
                {
                    lock_released_count += 1;
                }
            }
            self.store.delete(session.id).await.map_err(|source| SessionError::Store { source })?;

            if let Ok(Some(tenant)) = self.tenants.get_tenant(session.tenant_id).await {
                self.callbacks.dispatch(&tenant, session, CallbackEvent::SessionExpired, json!({})).await;
            }
        }

        Ok(CleanupReport { expired_count: expired.len(), lock_released_count })
    }
}
