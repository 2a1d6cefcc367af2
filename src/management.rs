//! Tenant-facing administrative surface: create/inspect/close sessions,
//! trigger cleanup. Distinct from the WOPI protocol surface the editor
//! itself talks to.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::tenant::{hash_api_token, Tenant};
use crate::error::ManagementError;
use crate::manager::CreateRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub tenant_id: Uuid,
    pub storage_name: String,
    pub file_path: String,
    #[serde(default)]
    pub requested_edit: bool,
    pub account: String,
    pub user: Option<String>,
    pub origin_connection_id: Option<String>,
    pub origin_page_id: Option<String>,
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub editor_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionProjection {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub file_id: Uuid,
    pub storage_name: String,
    pub file_path: String,
    pub account: String,
    pub user: Option<String>,
    pub can_edit: bool,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl From<crate::core::session::Session> for SessionProjection {
    fn from(session: crate::core::session::Session) -> Self {
        let locked = session.lock_state().current_lock_id().is_some();
        Self {
            session_id: session.id,
            tenant_id: session.tenant_id,
            file_id: session.file_id,
            storage_name: session.storage_name,
            file_path: session.file_path,
            account: session.account,
            user: session.user,
            can_edit: session.permissions.can_edit(),
            locked,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_accessed_at: session.last_accessed_at,
        }
    }
}

/// Resolve the tenant identified by the presented bearer token. Every
/// management endpoint is scoped to the tenant that authenticates it; there
/// is no cross-tenant superuser token.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Tenant, ManagementError> {
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ManagementError::Unauthorized("missing bearer token".to_string()))?;

    let hash = hash_api_token(presented);
    state
        .tenants
        .get_tenant_by_api_token_hash(&hash)
        .await
        .map_err(|source| ManagementError::Session(crate::error::SessionError::Store { source }))?
        .filter(Tenant::is_usable)
        .ok_or_else(|| ManagementError::Unauthorized("invalid tenant api token".to_string()))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<CreateSessionResponse>, ManagementError> {
    let tenant = authorize(&state, &headers).await?;
    if body.tenant_id != tenant.id {
        return Err(ManagementError::Unauthorized("tenant_id does not match the authenticated tenant".to_string()));
    }

    let result = state
        .manager
        .create(CreateRequest {
            tenant_id: tenant.id,
            storage_name: body.storage_name,
            file_path: body.file_path,
            requested_edit: body.requested_edit,
            account: body.account,
            user: body.user,
            origin_connection_id: body.origin_connection_id,
            origin_page_id: body.origin_page_id,
            ttl: body.ttl_secs.map(chrono::Duration::seconds),
        })
        .await?;

    Ok(Json(CreateSessionResponse {
        session_id: result.session_id,
        file_id: result.file_id,
        editor_url: result.editor_url,
        expires_at: result.expires_at,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionProjection>, ManagementError> {
    let tenant = authorize(&state, &headers).await?;

    let session = state
        .sessions
        .get_by_id(id)
        .await
        .map_err(|source| ManagementError::Session(crate::error::SessionError::Store { source }))?
        .filter(|s| s.tenant_id == tenant.id)
        .ok_or(crate::error::SessionError::NotFound { session_id: id })?;

    Ok(Json(session.into()))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionProjection>>, ManagementError> {
    let tenant = authorize(&state, &headers).await?;

    let sessions = state
        .sessions
        .list_active(Some(tenant.id))
        .await
        .map_err(|source| ManagementError::Session(crate::error::SessionError::Store { source }))?;

    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

async fn close_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ManagementError> {
    let tenant = authorize(&state, &headers).await?;

    let session = state
        .sessions
        .get_by_id(id)
        .await
        .map_err(|source| ManagementError::Session(crate::error::SessionError::Store { source }))?
        .filter(|s| s.tenant_id == tenant.id)
        .ok_or(crate::error::SessionError::NotFound { session_id: id })?;

    state.manager.close(session.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupBody {
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    expired_count: usize,
    lock_released_count: usize,
}

async fn cleanup_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CleanupBody>,
) -> Result<Json<CleanupResponse>, ManagementError> {
    let tenant = authorize(&state, &headers).await?;
    let report = state.manager.cleanup(Some(tenant.id), body.dry_run).await?;
    Ok(Json(CleanupResponse {
        expired_count: report.expired_count,
        lock_released_count: report.lock_released_count,
    }))
}

pub fn router() -> Router<AppState> {
    use axum::routing::{get, post};

    Router::new()
        .route("/sessions/create", post(create_session))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/close", post(close_session))
        .route("/sessions/cleanup", post(cleanup_sessions))
}
