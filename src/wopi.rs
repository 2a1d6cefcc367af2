//! The WOPI protocol handler: CheckFileInfo, `GetFile`, `PutFile`, and the
//! LOCK/UNLOCK/REFRESH_LOCK/GET_LOCK family, each preceded by the same
//! token/session validation preamble.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::audit::{self, AuditEntry};
use crate::core::callback::CallbackEvent;
use crate::core::session::Session;
use crate::error::WopiError;
use crate::registry::resolve_node;
use crate::store::{LockOutcome, ReleaseOutcome};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    access_token: String,
}

/// Validated, load-bearing context a handler needs after the preamble.
struct Context {
    session: Session,
    tenant: crate::core::tenant::Tenant,
}

async fn authenticate(state: &AppState, file_id: Uuid, presented_token: &str) -> Result<Context, WopiError> {
    let payload = state.tokens.validate(presented_token).map_err(|err| match err {
        crate::error::TokenError::Expired => WopiError::ExpiredToken,
        crate::error::TokenError::Invalid { .. } | crate::error::TokenError::Sign { .. } => WopiError::InvalidToken,
    })?;

    let session = state
        .sessions
        .get_by_file_id(file_id)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?
        .ok_or(WopiError::NotFound)?;

    if session.id != payload.session_id || session.access_token != presented_token {
        audit::record(
            state.audit.as_ref(),
            AuditEntry::new(
                session.tenant_id,
                &session.account,
                session.user.as_deref(),
                "wopi.auth_denied",
                format!("file_id={} reason=token_mismatch", session.file_id),
            ),
        )
        .await;
        return Err(WopiError::TokenMismatch);
    }
    if session.is_expired(Utc::now()) {
        return Err(WopiError::ExpiredToken);
    }

    let tenant = state
        .tenants
        .get_tenant(session.tenant_id)
        .await
        .ok()
        .flatten()
        .ok_or(WopiError::NotFound)?;

    Ok(Context { session, tenant })
}

async fn node_for(state: &AppState, session: &Session) -> Result<Box<dyn crate::storage_node::StorageNode>, WopiError> {
    let storage = state
        .storages
        .get_storage(session.tenant_id, &session.storage_name)
        .await
        .ok()
        .flatten()
        .ok_or(WopiError::NotFound)?;
    resolve_node(&storage, &session.file_path).map_err(|err| match err.downcast::<crate::error::StorageError>() {
        Ok(crate::error::StorageError::UnsupportedCapability { capability, .. }) => {
            WopiError::UnsupportedCapability(capability)
        }
        Ok(storage_err) => WopiError::Storage(storage_err),
        Err(_) => WopiError::NotFound,
    })
}

async fn check_file_info(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, WopiError> {
    let ctx = authenticate(&state, file_id, &query.access_token).await?;
    let node = node_for(&state, &ctx.session).await?;

    // A session may point at a path that does not exist yet (the editor's
    // own "new document" flow): report it as an empty file rather than 404.
    let size = match node.size().await {
        Ok(size) => size,
        Err(crate::error::StorageError::NotFound { .. }) => 0,
        Err(err) => return Err(err.into()),
    };
    let version = match node.version_tag().await {
        Ok(version) => version,
        Err(crate::error::StorageError::NotFound { .. }) => "v0".to_string(),
        Err(err) => return Err(err.into()),
    };

    let _ = state.sessions.touch(ctx.session.id, Utc::now()).await;

    let body = json!({
        "BaseFileName": node.basename(),
        "Size": size,
        "OwnerId": ctx.session.tenant_id,
        "UserId": ctx.session.display_name(),
        "UserFriendlyName": ctx.session.display_name(),
        "Version": version,
        "UserCanWrite": ctx.session.permissions.can_edit(),
        "UserCanNotWriteRelative": true,
        "SupportsLocks": true,
        "SupportsUpdate": true,
    });

    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, WopiError> {
    let ctx = authenticate(&state, file_id, &query.access_token).await?;
    let node = node_for(&state, &ctx.session).await?;

    let bytes = node.read_bytes().await?;
    let version = node.version_tag().await?;

    let is_first_access = state
        .sessions
        .mark_opened(ctx.session.id)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?;
    let _ = state.sessions.touch(ctx.session.id, Utc::now()).await;

    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(
            ctx.session.tenant_id,
            &ctx.session.account,
            ctx.session.user.as_deref(),
            "wopi.get_file",
            format!("file_id={}", ctx.session.file_id),
        ),
    )
    .await;

    if is_first_access {
        state.callbacks.dispatch(&ctx.tenant, &ctx.session, CallbackEvent::DocumentOpened, json!({})).await;
    }

    let mut response = (StatusCode::OK, bytes).into_response();
    if let Ok(value) = HeaderValue::from_str(&version) {
        response.headers_mut().insert("X-WOPI-ItemVersion", value);
    }
    Ok(response)
}

async fn put_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WopiError> {
    let ctx = authenticate(&state, file_id, &query.access_token).await?;

    if !ctx.session.permissions.can_edit() {
        return Err(WopiError::PermissionDenied);
    }

    let node = node_for(&state, &ctx.session).await?;
    let presented = lock_header(&headers);
    let current = state
        .sessions
        .get_lock(ctx.session.id)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?;

    let allowed = match (&current, &presented) {
        (None, None) => node.size().await.unwrap_or(0) == 0,
        (Some(cur), Some(presented_lock)) => cur == presented_lock,
        _ => false,
    };

    if !allowed {
        return Err(WopiError::LockConflict { existing: current });
    }

    node.write_bytes(&body).await?;
    let version = node.version_tag().await?;
    let _ = state.sessions.touch(ctx.session.id, Utc::now()).await;

    audit::record(
        state.audit.as_ref(),
        AuditEntry::new(
            ctx.session.tenant_id,
            &ctx.session.account,
            ctx.session.user.as_deref(),
            "wopi.put_file",
            format!("file_id={}", ctx.session.file_id),
        ),
    )
    .await;
    state.callbacks.dispatch(&ctx.tenant, &ctx.session, CallbackEvent::DocumentSaved, json!({})).await;

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&version) {
        response.headers_mut().insert("X-WOPI-ItemVersion", value);
    }
    Ok(response)
}

fn lock_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-WOPI-Lock")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn override_header(headers: &HeaderMap) -> Option<String> {
    headers.get("X-WOPI-Override").and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn file_operation(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Response, WopiError> {
    let ctx = authenticate(&state, file_id, &query.access_token).await?;
    let presented = lock_header(&headers);

    match override_header(&headers).as_deref() {
        Some("LOCK") => lock(&state, &ctx, presented, false).await,
        Some("REFRESH_LOCK") => lock(&state, &ctx, presented, true).await,
        Some("UNLOCK") => unlock(&state, &ctx, presented).await,
        Some("GET_LOCK") => get_lock(&state, &ctx).await,
        _ => Err(WopiError::InvalidToken),
    }
}

async fn lock(state: &AppState, ctx: &Context, presented: Option<String>, refresh: bool) -> Result<Response, WopiError> {
    let Some(lock_id) = presented else {
        return Err(WopiError::InvalidToken);
    };

    if refresh {
        let current = state.sessions.get_lock(ctx.session.id).await.ok().flatten();
        if current.as_deref() != Some(lock_id.as_str()) {
            return Err(WopiError::LockConflict { existing: current });
        }
    }

    let outcome = state
        .sessions
        .set_lock(ctx.session.id, &lock_id, state.lock_ttl)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?;

    match outcome {
        LockOutcome::Acquired => {
            audit::record(
                state.audit.as_ref(),
                AuditEntry::new(
                    ctx.session.tenant_id,
                    &ctx.session.account,
                    ctx.session.user.as_deref(),
                    "wopi.lock",
                    lock_id.clone(),
                ),
            )
            .await;
            state
                .callbacks
                .dispatch(&ctx.tenant, &ctx.session, CallbackEvent::LockAcquired, json!({ "lock_id": lock_id.clone() }))
                .await;
            Ok(lock_response(StatusCode::OK, Some(&lock_id)))
        }
        LockOutcome::AlreadyLocked(existing) => Err(WopiError::LockConflict { existing: Some(existing) }),
    }
}

async fn unlock(state: &AppState, ctx: &Context, presented: Option<String>) -> Result<Response, WopiError> {
    let Some(lock_id) = presented else {
        return Err(WopiError::InvalidToken);
    };

    let outcome = state
        .sessions
        .release_lock(ctx.session.id, &lock_id)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?;

    match outcome {
        ReleaseOutcome::Released => {
            audit::record(
                state.audit.as_ref(),
                AuditEntry::new(
                    ctx.session.tenant_id,
                    &ctx.session.account,
                    ctx.session.user.as_deref(),
                    "wopi.unlock",
                    lock_id.clone(),
                ),
            )
            .await;
            state
                .callbacks
                .dispatch(&ctx.tenant, &ctx.session, CallbackEvent::LockReleased, json!({ "lock_id": lock_id }))
                .await;
            Ok(lock_response(StatusCode::OK, None))
        }
        ReleaseOutcome::Mismatch(existing) => Err(WopiError::LockConflict { existing: Some(existing) }),
        ReleaseOutcome::NotLocked => Err(WopiError::LockConflict { existing: None }),
    }
}

async fn get_lock(state: &AppState, ctx: &Context) -> Result<Response, WopiError> {
    let current = state
        .sessions
        .get_lock(ctx.session.id)
        .await
        .map_err(|source| WopiError::Internal(source.to_string()))?;
    Ok(lock_response(StatusCode::OK, current.as_deref()))
}

fn lock_response(status: StatusCode, lock: Option<&str>) -> Response {
    let mut response = status.into_response();
    if let Ok(value) = HeaderValue::from_str(lock.unwrap_or("")) {
        response.headers_mut().insert("X-WOPI-Lock", value);
    }
    response
}

pub fn router() -> Router<AppState> {
    use axum::routing::get;

    Router::new()
        .route("/wopi/files/:file_id", get(check_file_info).post(file_operation))
        .route("/wopi/files/:file_id/contents", get(get_file).post(put_file))
}
