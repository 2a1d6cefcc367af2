//! Typed error hierarchy with rich context, mapped to HTTP status and
//! `X-WOPI-*` headers at the boundary.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors from [`crate::core::token::TokenService`].
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign access token: {source}")]
    Sign {
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("access token is malformed or its signature does not verify")]
    Invalid {
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    #[error("access token has expired")]
    Expired,
}

/// Errors from the storage node contract.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file '{path}' does not exist in storage '{storage}'")]
    NotFound { storage: String, path: String },

    #[error("storage '{storage}' I/O failure for '{path}': {source}")]
    Io {
        storage: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage '{storage}' does not support capability '{capability}'")]
    UnsupportedCapability { storage: String, capability: String },
}

/// Errors from session lifecycle management.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tenant {tenant_id} not found")]
    TenantNotFound { tenant_id: Uuid },

    #[error("tenant {tenant_id} is disabled")]
    TenantDisabled { tenant_id: Uuid },

    #[error("editor is disabled for tenant {tenant_id}")]
    EditorDisabled { tenant_id: Uuid },

    #[error("storage '{storage_name}' not found for tenant {tenant_id}")]
    StorageNotFound { tenant_id: Uuid, storage_name: String },

    #[error("session {session_id} not found")]
    NotFound { session_id: Uuid },

    #[error("failed to allocate a unique session id after {attempts} attempts")]
    IdExhaustion { attempts: u32 },

    #[error("session store operation failed: {source}")]
    Store {
        #[source]
        source: anyhow::Error,
    },

    #[error("token service failure: {0}")]
    Token(#[from] TokenError),
}

/// Errors surfaced by the WOPI protocol handler.
#[derive(Debug, Error)]
pub enum WopiError {
    #[error("invalid token")]
    InvalidToken,

    #[error("expired")]
    ExpiredToken,

    #[error("token_mismatch")]
    TokenMismatch,

    #[error("session or file not found")]
    NotFound,

    #[error("caller lacks permission for this operation")]
    PermissionDenied,

    #[error("lock conflict, current lock is {existing:?}")]
    LockConflict { existing: Option<String> },

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("capability '{0}' is not supported by this backend")]
    UnsupportedCapability(String),

    #[error("tenant is disabled")]
    TenantDisabled,

    #[error("editor is disabled for this tenant")]
    EditorDisabled,

    #[error("internal failure: {0}")]
    Internal(String),
}

impl IntoResponse for WopiError {
    fn into_response(self) -> Response {
        let lock_header = |lock: &Option<String>| {
            HeaderValue::from_str(lock.as_deref().unwrap_or("")).unwrap_or(HeaderValue::from_static(""))
        };

        let (status, body) = match &self {
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, json!({"error": "invalid_token"})),
            Self::ExpiredToken => (StatusCode::UNAUTHORIZED, json!({"error": "expired"})),
            Self::TokenMismatch => (StatusCode::UNAUTHORIZED, json!({"error": "token_mismatch"})),
            Self::NotFound => (StatusCode::NOT_FOUND, json!({"error": "not_found"})),
            Self::PermissionDenied => (StatusCode::NOT_FOUND, json!({"error": "not_authorized"})),
            Self::LockConflict { .. } => (StatusCode::CONFLICT, json!({"error": "lock_conflict"})),
            Self::Storage(StorageError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, json!({"error": "not_found"}))
            }
            Self::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "storage_failure"})),
            Self::UnsupportedCapability(_) => {
                (StatusCode::NOT_IMPLEMENTED, json!({"error": "unsupported_capability"}))
            }
            Self::TenantDisabled => (StatusCode::FORBIDDEN, json!({"error": "tenant_disabled"})),
            Self::EditorDisabled => (StatusCode::FORBIDDEN, json!({"error": "editor_disabled"})),
            Self::Internal(message) => {
                tracing::error!(error = %message, "wopi request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "internal"}))
            }
        };

        let mut response = (status, axum::Json(body)).into_response();
        let headers = response.headers_mut();

        match &self {
            Self::LockConflict { existing } => {
                headers.insert("X-WOPI-Lock", lock_header(existing));
            }
            Self::PermissionDenied => {
                headers.insert("X-WOPI-ServerError", HeaderValue::from_static("NotAuthorized"));
            }
            _ => {}
        }

        response
    }
}

/// Errors surfaced by the management API.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("request to upstream timed out")]
    UpstreamTimeout,

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Session(SessionError::TenantNotFound { .. } | SessionError::StorageNotFound { .. } | SessionError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            Self::Session(SessionError::TenantDisabled { .. } | SessionError::EditorDisabled { .. }) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            Self::Session(_) => {
                tracing::error!(error = %self, "management request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            Self::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_not_found_message_contains_id() {
        let id = Uuid::new_v4();
        let err = SessionError::TenantNotFound { tenant_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
