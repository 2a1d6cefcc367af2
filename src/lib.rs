pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod management;
pub mod registry;
pub mod storage_node;
pub mod store;
pub mod wopi;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

use core::audit::AuditLog;
use core::callback::CallbackDispatcher;
use core::token::TokenService;
use manager::SessionManager;
use registry::{StorageRegistry, TenantRegistry};
use store::SessionStore;

/// Shared state handed to every axum handler: the session store directly
/// (hot path), the tenant/storage registries, the token service, the audit
/// sink, the callback dispatcher, and the session manager. The management
/// API authenticates each request against a tenant's own API token rather
/// than a single shared secret, so no global credential lives here.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub tenants: Arc<TenantRegistry>,
    pub storages: Arc<StorageRegistry>,
    pub tokens: TokenService,
    pub audit: Arc<dyn AuditLog>,
    pub callbacks: Arc<CallbackDispatcher>,
    pub manager: Arc<SessionManager>,
    /// TTL handed to `set_lock`/`REFRESH_LOCK`, sourced from
    /// `ServiceConfig::lock_ttl_secs`.
    pub lock_ttl: chrono::Duration,
    /// Hard ceiling each request is allowed to run for, sourced from
    /// `ServiceConfig::request_deadline_secs`.
    pub request_deadline: Duration,
}

async fn enforce_deadline(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(state.request_deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(deadline = ?state.request_deadline, "request exceeded deadline");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

/// Build the full axum router: WOPI protocol routes mounted at the root,
/// management routes under `/sessions`.
#[must_use]
pub fn router(state: AppState) -> axum::Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    axum::Router::new()
        .merge(wopi::router())
        .merge(management::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .with_state(state)
}
