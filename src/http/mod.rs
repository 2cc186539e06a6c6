//! Local HTTP + SSE management API (§6, ambient C0 surface). A single axum
//! `Router` bound to `config.http_bind` (default `127.0.0.1:4869`, loopback
//! only, nothing here is meant to face the public internet).
//!
//! Router shape grounded on `indexer/src/api.rs`'s `Router::new().route(...)
//! .layer(CorsLayer).with_state(Arc<T>)` pattern, adapted to axum 0.7's
//! `:name` path-param syntax. Every route carries the same capability+CSRF
//! middleware (`session::require_capability_and_csrf`) rather than splitting
//! into separate mutating/readonly sub-routers, since two sub-routers both
//! registering `/dead-man-switch` under different methods would collide at
//! merge time.

mod apps;
mod connect;
mod deadman;
mod events;
mod keys;
mod logs;
mod requests;
mod session;

use crate::acl::AclEngine;
use crate::atoms::error::SignetError;
use crate::audit::AuditLog;
use crate::connection::ConnectionService;
use crate::db::Db;
use crate::deadman::DeadManSwitch;
use crate::events::EventBus;
use crate::keystore::KeyStore;
use crate::killswitch::KillSwitch;
use crate::pipeline::RequestPipeline;
use crate::queue::AuthorizationQueue;
use crate::relay::RelayPool;
use crate::subscriptions::SubscriptionManager;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub db: Arc<Db>,
    pub keystore: Arc<KeyStore>,
    pub acl: Arc<AclEngine>,
    pub relay: Arc<RelayPool>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub connections: Arc<ConnectionService>,
    pub pipeline: Arc<RequestPipeline>,
    pub queue: Arc<AuthorizationQueue>,
    pub killswitch: Arc<KillSwitch>,
    pub deadman: Arc<DeadManSwitch>,
    pub bus: Arc<EventBus>,
    pub audit: Arc<AuditLog>,
    pub session_token: String,
    pub csrf_token: String,
}

/// Wraps a `SignetError` so handlers can return it directly via `?` and have
/// it turn into the right HTTP status (`SignetError::http_status`) with a
/// `{"error": "..."}` body.
pub struct ApiError(pub SignetError);

impl From<SignetError> for ApiError {
    fn from(e: SignetError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/keys", get(keys::list_keys).post(keys::create_key))
        .route("/keys/lock-all", post(keys::lock_all))
        .route("/keys/:name", patch(keys::update_key).delete(keys::delete_key))
        .route("/keys/:name/unlock", post(keys::unlock_key))
        .route("/keys/:name/lock", post(keys::lock_key))
        .route("/keys/:name/set-passphrase", post(keys::set_passphrase))
        .route("/keys/:name/encrypt", post(keys::encrypt_key))
        .route("/keys/:name/migrate", post(keys::migrate_key))
        .route("/keys/:name/export", post(keys::export_key))
        .route("/keys/:name/connection-token", post(keys::connection_token))
        .route("/connect", post(connect::submit))
        .route("/apps", get(apps::list_apps))
        .route("/apps/suspend-all", post(apps::suspend_all))
        .route("/apps/resume-all", post(apps::resume_all))
        .route("/apps/:id", patch(apps::update_app))
        .route("/apps/:id/revoke", post(apps::revoke_app))
        .route("/apps/:id/suspend", post(apps::suspend_app))
        .route("/apps/:id/unsuspend", post(apps::unsuspend_app))
        .route("/requests", get(requests::list_requests))
        .route("/requests/batch", post(requests::batch_approve))
        .route("/requests/:id", post(requests::approve_request).delete(requests::deny_request))
        .route("/logs", get(logs::list_logs))
        .route("/events", get(events::stream))
        .route("/dead-man-switch", get(deadman::state_handler).put(deadman::configure))
        .route("/dead-man-switch/reset", post(deadman::reset))
        .route("/dead-man-switch/test-panic", post(deadman::test_panic))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), session::require_capability_and_csrf))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the management API until the process is asked to shut
/// down. The caller drives the shutdown future (`main.rs`'s `tokio::select!`
/// with the signal handler); this just runs the listener.
pub async fn serve(state: Arc<AppState>, bind: std::net::SocketAddr) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("management API listening on {bind}");
    axum::serve(listener, router).await
}
