// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the front door.

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chatdify_config::model::ServerConfig;
use chatdify_core::{BridgeError, StorageAdapter, TaskQueue};
use chatdify_pipeline::{ActionService, Dispatcher};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AuthConfig};
use crate::handlers;

/// Dependencies of the unauthenticated health endpoint.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    pub storage: Arc<dyn StorageAdapter>,
    pub queue: Arc<dyn TaskQueue>,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub actions: Arc<ActionService>,
    /// HMAC key for webhook signatures. `None` accepts unsigned deliveries.
    pub webhook_secret: Option<String>,
    pub auth: AuthConfig,
    pub health: HealthState,
}

/// Build the router.
///
/// - POST /chatwoot-webhook (signature checked in the handler)
/// - GET /health
/// - POST /actions/conversations/{id}/... (bearer auth)
pub fn router(state: AppState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/chatwoot-webhook", post(handlers::post_webhook))
        .with_state(state.clone());

    let action_routes = Router::new()
        .route(
            "/actions/conversations/{id}/messages",
            post(handlers::post_message),
        )
        .route("/actions/conversations/{id}/status", post(handlers::post_status))
        .route(
            "/actions/conversations/{id}/priority",
            post(handlers::post_priority),
        )
        .route("/actions/conversations/{id}/labels", post(handlers::post_labels))
        .route(
            "/actions/conversations/{id}/custom-attributes",
            post(handlers::post_custom_attributes),
        )
        .route(
            "/actions/conversations/{id}/assignments",
            post(handlers::post_assignment),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(action_routes)
        .layer(TraceLayer::new_for_http())
}

/// Bind to the configured address and serve until `cancel` fires.
pub async fn serve(
    config: &ServerConfig,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), BridgeError> {
    if state.auth.bearer_token.is_none() {
        tracing::warn!("no actions token configured, action endpoints will reject every request");
    }
    if state.webhook_secret.is_none() {
        tracing::warn!("no webhook secret configured, accepting unsigned webhooks");
    }

    let app = router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Internal(format!("failed to bind {addr}: {e}")))?;

    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| BridgeError::Internal(format!("server error: {e}")))?;

    tracing::info!("server stopped");
    Ok(())
}
