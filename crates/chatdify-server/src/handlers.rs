// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers.
//!
//! The webhook handler acknowledges every authentic delivery with 200 once
//! it is queued or deliberately ignored, so Chatwoot never disables the
//! webhook over payloads the bridge does not care about. Only a failed
//! enqueue answers 503, which asks Chatwoot to redeliver.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chatdify_core::{BridgeError, ErrorClass, GatewayErrorKind, HealthStatus, QueueStats};
use chatdify_pipeline::{AssignTarget, SubmitOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{verify_signature, SIGNATURE_HEADER};
use crate::server::AppState;

/// Response body for POST /chatwoot-webhook.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueStats>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub class: ErrorClass,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PriorityRequest {
    pub priority: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelsRequest {
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomAttributesRequest {
    pub custom_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub team_name: Option<String>,
}

/// POST /chatwoot-webhook
pub async fn post_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            tracing::warn!("webhook rejected: bad signature");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "webhook body is not JSON");
            return ack("ignored", None, Some("malformed: body is not JSON".into()));
        }
    };

    match state.dispatcher.submit(&payload).await {
        Ok(SubmitOutcome::Enqueued(task_id)) => ack("queued", Some(task_id), None),
        Ok(SubmitOutcome::Duplicate) => ack("duplicate", None, None),
        Ok(SubmitOutcome::Ignored(rejection)) => ack("ignored", None, Some(rejection.to_string())),
        Err(e) => {
            tracing::error!(error = %e, "webhook could not be queued");
            error_response(&e)
        }
    }
}

/// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    let health = &state.health;
    let storage = match health.storage.health_check().await {
        Ok(status) => status,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    };
    let queue = match health.queue.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "queue stats unavailable");
            None
        }
    };

    let healthy = storage == HealthStatus::Healthy && queue.is_some();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: health.start_time.elapsed().as_secs(),
        storage: match storage {
            HealthStatus::Healthy => "healthy".to_string(),
            HealthStatus::Degraded(reason) => format!("degraded: {reason}"),
            HealthStatus::Unhealthy(reason) => format!("unhealthy: {reason}"),
        },
        queue,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

/// POST /actions/conversations/{id}/messages
pub async fn post_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<MessageRequest>,
) -> Response {
    match state
        .actions
        .send_message(conversation_id, &body.content, body.private)
        .await
    {
        Ok(()) => Json(json!({ "conversation_id": conversation_id, "sent": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /actions/conversations/{id}/status
pub async fn post_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> Response {
    match state.actions.set_status(conversation_id, &body.status).await {
        Ok(status) => {
            Json(json!({ "conversation_id": conversation_id, "status": status.to_string() }))
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /actions/conversations/{id}/priority
pub async fn post_priority(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<PriorityRequest>,
) -> Response {
    match state
        .actions
        .set_priority(conversation_id, &body.priority)
        .await
    {
        Ok(priority) => Json(json!({
            "conversation_id": conversation_id,
            "priority": priority.to_string(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /actions/conversations/{id}/labels
pub async fn post_labels(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<LabelsRequest>,
) -> Response {
    match state.actions.add_labels(conversation_id, &body.labels).await {
        Ok(labels) => {
            Json(json!({ "conversation_id": conversation_id, "labels": labels })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /actions/conversations/{id}/custom-attributes
pub async fn post_custom_attributes(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<CustomAttributesRequest>,
) -> Response {
    match state
        .actions
        .update_custom_attributes(conversation_id, &body.custom_attributes)
        .await
    {
        Ok(()) => Json(json!({
            "conversation_id": conversation_id,
            "custom_attributes": body.custom_attributes,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /actions/conversations/{id}/assignments
pub async fn post_assignment(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<AssignmentRequest>,
) -> Response {
    let target = AssignTarget {
        assignee_id: body.assignee_id,
        team_id: body.team_id,
        team_name: body.team_name,
    };
    match state.actions.assign(conversation_id, &target).await {
        Ok(assignee) => Json(json!({
            "conversation_id": conversation_id,
            "assignee": assignee.to_string(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

fn ack(status: &'static str, task_id: Option<i64>, reason: Option<String>) -> Response {
    (
        StatusCode::OK,
        Json(WebhookAck {
            status,
            task_id,
            reason,
        }),
    )
        .into_response()
}

/// HTTP status for a bridge error.
pub fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Validation(_) | BridgeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        BridgeError::PolicyRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BridgeError::LeaseConflict { .. } => StatusCode::CONFLICT,
        BridgeError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::Gateway { kind, .. } => match kind {
            GatewayErrorKind::NotFound => StatusCode::NOT_FOUND,
            GatewayErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        },
        BridgeError::Config(_) | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &BridgeError) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
            class: error.class(),
        }),
    )
        .into_response()
}
