// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy shared by every bridge component.
//!
//! Gateways translate transport failures into [`BridgeError::Gateway`] with a
//! [`GatewayErrorKind`]; the pipeline only ever inspects [`BridgeError::class`]
//! and [`BridgeError::is_retryable`] to decide between retry, escalation, and
//! terminal failure.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// External service a gateway error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Chatwoot,
    Dify,
}

/// Normalized failure kind reported by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    /// Request did not complete within the configured timeout.
    Timeout,
    /// The service asked us to back off (HTTP 429).
    RateLimited,
    /// Upstream outage (HTTP 5xx or connection failure).
    ServiceError,
    /// The addressed resource does not exist upstream.
    NotFound,
    /// Credentials were refused.
    Unauthorized,
    /// The service answered with a body we could not interpret.
    InvalidResponse,
}

/// Coarse error class used for routing decisions and structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    PolicyRejected,
    InvalidArgument,
    TransientGateway,
    TerminalGateway,
    LeaseConflict,
    Content,
    Storage,
    Config,
    Internal,
}

/// The primary error type used across all bridge traits and operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors (invalid TOML, missing credentials, bad header values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed inbound event or payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// A write was refused by the configured policy (for example a status outside
    /// the allowed set).
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// A value outside its enumerated domain, or a request the platform refused as invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure talking to Chatwoot or Dify.
    #[error("{service} {kind}: {message}")]
    Gateway {
        service: Service,
        kind: GatewayErrorKind,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Another run currently holds the AI lease for this conversation.
    #[error("conversation {conversation_id} has an AI request in flight")]
    LeaseConflict { conversation_id: i64 },

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Shorthand for a gateway error without an underlying source.
    pub fn gateway(service: Service, kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        BridgeError::Gateway {
            service,
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a storage error from any displayable cause.
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        BridgeError::Storage {
            source: source.into(),
        }
    }

    /// Map a non-success HTTP status from `service` into the taxonomy.
    ///
    /// 400/422 mean the platform refused the request as invalid and become
    /// [`BridgeError::InvalidArgument`]; other statuses become gateway errors.
    pub fn from_http_status(service: Service, status: u16, body: &str) -> Self {
        let mut detail: String = body.chars().take(512).collect();
        if detail.trim().is_empty() {
            detail = "<empty body>".to_string();
        }
        let message = format!("HTTP {status}: {detail}");
        let kind = match status {
            400 | 422 => {
                return BridgeError::InvalidArgument(format!("{service} rejected request, {message}"));
            }
            401 | 403 => GatewayErrorKind::Unauthorized,
            404 | 410 => GatewayErrorKind::NotFound,
            408 | 504 => GatewayErrorKind::Timeout,
            429 => GatewayErrorKind::RateLimited,
            _ => GatewayErrorKind::ServiceError,
        };
        BridgeError::gateway(service, kind, message)
    }

    /// Returns the gateway failure kind, if this is a gateway error.
    pub fn gateway_kind(&self) -> Option<GatewayErrorKind> {
        match self {
            BridgeError::Gateway { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Classify this error into the bridge's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::Config(_) => ErrorClass::Config,
            BridgeError::Validation(_) => ErrorClass::Validation,
            BridgeError::PolicyRejected(_) => ErrorClass::PolicyRejected,
            BridgeError::InvalidArgument(_) => ErrorClass::InvalidArgument,
            BridgeError::Gateway { kind, .. } => match kind {
                GatewayErrorKind::Timeout
                | GatewayErrorKind::RateLimited
                | GatewayErrorKind::ServiceError => ErrorClass::TransientGateway,
                GatewayErrorKind::NotFound | GatewayErrorKind::Unauthorized => {
                    ErrorClass::TerminalGateway
                }
                GatewayErrorKind::InvalidResponse => ErrorClass::Content,
            },
            BridgeError::LeaseConflict { .. } => ErrorClass::LeaseConflict,
            BridgeError::Storage { .. } => ErrorClass::Storage,
            BridgeError::Timeout { .. } => ErrorClass::TransientGateway,
            BridgeError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether a queue-level or in-run retry may succeed.
    ///
    /// Transient gateway failures, storage unavailability, and run timeouts are
    /// retryable. `NotFound`, `Unauthorized`, policy, argument, and content
    /// errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientGateway | ErrorClass::Storage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_gateway_kinds_are_retryable() {
        for kind in [
            GatewayErrorKind::Timeout,
            GatewayErrorKind::RateLimited,
            GatewayErrorKind::ServiceError,
        ] {
            let err = BridgeError::gateway(Service::Dify, kind, "x");
            assert_eq!(err.class(), ErrorClass::TransientGateway);
            assert!(err.is_retryable(), "{kind} should be retryable");
        }
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        let not_found = BridgeError::gateway(Service::Chatwoot, GatewayErrorKind::NotFound, "gone");
        let unauthorized =
            BridgeError::gateway(Service::Chatwoot, GatewayErrorKind::Unauthorized, "bad key");
        assert_eq!(not_found.class(), ErrorClass::TerminalGateway);
        assert!(!not_found.is_retryable());
        assert!(!unauthorized.is_retryable());
    }

    #[test]
    fn invalid_response_is_a_content_error() {
        let err = BridgeError::gateway(Service::Dify, GatewayErrorKind::InvalidResponse, "{bad");
        assert_eq!(err.class(), ErrorClass::Content);
        assert!(!err.is_retryable());
    }

    #[test]
    fn policy_and_argument_errors_never_retry() {
        assert!(!BridgeError::PolicyRejected("closed".into()).is_retryable());
        assert!(!BridgeError::InvalidArgument("garbo".into()).is_retryable());
        assert!(!BridgeError::Validation("missing id".into()).is_retryable());
    }

    #[test]
    fn storage_and_timeouts_retry() {
        assert!(BridgeError::storage("disk full").is_retryable());
        assert!(
            BridgeError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }
            .is_retryable()
        );
    }

    #[test]
    fn http_status_mapping() {
        let kind = |status| BridgeError::from_http_status(Service::Chatwoot, status, "").gateway_kind();
        assert_eq!(kind(401), Some(GatewayErrorKind::Unauthorized));
        assert_eq!(kind(404), Some(GatewayErrorKind::NotFound));
        assert_eq!(kind(429), Some(GatewayErrorKind::RateLimited));
        assert_eq!(kind(502), Some(GatewayErrorKind::ServiceError));
        assert_eq!(kind(504), Some(GatewayErrorKind::Timeout));
        assert!(matches!(
            BridgeError::from_http_status(Service::Chatwoot, 422, "bad status"),
            BridgeError::InvalidArgument(_)
        ));
    }

    #[test]
    fn gateway_error_display_names_service_and_kind() {
        let err = BridgeError::gateway(Service::Chatwoot, GatewayErrorKind::RateLimited, "slow down");
        assert_eq!(err.to_string(), "chatwoot rate_limited: slow down");
    }
}
