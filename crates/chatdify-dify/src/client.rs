// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Dify service API.

use std::time::Duration;

use chatdify_config::model::HttpConfig;
use chatdify_core::{BridgeError, GatewayErrorKind, Service};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::types::{ApiErrorResponse, ChatRequest, ChatResponse, DeleteConversationRequest};

/// HTTP client for one Dify app, authenticated with its app API key.
#[derive(Debug, Clone)]
pub struct DifyClient {
    client: reqwest::Client,
    base_url: String,
}

impl DifyClient {
    pub fn new(api_url: &str, api_key: &str, http: &HttpConfig) -> Result<Self, BridgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| BridgeError::Config(format!("invalid Dify API key header value: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sends a blocking chat message and returns the full response.
    pub async fn chat_message(&self, request: &ChatRequest) -> Result<ChatResponse, BridgeError> {
        let response = self
            .client
            .post(format!("{}/chat-messages", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(status = %status, "chat-messages response received");
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| BridgeError::Gateway {
            service: Service::Dify,
            kind: GatewayErrorKind::InvalidResponse,
            message: format!("failed to parse chat-messages response: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// Deletes a Dify conversation on behalf of `user`.
    pub async fn delete_conversation(&self, conversation_id: &str, user: &str) -> Result<(), BridgeError> {
        let response = self
            .client
            .delete(format!("{}/conversations/{conversation_id}", self.base_url))
            .json(&DeleteConversationRequest { user })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(status = %status, conversation_id, "delete conversation response received");
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body))
    }
}

/// Builds the taxonomy error, preferring Dify's own `code: message` when present.
fn status_error(status: u16, body: &str) -> BridgeError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(ApiErrorResponse {
            code: Some(code),
            message,
        }) => BridgeError::from_http_status(
            Service::Dify,
            status,
            &format!("{code}: {}", message.unwrap_or_default()),
        ),
        _ => BridgeError::from_http_status(Service::Dify, status, body),
    }
}

fn transport_error(e: reqwest::Error) -> BridgeError {
    let kind = if e.is_timeout() {
        GatewayErrorKind::Timeout
    } else {
        GatewayErrorKind::ServiceError
    };
    BridgeError::Gateway {
        service: Service::Dify,
        kind,
        message: format!("HTTP request failed: {e}"),
        source: Some(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            inputs: BTreeMap::new(),
            query: "hello".into(),
            user: "chatwoot-bridge".into(),
            response_mode: "blocking".into(),
            conversation_id: None,
        }
    }

    #[tokio::test]
    async fn chat_message_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat-messages"))
            .and(header("authorization", "Bearer app-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "answer": "hi there",
                "conversation_id": "dc-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DifyClient::new(&format!("{}/v1/", server.uri()), "app-key", &HttpConfig::default()).unwrap();
        let resp = client.chat_message(&request()).await.unwrap();
        assert_eq!(resp.answer, "hi there");
    }

    #[tokio::test]
    async fn error_body_code_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "code": "too_many_requests",
                "message": "slow down"
            })))
            .mount(&server)
            .await;

        let client = DifyClient::new(&server.uri(), "k", &HttpConfig::default()).unwrap();
        let err = client.chat_message(&request()).await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::RateLimited));
        assert!(err.to_string().contains("too_many_requests"));
    }

    #[tokio::test]
    async fn delete_sends_user() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/conversations/dc-9"))
            .and(body_json(serde_json::json!({"user": "chatwoot-bridge"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DifyClient::new(&server.uri(), "k", &HttpConfig::default()).unwrap();
        client.delete_conversation("dc-9", "chatwoot-bridge").await.unwrap();
    }
}
