// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dify completion provider for the chatdify bridge.
//!
//! This crate implements [`CompletionProvider`] over Dify's blocking
//! `chat-messages` endpoint. Streaming mode is not supported.

pub mod answer;
pub mod client;
pub mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chatdify_config::model::ChatdifyConfig;
use chatdify_config::{resolve_secret, DIFY_API_KEY_ENV};
use chatdify_core::{
    AIResponse, AdapterType, BridgeError, CompletionProvider, ConversationContext,
    GatewayErrorKind, HealthStatus, MessageDirection, PluginAdapter,
};
use tracing::{debug, info, warn};

use crate::client::DifyClient;
use crate::types::ChatRequest;

pub use answer::parse_answer;

/// Dify provider implementing [`CompletionProvider`].
///
/// API key resolution order: config -> `DIFY_API_KEY` env var -> error.
pub struct DifyProvider {
    client: DifyClient,
    user: String,
    temperature: f32,
    max_tokens: u32,
}

impl DifyProvider {
    /// Creates a new Dify provider from the given configuration.
    pub fn new(config: &ChatdifyConfig) -> Result<Self, BridgeError> {
        let api_key = resolve_secret(config.dify.api_key.as_deref(), DIFY_API_KEY_ENV)
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "Dify API key not found: set dify.api_key or {DIFY_API_KEY_ENV}"
                ))
            })?;
        let client = DifyClient::new(&config.dify.api_url, &api_key, &config.http)?;
        info!(api_url = config.dify.api_url, "Dify provider initialized");
        Ok(Self {
            client,
            user: config.dify.user.clone(),
            temperature: config.dify.temperature,
            max_tokens: config.dify.max_tokens,
        })
    }

    /// Creates a provider with an existing client.
    pub fn with_client(client: DifyClient, user: impl Into<String>) -> Self {
        Self {
            client,
            user: user.into(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    fn to_chat_request(&self, context: &ConversationContext) -> ChatRequest {
        ChatRequest {
            inputs: build_inputs(context, self.temperature, self.max_tokens),
            query: context.message_text.clone(),
            user: self.user.clone(),
            response_mode: "blocking".to_string(),
            conversation_id: context.dify_conversation_id.clone(),
        }
    }
}

/// Input variables handed to the Dify app alongside the query.
fn build_inputs(
    context: &ConversationContext,
    temperature: f32,
    max_tokens: u32,
) -> BTreeMap<String, String> {
    let history = context
        .history
        .iter()
        .map(|m| {
            let speaker = match m.direction {
                MessageDirection::Incoming => "customer",
                MessageDirection::Outgoing => "agent",
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    BTreeMap::from([
        (
            "chatwoot_conversation_id".to_string(),
            context.conversation_id.to_string(),
        ),
        (
            "conversation_status".to_string(),
            context.status.map(|s| s.to_string()).unwrap_or_default(),
        ),
        ("message_direction".to_string(), context.direction.to_string()),
        (
            "labels".to_string(),
            context.labels.iter().cloned().collect::<Vec<_>>().join(","),
        ),
        (
            "custom_attributes".to_string(),
            serde_json::to_string(&context.custom_attributes).unwrap_or_default(),
        ),
        ("history".to_string(), history),
        ("temperature".to_string(), temperature.to_string()),
        ("max_tokens".to_string(), max_tokens.to_string()),
    ])
}

#[async_trait]
impl PluginAdapter for DifyProvider {
    fn name(&self) -> &str {
        "dify"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, BridgeError> {
        // Probing would cost a completion.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        debug!("Dify provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl CompletionProvider for DifyProvider {
    async fn complete(&self, context: &ConversationContext) -> Result<AIResponse, BridgeError> {
        if context.message_text.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "cannot request a completion for an empty message".into(),
            ));
        }

        let mut request = self.to_chat_request(context);
        let response = match self.client.chat_message(&request).await {
            Err(e)
                if e.gateway_kind() == Some(GatewayErrorKind::NotFound)
                    && request.conversation_id.is_some() =>
            {
                // Dify forgot the conversation; start a fresh one.
                warn!(
                    conversation_id = context.conversation_id,
                    dify_conversation_id = request.conversation_id.as_deref().unwrap_or_default(),
                    error = %e,
                    "Dify conversation not found, starting a new one"
                );
                request.conversation_id = None;
                self.client.chat_message(&request).await?
            }
            other => other?,
        };

        let mut parsed = parse_answer(&response.answer)?;
        parsed.dify_conversation_id = response
            .conversation_id
            .filter(|id| !id.is_empty())
            .or(request.conversation_id);
        debug!(
            conversation_id = context.conversation_id,
            message_id = response.message_id.as_deref().unwrap_or_default(),
            escalate = parsed.escalate,
            "Dify completion received"
        );
        Ok(parsed)
    }

    async fn delete_conversation(&self, backend_conversation_id: &str) -> Result<(), BridgeError> {
        match self
            .client
            .delete_conversation(backend_conversation_id, &self.user)
            .await
        {
            Err(e) if e.gateway_kind() == Some(GatewayErrorKind::NotFound) => {
                debug!(backend_conversation_id, "Dify conversation already gone");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_config::model::HttpConfig;
    use chatdify_core::{ContextMessage, ConversationStatus};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> DifyProvider {
        let client = DifyClient::new(&server.uri(), "app-key", &HttpConfig::default()).unwrap();
        DifyProvider::with_client(client, "chatwoot-bridge")
    }

    fn context(dify_conversation_id: Option<&str>) -> ConversationContext {
        ConversationContext {
            conversation_id: 20,
            message_text: "Where is my order?".into(),
            direction: MessageDirection::Incoming,
            status: Some(ConversationStatus::Open),
            labels: Default::default(),
            custom_attributes: Default::default(),
            history: vec![ContextMessage {
                direction: MessageDirection::Outgoing,
                content: "Hi!".into(),
            }],
            dify_conversation_id: dify_conversation_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn complete_sends_context_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .and(body_partial_json(json!({
                "query": "Where is my order?",
                "response_mode": "blocking",
                "user": "chatwoot-bridge",
                "inputs": {
                    "chatwoot_conversation_id": "20",
                    "conversation_status": "open",
                    "message_direction": "incoming",
                    "history": "agent: Hi!"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "It ships tomorrow.",
                "conversation_id": "dc-1",
                "message_id": "m-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = provider(&server).complete(&context(None)).await.unwrap();
        assert_eq!(resp.reply_text, "It ships tomorrow.");
        assert_eq!(resp.dify_conversation_id.as_deref(), Some("dc-1"));
    }

    #[tokio::test]
    async fn forgotten_conversation_restarts_fresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .and(body_partial_json(json!({"conversation_id": "stale"})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "not_found",
                "message": "Conversation Not Exists."
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "fresh",
                "conversation_id": "dc-new"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = provider(&server)
            .complete(&context(Some("stale")))
            .await
            .unwrap();
        assert_eq!(resp.dify_conversation_id.as_deref(), Some("dc-new"));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&context(None)).await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::ServiceError));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_answer_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": ""})))
            .mount(&server)
            .await;

        let err = provider(&server).complete(&context(None)).await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::InvalidResponse));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn deleting_missing_conversation_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/conversations/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        provider(&server).delete_conversation("gone").await.unwrap();
    }

    #[test]
    fn provider_requires_api_key() {
        let mut config = ChatdifyConfig::default();
        config.dify.api_key = Some("app-1".into());
        let provider = DifyProvider::new(&config).unwrap();
        assert_eq!(provider.name(), "dify");
        assert_eq!(provider.adapter_type(), AdapterType::Completion);
    }
}
