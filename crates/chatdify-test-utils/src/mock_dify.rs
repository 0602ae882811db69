// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock Dify completion provider.
//!
//! Returns queued responses (or a default reply once the queue is empty),
//! records every context it was given, and tracks how many completions ran
//! at once for each conversation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatdify_core::{
    AIResponse, AdapterType, BridgeError, CompletionProvider, ConversationContext, ConversationId,
    HealthStatus, PluginAdapter, Service,
};
use tokio::sync::Mutex;

use crate::mock_chatwoot::Fault;

#[derive(Default)]
struct Concurrency {
    in_flight: HashMap<ConversationId, usize>,
    max: HashMap<ConversationId, usize>,
}

/// In-memory stand-in for the Dify chat API.
pub struct MockDify {
    responses: Arc<Mutex<VecDeque<Result<AIResponse, Fault>>>>,
    default_reply: String,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<ConversationContext>>,
    deleted: Mutex<Vec<String>>,
    concurrency: Mutex<Concurrency>,
}

impl Default for MockDify {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDify {
    pub fn new() -> Self {
        Self::with_default_reply("Thanks for reaching out, we are on it.")
    }

    pub fn with_default_reply(reply: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: reply.into(),
            delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            concurrency: Mutex::new(Concurrency::default()),
        }
    }

    /// Queue a response for the next completion.
    pub async fn push_response(&self, response: AIResponse) {
        self.responses.lock().await.push_back(Ok(response));
    }

    /// Queue a plain reply for the next completion.
    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.push_response(AIResponse {
            reply_text: reply.into(),
            ..Default::default()
        })
        .await;
    }

    /// Queue a failure for the next completion.
    pub async fn push_failure(&self, fault: Fault) {
        self.responses.lock().await.push_back(Err(fault));
    }

    /// Make every completion take `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = delay;
    }

    /// Contexts received so far, in call order.
    pub async fn requests(&self) -> Vec<ConversationContext> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Dify conversation ids passed to `delete_conversation`.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }

    /// Highest number of simultaneous completions seen for a conversation.
    pub async fn max_concurrent(&self, conversation_id: ConversationId) -> usize {
        self.concurrency
            .lock()
            .await
            .max
            .get(&conversation_id)
            .copied()
            .unwrap_or(0)
    }

    async fn enter(&self, conversation_id: ConversationId) {
        let mut concurrency = self.concurrency.lock().await;
        let current = {
            let entry = concurrency.in_flight.entry(conversation_id).or_insert(0);
            *entry += 1;
            *entry
        };
        let max = concurrency.max.entry(conversation_id).or_insert(0);
        *max = (*max).max(current);
    }

    async fn leave(&self, conversation_id: ConversationId) {
        let mut concurrency = self.concurrency.lock().await;
        if let Some(entry) = concurrency.in_flight.get_mut(&conversation_id) {
            *entry = entry.saturating_sub(1);
        }
    }
}

#[async_trait]
impl PluginAdapter for MockDify {
    fn name(&self) -> &str {
        "mock-dify"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, BridgeError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[async_trait]
impl CompletionProvider for MockDify {
    async fn complete(&self, context: &ConversationContext) -> Result<AIResponse, BridgeError> {
        let conversation_id = context.conversation_id;
        self.requests.lock().await.push(context.clone());
        self.enter(conversation_id).await;

        let delay = *self.delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().await.pop_front();
        self.leave(conversation_id).await;

        let mut response = match next {
            Some(Ok(response)) => response,
            Some(Err(fault)) => return Err(fault.to_error(Service::Dify, "chat-messages")),
            None => AIResponse {
                reply_text: self.default_reply.clone(),
                ..Default::default()
            },
        };
        if response.dify_conversation_id.is_none() {
            response.dify_conversation_id = context
                .dify_conversation_id
                .clone()
                .or_else(|| Some(format!("dify-{conversation_id}")));
        }
        Ok(response)
    }

    async fn delete_conversation(&self, backend_conversation_id: &str) -> Result<(), BridgeError> {
        self.deleted
            .lock()
            .await
            .push(backend_conversation_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_core::{GatewayErrorKind, MessageDirection};
    use std::collections::{BTreeMap, BTreeSet};

    fn context(conversation_id: ConversationId) -> ConversationContext {
        ConversationContext {
            conversation_id,
            message_text: "hello".into(),
            direction: MessageDirection::Incoming,
            status: None,
            labels: BTreeSet::new(),
            custom_attributes: BTreeMap::new(),
            history: Vec::new(),
            dify_conversation_id: None,
        }
    }

    #[tokio::test]
    async fn queued_responses_come_first() {
        let dify = MockDify::with_default_reply("default");
        dify.push_reply("first").await;
        dify.push_failure(Fault::Gateway(GatewayErrorKind::Timeout)).await;

        assert_eq!(dify.complete(&context(1)).await.unwrap().reply_text, "first");
        let err = dify.complete(&context(1)).await.unwrap_err();
        assert_eq!(err.gateway_kind(), Some(GatewayErrorKind::Timeout));
        assert_eq!(dify.complete(&context(1)).await.unwrap().reply_text, "default");
        assert_eq!(dify.request_count().await, 3);
    }

    #[tokio::test]
    async fn assigns_a_dify_conversation_id() {
        let dify = MockDify::new();
        let response = dify.complete(&context(7)).await.unwrap();
        assert_eq!(response.dify_conversation_id.as_deref(), Some("dify-7"));
    }

    #[tokio::test]
    async fn sequential_calls_never_overlap() {
        let dify = MockDify::new();
        dify.complete(&context(2)).await.unwrap();
        dify.complete(&context(2)).await.unwrap();
        assert_eq!(dify.max_concurrent(2).await, 1);
    }
}
