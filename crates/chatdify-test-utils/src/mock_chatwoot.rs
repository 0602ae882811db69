// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock Chatwoot gateway for deterministic tests.
//!
//! Keeps an in-memory copy of every conversation it is asked about, applies
//! mutations to it, records each successful call, and can be told to fail
//! specific operations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chatdify_core::{
    AdapterType, Assignee, BridgeError, ContextMessage, ConversationData, ConversationGateway,
    ConversationId, ConversationStatus, GatewayErrorKind, HealthStatus, PluginAdapter, Priority,
    Service, StatusPolicy, Team,
};
use tokio::sync::Mutex;

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatwootCall {
    SendMessage {
        conversation_id: ConversationId,
        content: String,
        private: bool,
    },
    UpdateStatus {
        conversation_id: ConversationId,
        status: ConversationStatus,
    },
    AddLabels {
        conversation_id: ConversationId,
        labels: BTreeSet<String>,
    },
    Assign {
        conversation_id: ConversationId,
        assignee: Assignee,
    },
    UpdateCustomAttributes {
        conversation_id: ConversationId,
        attributes: BTreeMap<String, String>,
    },
    TogglePriority {
        conversation_id: ConversationId,
        priority: Priority,
    },
    GetConversation {
        conversation_id: ConversationId,
    },
    ListMessages {
        conversation_id: ConversationId,
    },
    GetTeams,
}

impl ChatwootCall {
    /// The gateway method that produced this call.
    pub fn operation(&self) -> &'static str {
        match self {
            ChatwootCall::SendMessage { .. } => "send_message",
            ChatwootCall::UpdateStatus { .. } => "update_conversation_status",
            ChatwootCall::AddLabels { .. } => "add_labels",
            ChatwootCall::Assign { .. } => "assign_conversation",
            ChatwootCall::UpdateCustomAttributes { .. } => "update_custom_attributes",
            ChatwootCall::TogglePriority { .. } => "toggle_priority",
            ChatwootCall::GetConversation { .. } => "get_conversation_data",
            ChatwootCall::ListMessages { .. } => "list_messages",
            ChatwootCall::GetTeams => "get_teams",
        }
    }
}

/// An injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Gateway(GatewayErrorKind),
    /// The platform refused the request (HTTP 400/422).
    InvalidArgument,
}

impl Fault {
    pub fn to_error(self, service: Service, operation: &str) -> BridgeError {
        match self {
            Fault::Gateway(kind) => {
                BridgeError::gateway(service, kind, format!("injected failure in {operation}"))
            }
            Fault::InvalidArgument => {
                BridgeError::InvalidArgument(format!("injected rejection in {operation}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Injected {
    fault: Fault,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// In-memory stand-in for the Chatwoot API.
pub struct MockChatwoot {
    policy: Option<StatusPolicy>,
    conversations: Mutex<HashMap<ConversationId, ConversationData>>,
    messages: Mutex<HashMap<ConversationId, Vec<ContextMessage>>>,
    teams: Mutex<Vec<Team>>,
    faults: Mutex<HashMap<&'static str, Injected>>,
    calls: Mutex<Vec<ChatwootCall>>,
    attempts: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MockChatwoot {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatwoot {
    pub fn new() -> Self {
        Self {
            policy: None,
            conversations: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            teams: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Enforce a status write policy the way the real gateway does.
    pub fn with_policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub async fn set_teams(&self, teams: Vec<Team>) {
        *self.teams.lock().await = teams;
    }

    pub async fn set_conversation(&self, data: ConversationData) {
        self.conversations.lock().await.insert(data.id, data);
    }

    /// Replace the public message history of a conversation, oldest first.
    pub async fn set_messages(&self, conversation_id: ConversationId, messages: Vec<ContextMessage>) {
        self.messages.lock().await.insert(conversation_id, messages);
    }

    /// Fail the next `times` calls of `operation`.
    pub async fn fail_next(&self, operation: &'static str, fault: Fault, times: u32) {
        self.faults.lock().await.insert(
            operation,
            Injected {
                fault,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call of `operation` until [`MockChatwoot::clear_faults`].
    pub async fn fail_always(&self, operation: &'static str, fault: Fault) {
        self.faults.lock().await.insert(
            operation,
            Injected {
                fault,
                remaining: None,
            },
        );
    }

    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Successful calls, in order.
    pub async fn calls(&self) -> Vec<ChatwootCall> {
        self.calls.lock().await.clone()
    }

    /// Number of successful calls of `operation`.
    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Number of calls of `operation`, failed ones included.
    pub async fn attempt_count(&self, operation: &str) -> usize {
        self.attempts.lock().await.get(operation).copied().unwrap_or(0)
    }

    /// Public messages the bridge posted to a conversation.
    pub async fn sent_messages(&self, conversation_id: ConversationId) -> Vec<String> {
        self.sent(conversation_id, false).await
    }

    /// Private notes the bridge posted to a conversation.
    pub async fn private_notes(&self, conversation_id: ConversationId) -> Vec<String> {
        self.sent(conversation_id, true).await
    }

    /// Current mock-side state of a conversation.
    pub async fn conversation(&self, conversation_id: ConversationId) -> ConversationData {
        self.conversations
            .lock()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_else(|| fresh_conversation(conversation_id))
    }

    async fn sent(&self, conversation_id: ConversationId, private_only: bool) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                ChatwootCall::SendMessage {
                    conversation_id: id,
                    content,
                    private,
                } if *id == conversation_id && *private == private_only => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Count the attempt and return the injected error, if one is armed.
    async fn check_fault(&self, operation: &'static str) -> Result<(), BridgeError> {
        *self.attempts.lock().await.entry(operation).or_insert(0) += 1;

        let mut faults = self.faults.lock().await;
        let Some(injected) = faults.get_mut(operation) else {
            return Ok(());
        };
        let (fault, remaining) = (injected.fault, injected.remaining);
        match remaining {
            None => {}
            Some(0) => {
                faults.remove(operation);
                return Ok(());
            }
            Some(1) => {
                faults.remove(operation);
            }
            Some(n) => injected.remaining = Some(n - 1),
        }
        Err(fault.to_error(Service::Chatwoot, operation))
    }

    async fn record(&self, call: ChatwootCall) {
        self.calls.lock().await.push(call);
    }

    async fn with_conversation<R>(
        &self,
        conversation_id: ConversationId,
        f: impl FnOnce(&mut ConversationData) -> R,
    ) -> R {
        let mut conversations = self.conversations.lock().await;
        let data = conversations
            .entry(conversation_id)
            .or_insert_with(|| fresh_conversation(conversation_id));
        f(data)
    }
}

fn fresh_conversation(conversation_id: ConversationId) -> ConversationData {
    ConversationData {
        id: conversation_id,
        status: Some(ConversationStatus::Open),
        priority: Some(Priority::None),
        ..Default::default()
    }
}

#[async_trait]
impl PluginAdapter for MockChatwoot {
    fn name(&self) -> &str {
        "mock-chatwoot"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Conversation
    }

    async fn health_check(&self) -> Result<HealthStatus, BridgeError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[async_trait]
impl ConversationGateway for MockChatwoot {
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &str,
        private: bool,
    ) -> Result<(), BridgeError> {
        self.check_fault("send_message").await?;
        if message.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("message content must not be empty".into()));
        }
        self.record(ChatwootCall::SendMessage {
            conversation_id,
            content: message.to_string(),
            private,
        })
        .await;
        Ok(())
    }

    async fn update_conversation_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), BridgeError> {
        if let Some(policy) = &self.policy {
            policy.check(status)?;
        }
        self.check_fault("update_conversation_status").await?;
        self.with_conversation(conversation_id, |data| data.status = Some(status))
            .await;
        self.record(ChatwootCall::UpdateStatus {
            conversation_id,
            status,
        })
        .await;
        Ok(())
    }

    async fn add_labels(
        &self,
        conversation_id: ConversationId,
        labels: &BTreeSet<String>,
    ) -> Result<(), BridgeError> {
        self.check_fault("add_labels").await?;
        self.with_conversation(conversation_id, |data| {
            data.labels.extend(labels.iter().cloned())
        })
        .await;
        self.record(ChatwootCall::AddLabels {
            conversation_id,
            labels: labels.clone(),
        })
        .await;
        Ok(())
    }

    async fn assign_conversation(
        &self,
        conversation_id: ConversationId,
        assignee: Assignee,
    ) -> Result<(), BridgeError> {
        self.check_fault("assign_conversation").await?;
        self.with_conversation(conversation_id, |data| match assignee {
            Assignee::Agent(id) => data.assignee_id = Some(id),
            Assignee::Team(id) => data.team_id = Some(id),
        })
        .await;
        self.record(ChatwootCall::Assign {
            conversation_id,
            assignee,
        })
        .await;
        Ok(())
    }

    async fn update_custom_attributes(
        &self,
        conversation_id: ConversationId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError> {
        self.check_fault("update_custom_attributes").await?;
        self.with_conversation(conversation_id, |data| {
            for (key, value) in attributes {
                data.custom_attributes
                    .insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        })
        .await;
        self.record(ChatwootCall::UpdateCustomAttributes {
            conversation_id,
            attributes: attributes.clone(),
        })
        .await;
        Ok(())
    }

    async fn toggle_priority(
        &self,
        conversation_id: ConversationId,
        priority: Priority,
    ) -> Result<(), BridgeError> {
        self.check_fault("toggle_priority").await?;
        self.with_conversation(conversation_id, |data| data.priority = Some(priority))
            .await;
        self.record(ChatwootCall::TogglePriority {
            conversation_id,
            priority,
        })
        .await;
        Ok(())
    }

    async fn get_conversation_data(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationData, BridgeError> {
        self.check_fault("get_conversation_data").await?;
        let data = self.with_conversation(conversation_id, |data| data.clone()).await;
        self.record(ChatwootCall::GetConversation { conversation_id })
            .await;
        Ok(data)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<ContextMessage>, BridgeError> {
        self.check_fault("list_messages").await?;
        let messages = self
            .messages
            .lock()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        self.record(ChatwootCall::ListMessages { conversation_id })
            .await;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn get_teams(&self) -> Result<Vec<Team>, BridgeError> {
        self.check_fault("get_teams").await?;
        let teams = self.teams.lock().await.clone();
        self.record(ChatwootCall::GetTeams).await;
        Ok(teams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn labels_accumulate_on_the_mock_conversation() {
        let chatwoot = MockChatwoot::new();
        chatwoot
            .add_labels(1, &BTreeSet::from(["billing".to_string()]))
            .await
            .unwrap();
        chatwoot
            .add_labels(1, &BTreeSet::from(["vip".to_string()]))
            .await
            .unwrap();
        let labels = chatwoot.conversation(1).await.labels;
        assert_eq!(labels.len(), 2);
        assert_eq!(chatwoot.call_count("add_labels").await, 2);
    }

    #[tokio::test]
    async fn counted_faults_run_out() {
        let chatwoot = MockChatwoot::new();
        chatwoot
            .fail_next("send_message", Fault::Gateway(GatewayErrorKind::ServiceError), 2)
            .await;

        assert!(chatwoot.send_message(1, "a", false).await.is_err());
        assert!(chatwoot.send_message(1, "b", false).await.is_err());
        chatwoot.send_message(1, "c", false).await.unwrap();

        assert_eq!(chatwoot.sent_messages(1).await, vec!["c".to_string()]);
        assert_eq!(chatwoot.attempt_count("send_message").await, 3);
    }

    #[tokio::test]
    async fn policy_rejects_before_any_request() {
        let chatwoot = MockChatwoot::new().with_policy(StatusPolicy::default());
        let err = chatwoot
            .update_conversation_status(1, ConversationStatus::Resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PolicyRejected(_)));
        assert_eq!(chatwoot.attempt_count("update_conversation_status").await, 0);
    }

    #[tokio::test]
    async fn list_messages_keeps_the_newest() {
        let chatwoot = MockChatwoot::new();
        let history = (0..5)
            .map(|i| ContextMessage {
                direction: chatdify_core::MessageDirection::Incoming,
                content: format!("m{i}"),
            })
            .collect();
        chatwoot.set_messages(3, history).await;
        let recent = chatwoot.list_messages(3, 2).await.unwrap();
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }
}
