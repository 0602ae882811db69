// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the bridge.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::BridgeError;

/// Chatwoot conversation identifier.
pub type ConversationId = i64;

/// The type of an adapter plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum AdapterType {
    /// Conversation platform (Chatwoot).
    Conversation,
    /// AI completion backend (Dify).
    Completion,
    /// Persistence backend.
    Storage,
}

/// Health status of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Kind of inbound event after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageCreated,
    ConversationStatusChanged,
    Other,
}

/// Direction of a message relative to the support team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

/// Canonical representation of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Identifier assigned by the source platform. Repeats across redeliveries.
    pub event_id: String,
    pub conversation_id: ConversationId,
    /// Message body, empty for status-only events.
    pub message_text: String,
    pub event_type: EventType,
    pub received_at: DateTime<Utc>,
    /// Event name as sent by the platform (e.g. `conversation_deleted`).
    pub source_event: String,
    pub direction: Option<MessageDirection>,
    /// Conversation status carried by the payload, used to refresh the cache.
    pub conversation_status: Option<ConversationStatus>,
}

impl InboundEvent {
    /// The idempotency key: `event_id` + `conversation_id` + `event_type`.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.conversation_id, self.event_type, self.event_id
        )
    }
}

/// Chatwoot conversation status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Pending,
    Resolved,
    Snoozed,
}

impl ConversationStatus {
    pub const ALL: [ConversationStatus; 4] = [
        ConversationStatus::Open,
        ConversationStatus::Pending,
        ConversationStatus::Resolved,
        ConversationStatus::Snoozed,
    ];

    /// Parse a raw status string, rejecting anything outside the enumerated set.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        ConversationStatus::from_str(raw.trim().to_ascii_lowercase().as_str())
            .map_err(|_| BridgeError::InvalidArgument(format!("unknown conversation status `{raw}`")))
    }
}

/// Conversation priority as understood by Chatwoot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Parse a raw priority string.
    ///
    /// Anything outside `{none, low, medium, high, urgent}` is an
    /// [`BridgeError::InvalidArgument`].
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        Priority::from_str(raw.trim().to_ascii_lowercase().as_str())
            .map_err(|_| BridgeError::InvalidArgument(format!("unknown priority `{raw}`")))
    }
}

/// Per-conversation processing state: the durable anchor for idempotency,
/// the AI lease, and the status cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub last_processed_event_id: Option<String>,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub pending_ai_request_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub dify_conversation_id: Option<String>,
    pub assignee_id: Option<i64>,
    pub updated_at: String,
}

/// Result of one AI invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AIResponse {
    pub reply_text: String,
    pub suggested_labels: BTreeSet<String>,
    pub suggested_priority: Option<Priority>,
    pub custom_attributes: BTreeMap<String, String>,
    /// Do not auto-reply; route to a human instead.
    pub escalate: bool,
    /// Dify-side conversation id to reuse on the next turn.
    pub dify_conversation_id: Option<String>,
}

/// One message of recent history passed to the AI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub direction: MessageDirection,
    pub content: String,
}

/// Snapshot of a conversation as reported by Chatwoot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationData {
    pub id: ConversationId,
    pub status: Option<ConversationStatus>,
    pub priority: Option<Priority>,
    pub labels: BTreeSet<String>,
    pub custom_attributes: BTreeMap<String, serde_json::Value>,
    pub assignee_id: Option<i64>,
    pub team_id: Option<i64>,
}

/// Everything the AI needs to answer one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: ConversationId,
    pub message_text: String,
    pub direction: MessageDirection,
    pub status: Option<ConversationStatus>,
    pub labels: BTreeSet<String>,
    pub custom_attributes: BTreeMap<String, serde_json::Value>,
    pub history: Vec<ContextMessage>,
    pub dify_conversation_id: Option<String>,
}

/// A Chatwoot team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

/// Target of a conversation assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    Agent(i64),
    Team(i64),
}

impl std::fmt::Display for Assignee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assignee::Agent(id) => write!(f, "agent:{id}"),
            Assignee::Team(id) => write!(f, "team:{id}"),
        }
    }
}
