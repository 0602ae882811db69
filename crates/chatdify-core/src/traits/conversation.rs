// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation platform capability (Chatwoot).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Assignee, ContextMessage, ConversationData, ConversationId, ConversationStatus, Priority, Team,
};

/// Typed read/write operations against one conversation platform account.
///
/// Every mutation is independent and individually retryable; ordering
/// between them is the caller's concern.
#[async_trait]
pub trait ConversationGateway: PluginAdapter {
    /// Post a message to the conversation. Private messages are internal notes.
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        message: &str,
        private: bool,
    ) -> Result<(), BridgeError>;

    /// Set the conversation status. Statuses outside the configured allowlist
    /// fail with [`BridgeError::PolicyRejected`] before any request is sent.
    async fn update_conversation_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), BridgeError>;

    /// Add labels, keeping every label already present.
    async fn add_labels(
        &self,
        conversation_id: ConversationId,
        labels: &BTreeSet<String>,
    ) -> Result<(), BridgeError>;

    /// Assign the conversation to an agent or a team.
    async fn assign_conversation(
        &self,
        conversation_id: ConversationId,
        assignee: Assignee,
    ) -> Result<(), BridgeError>;

    /// Merge custom attributes into the existing set.
    async fn update_custom_attributes(
        &self,
        conversation_id: ConversationId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError>;

    async fn toggle_priority(
        &self,
        conversation_id: ConversationId,
        priority: Priority,
    ) -> Result<(), BridgeError>;

    async fn get_conversation_data(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationData, BridgeError>;

    /// Most recent public messages, oldest first.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<ContextMessage>, BridgeError>;

    async fn get_teams(&self) -> Result<Vec<Team>, BridgeError>;
}
