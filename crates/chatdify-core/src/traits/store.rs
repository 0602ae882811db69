// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation state store and storage lifecycle traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BridgeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ConversationId, ConversationState, ConversationStatus, Priority};

/// Storage backend lifecycle.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Open connections and apply migrations.
    async fn initialize(&self) -> Result<(), BridgeError>;

    /// Flush and close.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// Durable per-conversation state.
///
/// Every mutating operation is a single atomic conditional update; callers
/// never read-then-write.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn get_or_create(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationState, BridgeError>;

    async fn get(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationState>, BridgeError>;

    /// Take the AI lease if none is held or the held one has expired.
    async fn try_begin_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
        lease_duration: Duration,
    ) -> Result<bool, BridgeError>;

    /// Extend the lease if `request_token` still holds it.
    async fn renew_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
        lease_duration: Duration,
    ) -> Result<bool, BridgeError>;

    /// Release the lease if `request_token` still holds it.
    async fn complete_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
    ) -> Result<bool, BridgeError>;

    async fn record_processed(
        &self,
        conversation_id: ConversationId,
        event_id: &str,
    ) -> Result<(), BridgeError>;

    async fn was_processed(
        &self,
        conversation_id: ConversationId,
        event_id: &str,
    ) -> Result<bool, BridgeError>;

    /// Apply a bridge-initiated status change along an allowed edge only.
    async fn update_status(
        &self,
        conversation_id: ConversationId,
        new_status: ConversationStatus,
    ) -> Result<bool, BridgeError>;

    /// Overwrite the cached status with the platform's authoritative value.
    async fn reconcile_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), BridgeError>;

    async fn update_priority(
        &self,
        conversation_id: ConversationId,
        priority: Priority,
    ) -> Result<(), BridgeError>;

    async fn set_assignee(
        &self,
        conversation_id: ConversationId,
        assignee_id: Option<i64>,
    ) -> Result<(), BridgeError>;

    /// Claim the right to write content for an event received at `received_at`.
    /// Returns false when content from a later event has already been applied.
    async fn claim_content_slot(
        &self,
        conversation_id: ConversationId,
        received_at: DateTime<Utc>,
    ) -> Result<bool, BridgeError>;

    async fn set_dify_conversation_id(
        &self,
        conversation_id: ConversationId,
        dify_conversation_id: Option<&str>,
    ) -> Result<(), BridgeError>;
}
