// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! AI completion capability (Dify).

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{AIResponse, ConversationContext};

/// Produces an [`AIResponse`] for an assembled conversation context.
#[async_trait]
pub trait CompletionProvider: PluginAdapter {
    /// Request a completion in blocking mode.
    async fn complete(&self, context: &ConversationContext) -> Result<AIResponse, BridgeError>;

    /// Drop the backend's memory of a conversation.
    async fn delete_conversation(&self, backend_conversation_id: &str) -> Result<(), BridgeError>;
}
