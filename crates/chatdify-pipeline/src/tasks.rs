// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task payloads exchanged through the durable queue.

use std::time::Duration;

use chatdify_core::{BridgeError, ConversationId, InboundEvent, TaskRequest};
use serde::{Deserialize, Serialize};

/// Runs the dispatch pipeline for one event.
pub const PROCESS_EVENT: &str = "process_event";
/// Drops the Dify-side memory of a deleted Chatwoot conversation.
pub const DELETE_DIFY_CONVERSATION: &str = "delete_dify_conversation";

/// A unit of work the workers know how to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum BridgeTask {
    ProcessEvent {
        event: InboundEvent,
    },
    DeleteDifyConversation {
        conversation_id: ConversationId,
        dify_conversation_id: String,
    },
}

impl BridgeTask {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeTask::ProcessEvent { .. } => PROCESS_EVENT,
            BridgeTask::DeleteDifyConversation { .. } => DELETE_DIFY_CONVERSATION,
        }
    }

    /// Queue idempotency key. Redelivered webhooks collapse onto one task.
    pub fn idempotency_key(&self) -> String {
        match self {
            BridgeTask::ProcessEvent { event } => event.idempotency_key(),
            BridgeTask::DeleteDifyConversation {
                dify_conversation_id,
                ..
            } => format!("delete-dify:{dify_conversation_id}"),
        }
    }

    pub fn to_request(&self, delay: Duration) -> Result<TaskRequest, BridgeError> {
        let payload = serde_json::to_string(self)
            .map_err(|e| BridgeError::Internal(format!("failed to encode task payload: {e}")))?;
        Ok(TaskRequest::new(self.name(), payload)
            .with_idempotency_key(self.idempotency_key())
            .with_delay(delay))
    }

    /// Decode a stored payload. A payload that no longer decodes can never
    /// succeed, so this is a validation error.
    pub fn from_payload(payload: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(payload)
            .map_err(|e| BridgeError::Validation(format!("undecodable task payload: {e}")))
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            BridgeTask::ProcessEvent { event } => event.conversation_id,
            BridgeTask::DeleteDifyConversation {
                conversation_id, ..
            } => *conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_core::{EventType, MessageDirection};
    use chrono::Utc;

    fn event() -> InboundEvent {
        InboundEvent {
            event_id: "message:7".into(),
            conversation_id: 20,
            message_text: "hi".into(),
            event_type: EventType::MessageCreated,
            received_at: Utc::now(),
            source_event: "message_created".into(),
            direction: Some(MessageDirection::Incoming),
            conversation_status: None,
        }
    }

    #[test]
    fn process_event_request_uses_event_key() {
        let task = BridgeTask::ProcessEvent { event: event() };
        let request = task.to_request(Duration::ZERO).unwrap();
        assert_eq!(request.task_name, PROCESS_EVENT);
        assert_eq!(
            request.idempotency_key.as_deref(),
            Some("20:message_created:message:7")
        );
        assert_eq!(BridgeTask::from_payload(&request.payload).unwrap(), task);
    }

    #[test]
    fn garbage_payload_is_validation_error() {
        let err = BridgeTask::from_payload("{\"task\":\"nope\"}").unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(!err.is_retryable());
    }
}
