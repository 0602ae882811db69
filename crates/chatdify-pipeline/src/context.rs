// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembly of the context handed to the completion provider.

use chatdify_core::{
    BridgeError, ConversationContext, ConversationData, ConversationGateway, ConversationState,
    InboundEvent, MessageDirection,
};
use tracing::debug;

/// Read the conversation and its recent history from Chatwoot.
///
/// The triggering message is usually already the newest entry of the
/// history; it is dropped there because it travels as the query.
pub async fn assemble(
    gateway: &dyn ConversationGateway,
    event: &InboundEvent,
    state: &ConversationState,
    history_limit: usize,
) -> Result<(ConversationContext, ConversationData), BridgeError> {
    let data = gateway.get_conversation_data(event.conversation_id).await?;
    let direction = event.direction.unwrap_or(MessageDirection::Incoming);

    let mut history = if history_limit == 0 {
        Vec::new()
    } else {
        gateway
            .list_messages(event.conversation_id, history_limit + 1)
            .await?
    };
    if history
        .last()
        .is_some_and(|m| m.direction == direction && m.content == event.message_text)
    {
        history.pop();
    }
    let skip = history.len().saturating_sub(history_limit);
    let history: Vec<_> = history.into_iter().skip(skip).collect();

    debug!(
        conversation_id = event.conversation_id,
        history = history.len(),
        "context assembled"
    );

    let context = ConversationContext {
        conversation_id: event.conversation_id,
        message_text: event.message_text.clone(),
        direction,
        status: data.status.or(Some(state.status)),
        labels: data.labels.clone(),
        custom_attributes: data.custom_attributes.clone(),
        history,
        dify_conversation_id: state.dify_conversation_id.clone(),
    };
    Ok((context, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdify_core::{ContextMessage, ConversationStatus, EventType, Priority};
    use chatdify_test_utils::MockChatwoot;
    use chrono::Utc;

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            event_id: "message:1".into(),
            conversation_id: 5,
            message_text: text.into(),
            event_type: EventType::MessageCreated,
            received_at: Utc::now(),
            source_event: "message_created".into(),
            direction: Some(MessageDirection::Incoming),
            conversation_status: None,
        }
    }

    fn state() -> ConversationState {
        ConversationState {
            conversation_id: 5,
            last_processed_event_id: None,
            status: ConversationStatus::Pending,
            priority: Priority::None,
            pending_ai_request_id: None,
            lease_expires_at: None,
            dify_conversation_id: Some("dify-5".into()),
            assignee_id: None,
            updated_at: String::new(),
        }
    }

    fn incoming(content: &str) -> ContextMessage {
        ContextMessage {
            direction: MessageDirection::Incoming,
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn history_is_capped_after_dropping_the_trigger() {
        let chatwoot = MockChatwoot::new();
        chatwoot
            .set_messages(5, vec![incoming("a"), incoming("b"), incoming("c"), incoming("now")])
            .await;

        let (context, _) = assemble(&chatwoot, &event("now"), &state(), 2).await.unwrap();
        assert_eq!(context.history, vec![incoming("b"), incoming("c")]);
        assert_eq!(context.dify_conversation_id.as_deref(), Some("dify-5"));
        assert_eq!(context.status, Some(ConversationStatus::Open));
    }

    #[tokio::test]
    async fn zero_limit_skips_the_history_call() {
        let chatwoot = MockChatwoot::new();
        let (context, _) = assemble(&chatwoot, &event("hi"), &state(), 0).await.unwrap();
        assert!(context.history.is_empty());
        assert_eq!(chatwoot.call_count("list_messages").await, 0);
    }
}
