// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Submission side of the task scheduler: webhook payload in, queued task out.

use std::sync::Arc;
use std::time::Duration;

use chatdify_core::{BridgeError, ConversationStore, InboundEvent, TaskId, TaskQueue};
use serde_json::Value;
use tracing::{debug, info};

use crate::normalizer::{EventNormalizer, Normalized, Rejection};
use crate::tasks::BridgeTask;

/// Result of submitting one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued(TaskId),
    /// The same event is already queued or was already handled.
    Duplicate,
    /// The payload was acknowledged but will not be processed.
    Ignored(Rejection),
}

pub struct Dispatcher {
    normalizer: EventNormalizer,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn ConversationStore>,
}

impl Dispatcher {
    pub fn new(
        normalizer: EventNormalizer,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            normalizer,
            queue,
            store,
        }
    }

    /// Normalize and enqueue a raw payload. Only storage failures are errors.
    pub async fn submit(&self, raw: &Value) -> Result<SubmitOutcome, BridgeError> {
        match self.normalizer.normalize(raw) {
            Normalized::Accepted(event) => self.submit_event(event).await,
            Normalized::Rejected(rejection) => {
                debug!(reason = %rejection.reason, detail = %rejection.detail, "webhook ignored");
                Ok(SubmitOutcome::Ignored(rejection))
            }
        }
    }

    /// Enqueue an already normalized event.
    pub async fn submit_event(&self, event: InboundEvent) -> Result<SubmitOutcome, BridgeError> {
        if event.source_event == "conversation_deleted" {
            self.schedule_cleanup(&event).await?;
        }

        let conversation_id = event.conversation_id;
        let event_id = event.event_id.clone();
        let task = BridgeTask::ProcessEvent { event };
        match self.queue.enqueue(task.to_request(Duration::ZERO)?).await? {
            Some(task_id) => {
                info!(conversation_id, event_id = %event_id, task_id, "event enqueued");
                Ok(SubmitOutcome::Enqueued(task_id))
            }
            None => {
                debug!(conversation_id, event_id = %event_id, "duplicate delivery collapsed");
                Ok(SubmitOutcome::Duplicate)
            }
        }
    }

    async fn schedule_cleanup(&self, event: &InboundEvent) -> Result<(), BridgeError> {
        let Some(dify_conversation_id) = self
            .store
            .get(event.conversation_id)
            .await?
            .and_then(|state| state.dify_conversation_id)
        else {
            return Ok(());
        };
        let task = BridgeTask::DeleteDifyConversation {
            conversation_id: event.conversation_id,
            dify_conversation_id,
        };
        if let Some(task_id) = self.queue.enqueue(task.to_request(Duration::ZERO)?).await? {
            info!(conversation_id = event.conversation_id, task_id, "Dify cleanup scheduled");
        }
        Ok(())
    }
}
