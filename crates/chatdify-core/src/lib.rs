// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Chatwoot/Dify bridge.
//!
//! Provides the error taxonomy, domain types, the conversation status
//! transition table, and the adapter traits every other crate implements or
//! consumes.

pub mod error;
pub mod status;
pub mod task;
pub mod traits;
pub mod types;

pub use error::{BridgeError, ErrorClass, GatewayErrorKind, Service};
pub use status::{is_allowed_transition, StatusPolicy, ALLOWED_TRANSITIONS};
pub use task::{FailOutcome, QueueStats, QueuedTask, TaskId, TaskRecord, TaskRequest, TaskStatus};
pub use types::{
    AIResponse, AdapterType, Assignee, ContextMessage, ConversationContext, ConversationData,
    ConversationId, ConversationState, ConversationStatus, EventType, HealthStatus, InboundEvent,
    MessageDirection, Priority, Team,
};

pub use traits::{
    CompletionProvider, ConversationGateway, ConversationStore, PluginAdapter, StorageAdapter,
    TaskQueue,
};
