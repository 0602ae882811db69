// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! External systems extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod completion;
pub mod conversation;
pub mod queue;
pub mod store;

pub use adapter::PluginAdapter;
pub use completion::CompletionProvider;
pub use conversation::ConversationGateway;
pub use queue::TaskQueue;
pub use store::{ConversationStore, StorageAdapter};
