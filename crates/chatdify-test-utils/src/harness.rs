// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the full bridge with mock Chatwoot and Dify
//! adapters over a temp SQLite database. Webhooks go in through
//! [`TestHarness::submit`] and queued work runs with [`TestHarness::drain`].

use std::sync::Arc;

use chatdify_config::model::{ChatdifyConfig, StorageConfig};
use chatdify_core::{BridgeError, ConversationState, ConversationStore, StorageAdapter, TaskQueue};
use chatdify_pipeline::{
    ActionService, DispatchPipeline, Dispatcher, EventNormalizer, SubmitOutcome, TaskDisposition,
    TaskExecutor, WorkerSettings,
};
use chatdify_storage::SqliteStorage;
use serde_json::Value;

use crate::mock_chatwoot::MockChatwoot;
use crate::mock_dify::MockDify;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: ChatdifyConfig,
    replies: Vec<String>,
    enforce_policy: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: test_config(),
            replies: Vec::new(),
            enforce_policy: true,
        }
    }

    /// Adjust the configuration before the stack is built.
    pub fn with_config(mut self, adjust: impl FnOnce(&mut ChatdifyConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    /// Set mock Dify replies, served in order.
    pub fn with_mock_replies(mut self, replies: Vec<String>) -> Self {
        self.replies = replies;
        self
    }

    /// Let the mock gateway accept any status, like a Chatwoot without a
    /// bridge-side policy in front of it.
    pub fn without_gateway_policy(mut self) -> Self {
        self.enforce_policy = false;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, BridgeError> {
        let temp_dir = tempfile::TempDir::new().map_err(BridgeError::storage)?;
        let db_path = temp_dir.path().join("chatdify-test.db");

        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };

        let storage = SqliteStorage::new(config.storage.clone())
            .with_max_attempts(config.queue.max_attempts);
        storage.initialize().await?;
        let storage = Arc::new(storage);

        let chatwoot = if self.enforce_policy {
            MockChatwoot::new().with_policy(config.policy.status_policy())
        } else {
            MockChatwoot::new()
        };
        let chatwoot = Arc::new(chatwoot);

        let dify = Arc::new(MockDify::new());
        for reply in self.replies {
            dify.push_reply(reply).await;
        }

        let pipeline = Arc::new(DispatchPipeline::new(
            &config,
            storage.clone(),
            chatwoot.clone(),
            dify.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            EventNormalizer::new(&config.pipeline),
            storage.clone(),
            storage.clone(),
        ));
        let executor = Arc::new(TaskExecutor::new(
            pipeline.clone(),
            storage.clone(),
            WorkerSettings::from_config(&config.queue),
        ));
        let actions = Arc::new(ActionService::new(
            chatwoot.clone(),
            storage.clone(),
            pipeline.teams().clone(),
            config.policy.status_policy(),
            config.policy.notify_on_rejection,
        ));

        Ok(TestHarness {
            chatwoot,
            dify,
            storage,
            pipeline,
            dispatcher,
            executor,
            actions,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete bridge with mock adapters and temp storage.
pub struct TestHarness {
    pub chatwoot: Arc<MockChatwoot>,
    pub dify: Arc<MockDify>,
    /// SQLite storage (temp DB, cleaned up on drop).
    pub storage: Arc<SqliteStorage>,
    pub pipeline: Arc<DispatchPipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub executor: Arc<TaskExecutor>,
    pub actions: Arc<ActionService>,
    pub config: ChatdifyConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Create a harness with default test settings.
    pub async fn new() -> Result<Self, BridgeError> {
        Self::builder().build().await
    }

    /// Deliver a webhook payload as the HTTP handler would.
    pub async fn submit(&self, payload: Value) -> Result<SubmitOutcome, BridgeError> {
        self.dispatcher.submit(&payload).await
    }

    /// Run every due task, including retries that became due immediately.
    pub async fn drain(&self) -> Result<Vec<TaskDisposition>, BridgeError> {
        self.executor.drain().await
    }

    /// Submit a payload and run the queue dry.
    pub async fn deliver(&self, payload: Value) -> Result<Vec<TaskDisposition>, BridgeError> {
        self.submit(payload).await?;
        self.drain().await
    }

    pub async fn state(&self, conversation_id: i64) -> Result<ConversationState, BridgeError> {
        self.storage.get_or_create(conversation_id).await
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        self.storage.clone()
    }
}

/// Defaults tuned for tests: no backoff waits and a team to escalate to.
fn test_config() -> ChatdifyConfig {
    let mut config = ChatdifyConfig::default();
    config.queue.base_delay_ms = 0;
    config.queue.max_delay_ms = 0;
    config.queue.lease_conflict_delay_ms = 0;
    config.queue.poll_interval_ms = 10;
    config.pipeline.mutation_base_delay_ms = 0;
    config.pipeline.escalation_team_id = Some(1);
    config
}

/// Webhook payload builders in Chatwoot's shape.
pub mod payloads {
    use serde_json::{json, Value};

    /// An incoming customer message.
    pub fn message_created(conversation_id: i64, message_id: i64, content: &str) -> Value {
        json!({
            "event": "message_created",
            "id": message_id,
            "content": content,
            "message_type": "incoming",
            "private": false,
            "sender": { "id": 900, "type": "contact" },
            "conversation": { "id": conversation_id, "status": "open" },
        })
    }

    /// An agent reply.
    pub fn outgoing_message(conversation_id: i64, message_id: i64, content: &str) -> Value {
        json!({
            "event": "message_created",
            "id": message_id,
            "content": content,
            "message_type": "outgoing",
            "private": false,
            "sender": { "id": 3, "type": "user" },
            "conversation": { "id": conversation_id, "status": "open" },
        })
    }

    pub fn status_changed(conversation_id: i64, status: &str) -> Value {
        json!({
            "event": "conversation_status_changed",
            "id": conversation_id,
            "status": status,
        })
    }

    pub fn conversation_deleted(conversation_id: i64) -> Value {
        json!({
            "event": "conversation_deleted",
            "id": conversation_id,
        })
    }
}
