// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the storage, state store, and queue traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use chatdify_config::model::StorageConfig;
use chatdify_core::{
    AdapterType, BridgeError, ConversationId, ConversationState, ConversationStatus,
    ConversationStore, FailOutcome, HealthStatus, PluginAdapter, Priority, QueueStats, QueuedTask,
    StorageAdapter, TaskId, TaskQueue, TaskRecord, TaskRequest,
};

use crate::database::Database;
use crate::queries::{conversations, tasks};

/// SQLite-backed storage adapter.
///
/// One instance serves both the conversation state store and the task
/// queue. The database is opened by [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    max_attempts: u32,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage; the connection opens on `initialize`.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            max_attempts: 3,
            db: OnceCell::new(),
        }
    }

    /// Attempt budget stamped onto newly enqueued tasks.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn db(&self) -> Result<&Database, BridgeError> {
        self.db
            .get()
            .ok_or_else(|| BridgeError::storage("storage not initialized -- call initialize() first"))
    }

    async fn checkpoint(&self) -> Result<(), BridgeError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                })
                .await
                .map_err(crate::database::map_tr_err)?;
            debug!("WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, BridgeError> {
        let Some(db) = self.db.get() else {
            return Ok(HealthStatus::Unhealthy("not initialized".into()));
        };
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch("SELECT 1;") })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), BridgeError> {
        self.checkpoint().await
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), BridgeError> {
        let db = Database::open_with_wal(&self.config.database_path, self.config.wal_mode).await?;
        self.db
            .set(db)
            .map_err(|_| BridgeError::storage("storage already initialized"))?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.db()?;
        self.checkpoint().await
    }
}

#[async_trait]
impl ConversationStore for SqliteStorage {
    async fn get_or_create(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationState, BridgeError> {
        conversations::get_or_create(self.db()?, conversation_id).await
    }

    async fn get(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationState>, BridgeError> {
        conversations::get(self.db()?, conversation_id).await
    }

    async fn try_begin_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
        lease_duration: Duration,
    ) -> Result<bool, BridgeError> {
        conversations::try_begin_ai_request(self.db()?, conversation_id, request_token, lease_duration)
            .await
    }

    async fn renew_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
        lease_duration: Duration,
    ) -> Result<bool, BridgeError> {
        conversations::renew_ai_request(self.db()?, conversation_id, request_token, lease_duration)
            .await
    }

    async fn complete_ai_request(
        &self,
        conversation_id: ConversationId,
        request_token: &str,
    ) -> Result<bool, BridgeError> {
        conversations::complete_ai_request(self.db()?, conversation_id, request_token).await
    }

    async fn record_processed(
        &self,
        conversation_id: ConversationId,
        event_id: &str,
    ) -> Result<(), BridgeError> {
        conversations::record_processed(self.db()?, conversation_id, event_id).await
    }

    async fn was_processed(
        &self,
        conversation_id: ConversationId,
        event_id: &str,
    ) -> Result<bool, BridgeError> {
        conversations::was_processed(self.db()?, conversation_id, event_id).await
    }

    async fn update_status(
        &self,
        conversation_id: ConversationId,
        new_status: ConversationStatus,
    ) -> Result<bool, BridgeError> {
        conversations::update_status(self.db()?, conversation_id, new_status).await
    }

    async fn reconcile_status(
        &self,
        conversation_id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), BridgeError> {
        conversations::reconcile_status(self.db()?, conversation_id, status).await
    }

    async fn update_priority(
        &self,
        conversation_id: ConversationId,
        priority: Priority,
    ) -> Result<(), BridgeError> {
        conversations::update_priority(self.db()?, conversation_id, priority).await
    }

    async fn set_assignee(
        &self,
        conversation_id: ConversationId,
        assignee_id: Option<i64>,
    ) -> Result<(), BridgeError> {
        conversations::set_assignee(self.db()?, conversation_id, assignee_id).await
    }

    async fn claim_content_slot(
        &self,
        conversation_id: ConversationId,
        received_at: DateTime<Utc>,
    ) -> Result<bool, BridgeError> {
        conversations::claim_content_slot(self.db()?, conversation_id, received_at).await
    }

    async fn set_dify_conversation_id(
        &self,
        conversation_id: ConversationId,
        dify_conversation_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        conversations::set_dify_conversation_id(self.db()?, conversation_id, dify_conversation_id)
            .await
    }
}

#[async_trait]
impl TaskQueue for SqliteStorage {
    async fn enqueue(&self, request: TaskRequest) -> Result<Option<TaskId>, BridgeError> {
        tasks::enqueue(self.db()?, request, self.max_attempts).await
    }

    async fn dequeue(&self, lock_for: Duration) -> Result<Option<QueuedTask>, BridgeError> {
        tasks::dequeue(self.db()?, lock_for).await
    }

    async fn complete(&self, task_id: TaskId, result: Option<&str>) -> Result<(), BridgeError> {
        tasks::complete(self.db()?, task_id, result).await
    }

    async fn fail(
        &self,
        task_id: TaskId,
        reason: &str,
        retry_after: Option<Duration>,
    ) -> Result<FailOutcome, BridgeError> {
        tasks::fail(self.db()?, task_id, reason, retry_after).await
    }

    async fn defer(&self, task_id: TaskId, delay: Duration) -> Result<(), BridgeError> {
        tasks::defer(self.db()?, task_id, delay).await
    }

    async fn reclaim_expired(&self) -> Result<usize, BridgeError> {
        tasks::reclaim_expired(self.db()?).await
    }

    async fn stats(&self) -> Result<QueueStats, BridgeError> {
        tasks::stats(self.db()?).await
    }

    async fn task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, BridgeError> {
        tasks::task(self.db()?, task_id).await
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<TaskRecord>, BridgeError> {
        tasks::recent_failures(self.db()?, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let storage = SqliteStorage::new(make_config("/unused.db"));
        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn operations_before_initialize_are_storage_errors() {
        let storage = SqliteStorage::new(make_config("/unused.db"));
        let err = storage.get_or_create(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Storage { .. }));
        assert!(err.is_retryable());
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn trait_objects_share_one_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("shared.db");
        let storage = std::sync::Arc::new(
            SqliteStorage::new(make_config(db_path.to_str().unwrap())).with_max_attempts(5),
        );
        storage.initialize().await.unwrap();

        let store: std::sync::Arc<dyn ConversationStore> = storage.clone();
        let queue: std::sync::Arc<dyn TaskQueue> = storage.clone();

        store.record_processed(11, "evt").await.unwrap();
        assert!(store.was_processed(11, "evt").await.unwrap());

        queue.enqueue(TaskRequest::new("t", "{}")).await.unwrap();
        let claimed = queue.dequeue(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(claimed.max_attempts, 5);

        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        storage.close().await.unwrap();
    }
}
