// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable task queue with at-least-once delivery.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::task::{FailOutcome, QueueStats, QueuedTask, TaskId, TaskRecord, TaskRequest};

#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Returns `None` when a task with the same idempotency key already exists.
    async fn enqueue(&self, request: TaskRequest) -> Result<Option<TaskId>, BridgeError>;

    /// Claim the oldest due task, locking it for `lock_for`.
    async fn dequeue(&self, lock_for: Duration) -> Result<Option<QueuedTask>, BridgeError>;

    /// Mark a task completed, storing an optional result.
    async fn complete(&self, task_id: TaskId, result: Option<&str>) -> Result<(), BridgeError>;

    /// Record a failed attempt. `retry_after: None` fails the task terminally.
    async fn fail(
        &self,
        task_id: TaskId,
        reason: &str,
        retry_after: Option<Duration>,
    ) -> Result<FailOutcome, BridgeError>;

    /// Put a claimed task back without consuming an attempt.
    async fn defer(&self, task_id: TaskId, delay: Duration) -> Result<(), BridgeError>;

    /// Return tasks whose worker lock expired to pending, charging one
    /// attempt. Tasks out of attempts are failed instead.
    async fn reclaim_expired(&self) -> Result<usize, BridgeError>;

    async fn stats(&self) -> Result<QueueStats, BridgeError>;

    async fn task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, BridgeError>;

    async fn recent_failures(&self, limit: usize) -> Result<Vec<TaskRecord>, BridgeError>;
}
