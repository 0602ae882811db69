// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Types describing units of work on the durable task queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Queue-assigned task identifier.
pub type TaskId = i64;

/// Lifecycle status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A request to enqueue work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_name: String,
    pub payload: String,
    /// Duplicate keys are refused while the first task exists.
    pub idempotency_key: Option<String>,
    /// Earliest start, relative to now.
    pub delay: Duration,
}

impl TaskRequest {
    pub fn new(task_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            payload: payload.into(),
            idempotency_key: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A task claimed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: TaskId,
    pub task_name: String,
    pub payload: String,
    /// Failed attempts so far (not counting the current one).
    pub attempts: u32,
    /// Times the task was pushed back because of a lease conflict.
    pub deferrals: u32,
    pub max_attempts: u32,
}

/// What `fail` did with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, will run again after the retry delay.
    Retrying { attempts: u32 },
    /// Terminally failed; surfaces for manual follow-up.
    Dead { attempts: u32 },
}

/// Stored view of a task, for inspection and the result store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_name: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub deferrals: u32,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub updated_at: String,
}

/// Counts of tasks by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}
