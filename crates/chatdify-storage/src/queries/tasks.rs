// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable task queue operations.

use std::time::Duration;

use chatdify_core::{
    BridgeError, FailOutcome, QueueStats, QueuedTask, TaskId, TaskRecord, TaskRequest, TaskStatus,
};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::database::{map_tr_err, millis_after, now_millis, Database};

const SELECT_RECORD: &str = "SELECT id, task_name, status, attempts, deferrals, last_error, result,
        updated_at FROM tasks";

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<TaskRecord, rusqlite::Error> {
    let status: String = row.get(2)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        task_name: row.get(1)?,
        status: status.parse::<TaskStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        attempts: row.get(3)?,
        deferrals: row.get(4)?,
        last_error: row.get(5)?,
        result: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Enqueue a task. Returns `None` if the idempotency key is already taken.
pub async fn enqueue(
    db: &Database,
    request: TaskRequest,
    max_attempts: u32,
) -> Result<Option<TaskId>, BridgeError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO tasks (task_name, payload, idempotency_key, max_attempts, run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (idempotency_key) DO NOTHING",
                params![
                    request.task_name,
                    request.payload,
                    request.idempotency_key,
                    max_attempts,
                    millis_after(request.delay),
                ],
            )?;
            Ok((changed == 1).then(|| conn.last_insert_rowid()))
        })
        .await
        .map_err(map_tr_err)
}

/// Claim the oldest due pending task and lock it for `lock_for`.
pub async fn dequeue(db: &Database, lock_for: Duration) -> Result<Option<QueuedTask>, BridgeError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_millis();

            let task = tx
                .query_row(
                    "SELECT id, task_name, payload, attempts, deferrals, max_attempts
                     FROM tasks
                     WHERE status = 'pending' AND run_at <= ?1
                     ORDER BY run_at ASC, id ASC
                     LIMIT 1",
                    params![now],
                    |row| {
                        Ok(QueuedTask {
                            id: row.get(0)?,
                            task_name: row.get(1)?,
                            payload: row.get(2)?,
                            attempts: row.get(3)?,
                            deferrals: row.get(4)?,
                            max_attempts: row.get(5)?,
                        })
                    },
                )
                .optional()?;

            if let Some(task) = &task {
                tx.execute(
                    "UPDATE tasks SET status = 'processing', locked_until = ?2,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1 AND status = 'pending'",
                    params![task.id, millis_after(lock_for)],
                )?;
            }
            tx.commit()?;
            Ok(task)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a task completed and store its result.
pub async fn complete(
    db: &Database,
    task_id: TaskId,
    result: Option<&str>,
) -> Result<(), BridgeError> {
    let result = result.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = 'completed', result = ?2, locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![task_id, result],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed attempt.
///
/// With `retry_after` set and attempts remaining, the task goes back to
/// pending, due after the delay. Otherwise it is failed for good.
pub async fn fail(
    db: &Database,
    task_id: TaskId,
    reason: &str,
    retry_after: Option<Duration>,
) -> Result<FailOutcome, BridgeError> {
    let reason = reason.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let (attempts, max_attempts): (u32, u32) = tx.query_row(
                "SELECT attempts, max_attempts FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let attempts = attempts + 1;
            let outcome = match retry_after {
                Some(delay) if attempts < max_attempts => {
                    tx.execute(
                        "UPDATE tasks SET status = 'pending', attempts = ?2, last_error = ?3,
                         run_at = ?4, locked_until = NULL,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?1",
                        params![task_id, attempts, reason, millis_after(delay)],
                    )?;
                    FailOutcome::Retrying { attempts }
                }
                _ => {
                    tx.execute(
                        "UPDATE tasks SET status = 'failed', attempts = ?2, last_error = ?3,
                         locked_until = NULL,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?1",
                        params![task_id, attempts, reason],
                    )?;
                    FailOutcome::Dead { attempts }
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Push a claimed task back to pending without consuming an attempt.
pub async fn defer(db: &Database, task_id: TaskId, delay: Duration) -> Result<(), BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = 'pending', deferrals = deferrals + 1,
                 run_at = ?2, locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![task_id, millis_after(delay)],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Error recorded on a task whose worker vanished while holding it.
pub const WORKER_LOST: &str = "worker lost while processing";

/// Return tasks whose lock expired (crashed or hung worker) to pending.
///
/// A lost run counts as an attempt, so a task that keeps killing its worker
/// ends up failed once `max_attempts` is reached.
pub async fn reclaim_expired(db: &Database) -> Result<usize, BridgeError> {
    db.connection()
        .call(move |conn| {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let failed = tx.execute(
                "UPDATE tasks SET status = 'failed', attempts = attempts + 1, last_error = ?2,
                 locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'processing' AND locked_until < ?1
                   AND attempts + 1 >= max_attempts",
                params![now, WORKER_LOST],
            )?;
            let requeued = tx.execute(
                "UPDATE tasks SET status = 'pending', attempts = attempts + 1, last_error = ?2,
                 locked_until = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'processing' AND locked_until < ?1",
                params![now, WORKER_LOST],
            )?;
            tx.commit()?;
            Ok(failed + requeued)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn stats(db: &Database) -> Result<QueueStats, BridgeError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row?;
                match status.as_str() {
                    "pending" => stats.pending = count,
                    "processing" => stats.processing = count,
                    "completed" => stats.completed = count,
                    "failed" => stats.failed = count,
                    _ => {}
                }
            }
            Ok(stats)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn task(db: &Database, task_id: TaskId) -> Result<Option<TaskRecord>, BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_RECORD} WHERE id = ?1"),
                params![task_id],
                row_to_record,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Most recently failed tasks, newest first.
pub async fn recent_failures(db: &Database, limit: usize) -> Result<Vec<TaskRecord>, BridgeError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_RECORD} WHERE status = 'failed' ORDER BY updated_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_record)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
