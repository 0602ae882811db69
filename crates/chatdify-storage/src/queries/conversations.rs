// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation state operations.
//!
//! Each function runs inside one `call` closure on the single writer thread,
//! and every mutation that depends on current state is expressed as a
//! conditional `UPDATE` whose affected-row count is the answer.

use std::str::FromStr;
use std::time::Duration;

use chatdify_core::status::is_allowed_transition;
use chatdify_core::{BridgeError, ConversationId, ConversationState, ConversationStatus, Priority};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::database::{map_tr_err, millis_after, now_millis, Database};

const SELECT_STATE: &str = "SELECT conversation_id, last_processed_event_id, status, priority,
        pending_ai_request_id, lease_expires_at, dify_conversation_id, assignee_id, updated_at
     FROM conversations WHERE conversation_id = ?1";

const ENSURE_ROW: &str = "INSERT OR IGNORE INTO conversations (conversation_id) VALUES (?1)";

fn parse_column<T: FromStr>(idx: usize, raw: String) -> Result<T, rusqlite::Error>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_state(row: &rusqlite::Row<'_>) -> Result<ConversationState, rusqlite::Error> {
    let lease: Option<i64> = row.get(5)?;
    Ok(ConversationState {
        conversation_id: row.get(0)?,
        last_processed_event_id: row.get(1)?,
        status: parse_column(2, row.get(2)?)?,
        priority: parse_column(3, row.get(3)?)?,
        pending_ai_request_id: row.get(4)?,
        lease_expires_at: lease.and_then(DateTime::<Utc>::from_timestamp_millis),
        dify_conversation_id: row.get(6)?,
        assignee_id: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Fetch a conversation's state, if the bridge has seen it.
pub async fn get(
    db: &Database,
    conversation_id: ConversationId,
) -> Result<Option<ConversationState>, BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(SELECT_STATE, params![conversation_id], row_to_state)
                .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a conversation's state, creating a default record on first sight.
pub async fn get_or_create(
    db: &Database,
    conversation_id: ConversationId,
) -> Result<ConversationState, BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.execute(ENSURE_ROW, params![conversation_id])?;
            conn.query_row(SELECT_STATE, params![conversation_id], row_to_state)
        })
        .await
        .map_err(map_tr_err)
}

/// Take the AI lease when it is free or expired.
pub async fn try_begin_ai_request(
    db: &Database,
    conversation_id: ConversationId,
    request_token: &str,
    lease_duration: Duration,
) -> Result<bool, BridgeError> {
    let token = request_token.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(ENSURE_ROW, params![conversation_id])?;
            let now = now_millis();
            let changed = conn.execute(
                "UPDATE conversations
                 SET pending_ai_request_id = ?2, lease_expires_at = ?3,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1
                   AND (pending_ai_request_id IS NULL
                        OR lease_expires_at IS NULL
                        OR lease_expires_at <= ?4)",
                params![conversation_id, token, millis_after(lease_duration), now],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Extend the lease, but only for the current holder.
pub async fn renew_ai_request(
    db: &Database,
    conversation_id: ConversationId,
    request_token: &str,
    lease_duration: Duration,
) -> Result<bool, BridgeError> {
    let token = request_token.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations
                 SET lease_expires_at = ?3,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1 AND pending_ai_request_id = ?2",
                params![conversation_id, token, millis_after(lease_duration)],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Release the lease, but only for the current holder.
pub async fn complete_ai_request(
    db: &Database,
    conversation_id: ConversationId,
    request_token: &str,
) -> Result<bool, BridgeError> {
    let token = request_token.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations
                 SET pending_ai_request_id = NULL, lease_expires_at = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1 AND pending_ai_request_id = ?2",
                params![conversation_id, token],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Record an event as fully handled.
pub async fn record_processed(
    db: &Database,
    conversation_id: ConversationId,
    event_id: &str,
) -> Result<(), BridgeError> {
    let event_id = event_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(ENSURE_ROW, params![conversation_id])?;
            tx.execute(
                "INSERT OR IGNORE INTO processed_events (conversation_id, event_id)
                 VALUES (?1, ?2)",
                params![conversation_id, event_id],
            )?;
            tx.execute(
                "UPDATE conversations
                 SET last_processed_event_id = ?2,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1",
                params![conversation_id, event_id],
            )?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn was_processed(
    db: &Database,
    conversation_id: ConversationId,
    event_id: &str,
) -> Result<bool, BridgeError> {
    let event_id = event_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM processed_events
                                WHERE conversation_id = ?1 AND event_id = ?2)",
                params![conversation_id, event_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Move the cached status along an allowed edge.
///
/// The current status is re-checked in the `WHERE` clause so a concurrent
/// change between the read and the write makes this return false.
pub async fn update_status(
    db: &Database,
    conversation_id: ConversationId,
    new_status: ConversationStatus,
) -> Result<bool, BridgeError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(ENSURE_ROW, params![conversation_id])?;
            let current: ConversationStatus = parse_column(
                0,
                tx.query_row(
                    "SELECT status FROM conversations WHERE conversation_id = ?1",
                    params![conversation_id],
                    |row| row.get::<_, String>(0),
                )?,
            )?;

            if !is_allowed_transition(current, new_status) {
                tx.commit()?;
                return Ok(false);
            }

            let changed = tx.execute(
                "UPDATE conversations
                 SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1 AND status = ?3",
                params![
                    conversation_id,
                    new_status.to_string(),
                    current.to_string()
                ],
            )?;
            tx.commit()?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Overwrite the cached status with the platform's value.
pub async fn reconcile_status(
    db: &Database,
    conversation_id: ConversationId,
    status: ConversationStatus,
) -> Result<(), BridgeError> {
    upsert_column(db, conversation_id, "status", Some(status.to_string())).await
}

pub async fn update_priority(
    db: &Database,
    conversation_id: ConversationId,
    priority: Priority,
) -> Result<(), BridgeError> {
    upsert_column(db, conversation_id, "priority", Some(priority.to_string())).await
}

pub async fn set_dify_conversation_id(
    db: &Database,
    conversation_id: ConversationId,
    dify_conversation_id: Option<&str>,
) -> Result<(), BridgeError> {
    upsert_column(
        db,
        conversation_id,
        "dify_conversation_id",
        dify_conversation_id.map(str::to_string),
    )
    .await
}

pub async fn set_assignee(
    db: &Database,
    conversation_id: ConversationId,
    assignee_id: Option<i64>,
) -> Result<(), BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (conversation_id, assignee_id) VALUES (?1, ?2)
                 ON CONFLICT (conversation_id) DO UPDATE
                 SET assignee_id = excluded.assignee_id,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![conversation_id, assignee_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Claim the content slot for an event received at `received_at`.
///
/// Fails when content from a later event has already been written.
pub async fn claim_content_slot(
    db: &Database,
    conversation_id: ConversationId,
    received_at: DateTime<Utc>,
) -> Result<bool, BridgeError> {
    let received = received_at.timestamp_millis();
    db.connection()
        .call(move |conn| {
            conn.execute(ENSURE_ROW, params![conversation_id])?;
            let changed = conn.execute(
                "UPDATE conversations
                 SET last_applied_received_at = ?2,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE conversation_id = ?1
                   AND (last_applied_received_at IS NULL OR last_applied_received_at <= ?2)",
                params![conversation_id, received],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Upsert a single text column. `column` is always a compile-time constant.
async fn upsert_column(
    db: &Database,
    conversation_id: ConversationId,
    column: &'static str,
    value: Option<String>,
) -> Result<(), BridgeError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO conversations (conversation_id, {column}) VALUES (?1, ?2)
                     ON CONFLICT (conversation_id) DO UPDATE
                     SET {column} = excluded.{column},
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
                ),
                params![conversation_id, value],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
