// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use chatdify_core::BridgeError;
use tracing::debug;

use crate::migrations;

/// Handle to the bridge database.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if needed) the database in WAL mode and apply migrations.
    pub async fn open(path: &str) -> Result<Self, BridgeError> {
        Self::open_with_wal(path, true).await
    }

    /// Open the database, choosing the journal mode explicitly.
    pub async fn open_with_wal(path: &str, wal_mode: bool) -> Result<Self, BridgeError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(BridgeError::storage)?;
        }

        // Migrations run on a short-lived synchronous connection before the
        // async writer thread starts.
        let setup_path = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), BridgeError> {
            let mut conn = rusqlite::Connection::open(&setup_path).map_err(BridgeError::storage)?;
            apply_pragmas(&conn, wal_mode).map_err(BridgeError::storage)?;
            migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| BridgeError::Storage {
                source: Box::new(e),
            })?;
        conn.call(move |conn| apply_pragmas(conn, wal_mode))
            .await
            .map_err(map_tr_err)?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The underlying async connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), BridgeError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            })
            .await
            .map_err(map_tr_err)?;
        self.conn
            .close()
            .await
            .map_err(|e| BridgeError::storage(e.to_string()))
    }
}

fn apply_pragmas(conn: &rusqlite::Connection, wal_mode: bool) -> Result<(), rusqlite::Error> {
    if wal_mode {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Map a tokio-rusqlite error into the bridge storage error.
///
/// Also pins the closure error type of `Connection::call` to `rusqlite::Error`.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> BridgeError {
    BridgeError::Storage {
        source: Box::new(e),
    }
}

/// Current time in epoch milliseconds, the unit of every lease and schedule column.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `now + delay` in epoch milliseconds, saturating on absurd delays.
pub(crate) fn millis_after(delay: std::time::Duration) -> i64 {
    let delay = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(delay)
}
