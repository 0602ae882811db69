// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! A signal cancels the shared token; the worker pool then gets a bounded
//! window to finish in-flight tasks. Tasks cut off at the deadline keep their
//! queue lock and are reclaimed by the next process.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Installs handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is
/// received. Workers finish their current task before exiting.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), initiating shutdown"),
                        _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Wait up to `timeout` for the worker pool to stop after cancellation.
///
/// Returns false when the deadline passed and the pool was aborted.
pub async fn drain_workers(mut workers: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut workers).await {
        Ok(Ok(())) => {
            info!("workers drained");
            true
        }
        Ok(Err(e)) => {
            error!(error = %e, "worker pool panicked");
            true
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "workers still busy at shutdown deadline, aborting"
            );
            workers.abort();
            false
        }
    }
}
