// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `chatdify serve` and `chatdify worker` command implementation.
//!
//! Opens SQLite storage, builds the Chatwoot and Dify gateways, and runs the
//! worker pool. In full mode the axum front door runs beside the workers and
//! both stop on the same cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatdify_chatwoot::ChatwootGateway;
use chatdify_config::model::ChatdifyConfig;
use chatdify_core::{BridgeError, StorageAdapter};
use chatdify_dify::DifyProvider;
use chatdify_pipeline::{
    shutdown, ActionService, DispatchPipeline, Dispatcher, EventNormalizer, TaskExecutor,
    WorkerPool, WorkerSettings,
};
use chatdify_server::{AppState, AuthConfig, HealthState};
use chatdify_storage::SqliteStorage;
use tracing::{error, info};

/// Which parts of the bridge this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// HTTP front door plus workers.
    Full,
    WorkersOnly,
}

/// Runs the bridge until SIGINT or SIGTERM.
pub async fn run_serve(config: ChatdifyConfig, mode: Mode) -> Result<(), BridgeError> {
    init_tracing(&config.bridge.log_level);

    if let Err(errors) = chatdify_config::check_credentials(&config) {
        chatdify_config::render_errors(&errors);
        return Err(BridgeError::Config(
            "gateway credentials are missing".to_string(),
        ));
    }

    info!(name = %config.bridge.name, ?mode, "starting chatdify");

    let storage = SqliteStorage::new(config.storage.clone())
        .with_max_attempts(config.queue.max_attempts);
    storage.initialize().await?;
    let storage = Arc::new(storage);
    info!(path = %config.storage.database_path, "storage initialized");

    let chatwoot = Arc::new(ChatwootGateway::new(&config)?);
    let dify = Arc::new(DifyProvider::new(&config)?);

    let pipeline = Arc::new(DispatchPipeline::new(
        &config,
        storage.clone(),
        chatwoot.clone(),
        dify,
    ));
    let executor = Arc::new(TaskExecutor::new(
        pipeline.clone(),
        storage.clone(),
        WorkerSettings::from_config(&config.queue),
    ));
    let pool = WorkerPool::new(executor);

    let cancel = shutdown::install_signal_handler();

    let workers = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(cancel).await })
    };

    let served = match mode {
        Mode::Full => {
            let state = AppState {
                dispatcher: Arc::new(Dispatcher::new(
                    EventNormalizer::new(&config.pipeline),
                    storage.clone(),
                    storage.clone(),
                )),
                actions: Arc::new(ActionService::new(
                    chatwoot,
                    storage.clone(),
                    pipeline.teams().clone(),
                    config.policy.status_policy(),
                    config.policy.notify_on_rejection,
                )),
                webhook_secret: config.server.webhook_secret.clone(),
                auth: AuthConfig {
                    bearer_token: config.server.actions_token.clone(),
                },
                health: HealthState {
                    start_time: Instant::now(),
                    storage: storage.clone(),
                    queue: storage.clone(),
                },
            };
            let result = chatdify_server::serve(&config.server, state, cancel.clone()).await;
            // A bind failure must not leave workers running headless.
            cancel.cancel();
            result
        }
        Mode::WorkersOnly => {
            cancel.cancelled().await;
            Ok(())
        }
    };

    let drain_timeout = Duration::from_secs(config.queue.time_limit_secs);
    shutdown::drain_workers(workers, drain_timeout).await;

    if let Err(e) = storage.close().await {
        error!(error = %e, "failed to close storage");
    }

    info!("chatdify stopped");
    served
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatdify={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
