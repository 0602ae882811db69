// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `chatdify status` command implementation.
//!
//! Reads queue counts and recently failed tasks straight from the SQLite
//! database, and probes the `/health` endpoint to tell whether a server is
//! running. Works when the bridge is down.

use std::io::IsTerminal;
use std::time::Duration;

use chatdify_config::model::ChatdifyConfig;
use chatdify_core::{BridgeError, QueueStats, StorageAdapter, TaskQueue, TaskRecord};
use chatdify_storage::SqliteStorage;
use serde::{Deserialize, Serialize};

/// Health endpoint response from the front door.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    uptime_secs: u64,
}

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub status: String,
    pub uptime_secs: Option<u64>,
    pub uptime_human: Option<String>,
    pub endpoint: String,
    pub queue: QueueStats,
    pub recent_failures: Vec<TaskRecord>,
}

/// Format seconds into a human-readable duration string.
fn format_uptime(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Run the `chatdify status` command.
pub async fn run_status(
    config: &ChatdifyConfig,
    json: bool,
    plain: bool,
    failures: usize,
) -> Result<(), BridgeError> {
    let storage = SqliteStorage::new(config.storage.clone())
        .with_max_attempts(config.queue.max_attempts);
    storage.initialize().await?;
    let queue = storage.stats().await?;
    let recent_failures = storage.recent_failures(failures).await?;
    storage.close().await?;

    let endpoint = format!("http://{}:{}/health", config.server.host, config.server.port);
    let health = probe_health(&endpoint).await;

    let response = StatusResponse {
        running: health.is_some(),
        status: health
            .as_ref()
            .map(|h| h.status.clone())
            .unwrap_or_else(|| "not running".to_string()),
        uptime_secs: health.as_ref().map(|h| h.uptime_secs),
        uptime_human: health.as_ref().map(|h| format_uptime(h.uptime_secs)),
        endpoint,
        queue,
        recent_failures,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_status(&response, use_color);
    }
    Ok(())
}

async fn probe_health(url: &str) -> Option<HealthResponse> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .ok()?;
    // A degraded server answers 503 with the same body.
    let resp = client.get(url).send().await.ok()?;
    resp.json().await.ok()
}

fn print_status(response: &StatusResponse, use_color: bool) {
    println!();
    println!("  chatdify status");
    println!("  {}", "-".repeat(35));

    match (&response.uptime_human, use_color) {
        (Some(uptime), true) => {
            use colored::Colorize;
            let state = if response.status == "ok" {
                format!("{} {}", "✓".green(), response.status.green())
            } else {
                format!("{} {}", "!".yellow(), response.status.yellow())
            };
            println!("    Server:   {state} (uptime: {uptime})");
        }
        (Some(uptime), false) => {
            let tag = if response.status == "ok" { "OK" } else { "WARN" };
            println!("    Server:   [{tag}] {} (uptime: {uptime})", response.status);
        }
        (None, true) => {
            use colored::Colorize;
            println!("    Server:   {} {}", "✗".red(), "not running".red());
        }
        (None, false) => println!("    Server:   [FAIL] not running"),
    }
    println!("    Endpoint: {}", response.endpoint);

    let q = &response.queue;
    println!(
        "    Queue:    {} pending, {} processing, {} completed, {} failed",
        q.pending, q.processing, q.completed, q.failed
    );

    if response.recent_failures.is_empty() {
        println!("    Failures: none");
    } else {
        println!("    Failures:");
        for task in &response.recent_failures {
            let reason = task.last_error.as_deref().unwrap_or("-");
            let line = format!(
                "#{} {} (attempts {}, {}): {}",
                task.id, task.task_name, task.attempts, task.updated_at, reason
            );
            if use_color {
                use colored::Colorize;
                println!("      {}", line.red());
            } else {
                println!("      {line}");
            }
        }
    }
    println!();
}
