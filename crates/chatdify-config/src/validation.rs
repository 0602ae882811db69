// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: URL shapes, known
//! status names, numeric bounds, the escalation target and the blocking-only
//! response mode.

use chatdify_core::ConversationStatus;

use crate::diagnostic::ConfigError;
use crate::model::{ChatdifyConfig, ResponseMode};

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns every problem found rather than stopping at the first one.
pub fn validate_config(config: &ChatdifyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    check_url(&mut errors, "chatwoot.api_url", &config.chatwoot.api_url);
    check_url(&mut errors, "dify.api_url", &config.dify.api_url);

    if config.chatwoot.account_id == 0 {
        errors.push(ConfigError::validation("chatwoot.account_id must be positive"));
    }

    if config.dify.response_mode == ResponseMode::Streaming {
        errors.push(ConfigError::validation(
            "dify.response_mode `streaming` is not supported, use `blocking`",
        ));
    }

    if !(0.0..=2.0).contains(&config.dify.temperature) {
        errors.push(ConfigError::validation(format!(
            "dify.temperature must be between 0.0 and 2.0, got {}",
            config.dify.temperature
        )));
    }

    if config.dify.max_tokens == 0 {
        errors.push(ConfigError::validation("dify.max_tokens must be positive"));
    }

    if config.dify.user.trim().is_empty() {
        errors.push(ConfigError::validation("dify.user must not be empty"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation("storage.database_path must not be empty"));
    }

    let queue = &config.queue;
    if queue.max_attempts == 0 {
        errors.push(ConfigError::validation("queue.max_attempts must be at least 1"));
    }
    if queue.base_delay_ms > queue.max_delay_ms {
        errors.push(ConfigError::validation(format!(
            "queue.base_delay_ms ({}) exceeds queue.max_delay_ms ({})",
            queue.base_delay_ms, queue.max_delay_ms
        )));
    }
    if queue.soft_time_limit_secs >= queue.time_limit_secs {
        errors.push(ConfigError::validation(format!(
            "queue.soft_time_limit_secs ({}) must be below queue.time_limit_secs ({})",
            queue.soft_time_limit_secs, queue.time_limit_secs
        )));
    }
    if queue.lease_secs == 0 {
        errors.push(ConfigError::validation("queue.lease_secs must be positive"));
    }
    if queue.concurrency == 0 {
        errors.push(ConfigError::validation("queue.concurrency must be at least 1"));
    }
    let deferral_budget_ms =
        u64::from(queue.max_deferrals).saturating_mul(queue.lease_conflict_delay_ms);
    if deferral_budget_ms < queue.lease_secs.saturating_mul(1000) {
        errors.push(ConfigError::validation(format!(
            "queue.max_deferrals * queue.lease_conflict_delay_ms ({deferral_budget_ms} ms) \
             must cover queue.lease_secs ({} s)",
            queue.lease_secs
        )));
    }

    let pipeline = &config.pipeline;
    if pipeline.mutation_attempts == 0 {
        errors.push(ConfigError::validation(
            "pipeline.mutation_attempts must be at least 1",
        ));
    }
    if pipeline.escalation_label.trim().is_empty() {
        errors.push(ConfigError::validation(
            "pipeline.escalation_label must not be empty",
        ));
    }
    let targets = [
        pipeline.escalation_team_id.is_some(),
        pipeline.escalation_team_name.is_some(),
        pipeline.escalation_assignee_id.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if targets != 1 {
        errors.push(ConfigError::validation(format!(
            "set exactly one of pipeline.escalation_team_id, pipeline.escalation_team_name \
             and pipeline.escalation_assignee_id (found {targets})"
        )));
    }

    if config.policy.allowed_statuses.is_empty() {
        errors.push(ConfigError::validation(
            "policy.allowed_statuses must name at least one status",
        ));
    }
    for name in &config.policy.allowed_statuses {
        if ConversationStatus::parse(name).is_err() {
            let known = ConversationStatus::ALL
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(ConfigError::validation(format!(
                "policy.allowed_statuses contains unknown status `{name}` (known: {known})"
            )));
        }
    }

    let addr = config.server.host.trim();
    if addr.is_empty() {
        errors.push(ConfigError::validation("server.host must not be empty"));
    } else {
        let is_valid_ip = addr.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = addr
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::validation(format!(
                "server.host `{addr}` is not a valid IP address or hostname"
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ConfigError>, key: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(ConfigError::validation(format!("{key} must not be empty")));
    } else if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(ConfigError::validation(format!(
            "{key} `{value}` must start with http:// or https://"
        )));
    }
}
