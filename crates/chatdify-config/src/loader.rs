// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./chatdify.toml` > `~/.config/chatdify/chatdify.toml`
//! > `/etc/chatdify/chatdify.toml` with environment variable overrides via the
//! `CHATDIFY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ChatdifyConfig;

/// Config sections, in the order their env prefixes are matched.
const SECTIONS: &[&str] = &[
    "bridge", "chatwoot", "dify", "http", "storage", "queue", "pipeline", "policy", "server",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/chatdify/chatdify.toml` (system-wide)
/// 3. `~/.config/chatdify/chatdify.toml` (user XDG config)
/// 4. `./chatdify.toml` (local directory)
/// 5. `ALLOWED_CONVERSATION_STATUSES` (legacy deployment variable)
/// 6. `CHATDIFY_*` environment variables
pub fn load_config() -> Result<ChatdifyConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<ChatdifyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ChatdifyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ChatdifyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ChatdifyConfig::default()))
        .merge(Toml::file(path))
        .merge(legacy_env_provider())
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ChatdifyConfig::default()))
        .merge(Toml::file("/etc/chatdify/chatdify.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("chatdify/chatdify.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("chatdify.toml"))
        .merge(legacy_env_provider())
        .merge(env_provider())
}

/// Map `CHATDIFY_<SECTION>_<KEY>` onto `section.key`.
///
/// Uses an explicit section table instead of `Env::split("_")` because keys
/// themselves contain underscores: `CHATDIFY_QUEUE_MAX_ATTEMPTS` must become
/// `queue.max_attempts`, not `queue.max.attempts`.
fn env_provider() -> Env {
    Env::prefixed("CHATDIFY_").map(|key| map_env_key(key.as_str()).into())
}

/// The variable the original deployment scripts used for the status allowlist.
fn legacy_env_provider() -> Env {
    Env::raw()
        .only(&["ALLOWED_CONVERSATION_STATUSES"])
        .map(|_| "policy.allowed_statuses".into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
