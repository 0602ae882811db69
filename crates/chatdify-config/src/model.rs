// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the bridge.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Deserializer, Serialize};

use chatdify_core::StatusPolicy;

/// Top-level bridge configuration.
///
/// Loaded once at startup and passed by reference to every gateway, store,
/// and pipeline constructor. All sections default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatdifyConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Chatwoot API settings.
    #[serde(default)]
    pub chatwoot: ChatwootConfig,

    /// Dify API settings.
    #[serde(default)]
    pub dify: DifyConfig,

    /// Outbound HTTP client settings shared by both gateways.
    #[serde(default)]
    pub http: HttpConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Task queue retry and worker settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Dispatch pipeline behavior.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Write policy for conversation status.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Webhook and action HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Process identity and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_bridge_name() -> String {
    "chatdify".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Chatwoot API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatwootConfig {
    /// Base URL of the Chatwoot installation, with or without `/api/v1`.
    #[serde(default = "default_chatwoot_url")]
    pub api_url: String,

    /// Agent-bot or user access token. `None` requires `CHATWOOT_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Account all conversations belong to.
    #[serde(default = "default_account_id")]
    pub account_id: u64,
}

impl Default for ChatwootConfig {
    fn default() -> Self {
        Self {
            api_url: default_chatwoot_url(),
            api_key: None,
            account_id: default_account_id(),
        }
    }
}

fn default_chatwoot_url() -> String {
    "https://app.chatwoot.com".to_string()
}

fn default_account_id() -> u64 {
    1
}

/// Dify response delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Blocking,
    /// Accepted by the parser so validation can reject it with a clear message.
    Streaming,
}

/// Dify API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DifyConfig {
    #[serde(default = "default_dify_url")]
    pub api_url: String,

    /// App API key. `None` requires `DIFY_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub response_mode: ResponseMode,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// End-user identifier sent with every request.
    #[serde(default = "default_dify_user")]
    pub user: String,
}

impl Default for DifyConfig {
    fn default() -> Self {
        Self {
            api_url: default_dify_url(),
            api_key: None,
            response_mode: ResponseMode::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            user: default_dify_user(),
        }
    }
}

fn default_dify_url() -> String {
    "https://api.dify.ai/v1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_dify_user() -> String {
    "chatwoot-bridge".to_string()
}

/// Outbound HTTP timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    120
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("chatdify").join("chatdify.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("chatdify.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Task queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Attempts before a task is terminally failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Hard limit for one task run.
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: u64,

    /// Warning threshold for one task run.
    #[serde(default = "default_soft_time_limit")]
    pub soft_time_limit_secs: u64,

    /// How long an AI lease stays valid without renewal.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Delay before retrying a task that found the lease taken.
    #[serde(default = "default_lease_conflict_delay_ms")]
    pub lease_conflict_delay_ms: u64,

    /// Lease-conflict requeues before the task is failed. Together with
    /// `lease_conflict_delay_ms` this must outlast `lease_secs`.
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of concurrent workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            time_limit_secs: default_time_limit(),
            soft_time_limit_secs: default_soft_time_limit(),
            lease_secs: default_lease_secs(),
            lease_conflict_delay_ms: default_lease_conflict_delay_ms(),
            max_deferrals: default_max_deferrals(),
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_time_limit() -> u64 {
    300
}

fn default_soft_time_limit() -> u64 {
    240
}

fn default_lease_secs() -> u64 {
    120
}

fn default_lease_conflict_delay_ms() -> u64 {
    2_000
}

fn default_max_deferrals() -> u32 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    4
}

/// Dispatch pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Recent messages included in the AI context.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Attempts per Chatwoot mutation within one run.
    #[serde(default = "default_mutation_attempts")]
    pub mutation_attempts: u32,

    #[serde(default = "default_mutation_base_delay_ms")]
    pub mutation_base_delay_ms: u64,

    /// Label added when a conversation is handed to humans.
    #[serde(default = "default_escalation_label")]
    pub escalation_label: String,

    /// Team receiving escalations, by id.
    #[serde(default)]
    pub escalation_team_id: Option<i64>,

    /// Team receiving escalations, by name (resolved through the team list).
    #[serde(default)]
    pub escalation_team_name: Option<String>,

    /// Agent receiving escalations when no team is configured.
    #[serde(default)]
    pub escalation_assignee_id: Option<i64>,

    /// Sender types whose messages are never answered.
    #[serde(default = "default_ignored_sender_types")]
    pub ignored_sender_types: Vec<String>,

    /// Message prefixes identifying the bridge's own notices.
    #[serde(default)]
    pub ignored_content_prefixes: Vec<String>,

    /// Also forward agent-side outgoing messages to the AI.
    #[serde(default)]
    pub process_outgoing: bool,

    /// Other event names accepted by the interest filter.
    #[serde(default = "default_accepted_events")]
    pub accepted_events: Vec<String>,

    #[serde(default = "default_team_cache_ttl")]
    pub team_cache_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_messages: default_context_messages(),
            mutation_attempts: default_mutation_attempts(),
            mutation_base_delay_ms: default_mutation_base_delay_ms(),
            escalation_label: default_escalation_label(),
            escalation_team_id: None,
            escalation_team_name: None,
            escalation_assignee_id: None,
            ignored_sender_types: default_ignored_sender_types(),
            ignored_content_prefixes: Vec::new(),
            process_outgoing: false,
            accepted_events: default_accepted_events(),
            team_cache_ttl_secs: default_team_cache_ttl(),
        }
    }
}

fn default_context_messages() -> usize {
    10
}

fn default_mutation_attempts() -> u32 {
    3
}

fn default_mutation_base_delay_ms() -> u64 {
    500
}

fn default_escalation_label() -> String {
    "needs-human".to_string()
}

fn default_ignored_sender_types() -> Vec<String> {
    vec!["agent_bot".to_string()]
}

fn default_accepted_events() -> Vec<String> {
    vec![
        "conversation_created".to_string(),
        "conversation_updated".to_string(),
        "conversation_deleted".to_string(),
    ]
}

fn default_team_cache_ttl() -> u64 {
    86_400
}

/// Conversation status write policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Statuses the bridge may write. Accepts an array or `"open,pending"`.
    #[serde(
        default = "default_allowed_statuses",
        deserialize_with = "string_or_list"
    )]
    pub allowed_statuses: Vec<String>,

    /// Post a private note when a status or priority write is rejected.
    #[serde(default)]
    pub notify_on_rejection: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_statuses: default_allowed_statuses(),
            notify_on_rejection: false,
        }
    }
}

impl PolicyConfig {
    /// The typed write policy. Names rejected by validation are skipped.
    pub fn status_policy(&self) -> StatusPolicy {
        StatusPolicy::from_names(&self.allowed_statuses)
    }
}

fn default_allowed_statuses() -> Vec<String> {
    vec!["open".to_string(), "pending".to_string()]
}

/// Accept either a sequence of strings or a comma-separated string.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    let items = match Raw::deserialize(deserializer)? {
        Raw::One(s) => s.split(',').map(str::to_string).collect(),
        Raw::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Webhook and action HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// HMAC-SHA256 key for `X-Chatwoot-Signature`. `None` accepts unsigned webhooks.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Bearer token for action endpoints. `None` disables them.
    #[serde(default)]
    pub actions_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_secret: None,
            actions_token: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}
