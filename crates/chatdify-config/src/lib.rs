// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Chatwoot/Dify bridge.
//!
//! Provides TOML configuration parsing with strict validation (`deny_unknown_fields`),
//! XDG file hierarchy lookup, environment variable overrides, and Elm-style diagnostic
//! error rendering with typo suggestions.
//!
//! # Usage
//!
//! ```no_run
//! use chatdify_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("Chatwoot account: {}", config.chatwoot.account_id);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ChatdifyConfig;

/// Environment variable consulted when `chatwoot.api_key` is unset.
pub const CHATWOOT_API_KEY_ENV: &str = "CHATWOOT_API_KEY";

/// Environment variable consulted when `dify.api_key` is unset.
pub const DIFY_API_KEY_ENV: &str = "DIFY_API_KEY";

/// Load configuration from the XDG hierarchy and validate it.
///
/// On a Figment error the result carries rich miette diagnostics with typo
/// suggestions; on success the semantic validation pass runs.
pub fn load_and_validate() -> Result<ChatdifyConfig, Vec<ConfigError>> {
    match loader::load_config() {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let toml_sources = collect_toml_sources();
            Err(diagnostic::figment_to_config_errors(err, &toml_sources))
        }
    }
}

/// Load configuration from an explicit file and validate it.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<ChatdifyConfig, Vec<ConfigError>> {
    match loader::load_config_from_path(path) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = std::fs::read_to_string(path)
                .map(|content| vec![(path.display().to_string(), content)])
                .unwrap_or_default();
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Load configuration from a specific TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<ChatdifyConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Resolve a credential from config, falling back to an environment variable.
pub fn resolve_secret(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|s| !s.trim().is_empty())
}

/// Ensure both gateway credentials are available before starting workers.
pub fn check_credentials(config: &ChatdifyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    if resolve_secret(config.chatwoot.api_key.as_deref(), CHATWOOT_API_KEY_ENV).is_none() {
        errors.push(ConfigError::MissingCredential {
            key: "chatwoot.api_key".into(),
            env: CHATWOOT_API_KEY_ENV.into(),
        });
    }
    if resolve_secret(config.dify.api_key.as_deref(), DIFY_API_KEY_ENV).is_none() {
        errors.push(ConfigError::MissingCredential {
            key: "dify.api_key".into(),
            env: DIFY_API_KEY_ENV.into(),
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collect TOML source file contents for error span resolution.
fn collect_toml_sources() -> Vec<(String, String)> {
    let mut candidates = vec![
        std::env::current_dir()
            .map(|d| d.join("chatdify.toml"))
            .unwrap_or_else(|_| "chatdify.toml".into()),
    ];
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("chatdify/chatdify.toml"));
    }
    candidates.push("/etc/chatdify/chatdify.toml".into());

    candidates
        .into_iter()
        .filter_map(|path| {
            std::fs::read_to_string(&path)
                .ok()
                .map(|content| (path.display().to_string(), content))
        })
        .collect()
}
