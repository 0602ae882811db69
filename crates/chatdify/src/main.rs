// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! chatdify - answers Chatwoot conversations with a Dify assistant.
//!
//! This is the binary entry point for the bridge.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod status;

use std::path::PathBuf;

use chatdify_config::ChatdifyConfig;
use clap::{Parser, Subcommand};

/// chatdify - answers Chatwoot conversations with a Dify assistant.
#[derive(Parser, Debug)]
#[command(name = "chatdify", version, author, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the usual search path.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook server together with the task workers.
    Serve,
    /// Run task workers only, without the HTTP front door.
    Worker,
    /// Show queue statistics and recently failed tasks.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
        /// Number of failed tasks to list.
        #[arg(long, default_value_t = 10)]
        failures: usize,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validate the configuration and the gateway credentials.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config, serve::Mode::Full).await,
        Some(Commands::Worker) => serve::run_serve(config, serve::Mode::WorkersOnly).await,
        Some(Commands::Status {
            json,
            plain,
            failures,
        }) => status::run_status(&config, json, plain, failures).await,
        Some(Commands::Config {
            action: ConfigCommands::Check,
        }) => {
            run_config_check(&config);
            Ok(())
        }
        None => {
            println!("chatdify: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Load and validate configuration, exiting with rendered diagnostics on error.
fn load_config(path: Option<&std::path::Path>) -> ChatdifyConfig {
    let loaded = match path {
        Some(path) => chatdify_config::load_and_validate_path(path),
        None => chatdify_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            chatdify_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn run_config_check(config: &ChatdifyConfig) {
    if let Err(errors) = chatdify_config::check_credentials(config) {
        chatdify_config::render_errors(&errors);
        std::process::exit(1);
    }
    println!(
        "chatdify: config ok (chatwoot account {} at {}, dify at {})",
        config.chatwoot.account_id, config.chatwoot.api_url, config.dify.api_url
    );
    println!(
        "  statuses allowed for writes: {}",
        config.policy.allowed_statuses.join(", ")
    );
    if config.server.webhook_secret.is_none() {
        println!("  warning: no webhook secret, unsigned webhooks are accepted");
    }
    if config.server.actions_token.is_none() {
        println!("  warning: no actions token, action endpoints are disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["chatdify", "--config", "/tmp/c.toml", "status", "--json"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Status {
                json: true,
                plain: false,
                failures: 10
            })
        ));

        let cli = Cli::try_parse_from(["chatdify", "config", "check"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigCommands::Check
            })
        ));
    }

    #[test]
    fn cli_names_the_chatdify_authors() {
        use clap::CommandFactory;
        assert_eq!(Cli::command().get_author(), Some("Chatdify Contributors"));
    }

    #[test]
    fn defaults_plus_an_escalation_team_are_valid() {
        let config =
            chatdify_config::load_and_validate_str("[pipeline]\nescalation_team_id = 3\n")
                .expect("defaults should validate once a team is named");
        assert_eq!(config.bridge.name, "chatdify");
        assert_eq!(config.pipeline.escalation_team_id, Some(3));
    }
}
