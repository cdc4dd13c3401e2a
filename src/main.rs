//! signin-relay - sign-in event correlation diagnostics
//!
#![doc = "signin-relay - sign-in event correlation diagnostics"]
#![doc = "Main entry point for the signin-relay binary."]

use anyhow::{Context, Result};

use signin_relay::cli::{Cli, Commands};
use signin_relay::commands;
use signin_relay::commands::replay::ReplayArgs;
use signin_relay::config::RelayConfig;
use signin_relay::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = RelayConfig::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    init_logging(&config.logging)?;
    tracing::debug!(config = config_path, "Configuration loaded");

    match cli.command {
        Commands::Replay {
            events,
            owner,
            finisher_error,
            user,
        } => {
            let user = user
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("--user must be a JSON value")?;
            tracing::info!(events = %events.display(), "Starting replay");
            let args = ReplayArgs {
                events,
                owner,
                finisher_error,
                user,
            };
            commands::replay::run_replay(&config, args).await?;
            Ok(())
        }
        Commands::CheckConfig => {
            commands::check_config(&config)?;
            Ok(())
        }
    }
}
