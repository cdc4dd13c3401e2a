//! Command-line interface definition for signin-relay
//!
//! This module defines the CLI structure using clap's derive API for the
//! diagnostic binary: replaying recorded relay traffic and checking
//! configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::event::AuthEventType;

/// signin-relay - sign-in event correlation diagnostics
///
/// Replays recorded sign-in callback events through an event manager and
/// reports what every waiting caller would have seen.
#[derive(Parser, Debug, Clone)]
#[command(name = "signin-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SIGNIN_RELAY_CONFIG", default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Use mobile (long) timeouts
    #[arg(long)]
    pub mobile: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for signin-relay
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Replay a JSON-lines event log through an event manager
    Replay {
        /// File with one plain-object auth event per line
        #[arg(short, long)]
        events: PathBuf,

        /// Event types the replay consumer owns (comma separated)
        ///
        /// Defaults to every type.
        #[arg(short, long, value_delimiter = ',')]
        owner: Vec<AuthEventType>,

        /// Make the finisher fail with this auth error code
        #[arg(long)]
        finisher_error: Option<String>,

        /// User object (JSON) returned by a successful finisher
        #[arg(long)]
        user: Option<String>,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            mobile: false,
            command: Commands::CheckConfig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_cli_parse_check_config() {
        let cli = Cli::try_parse_from(["signin-relay", "check-config"]).unwrap();
        assert!(matches!(cli.command, Commands::CheckConfig));
    }

    #[test]
    fn test_cli_parse_replay_minimal() {
        let cli = Cli::try_parse_from(["signin-relay", "replay", "--events", "log.jsonl"]).unwrap();
        if let Commands::Replay {
            events,
            owner,
            finisher_error,
            user,
        } = cli.command
        {
            assert_eq!(events, PathBuf::from("log.jsonl"));
            assert!(owner.is_empty());
            assert!(finisher_error.is_none());
            assert!(user.is_none());
        } else {
            panic!("Expected Replay command");
        }
    }

    #[test]
    fn test_cli_parse_replay_owner_list() {
        let cli = Cli::try_parse_from([
            "signin-relay",
            "replay",
            "-e",
            "log.jsonl",
            "--owner",
            "signInViaRedirect,linkViaPopup",
            "--finisher-error",
            "auth/user-disabled",
        ])
        .unwrap();
        if let Commands::Replay {
            owner,
            finisher_error,
            ..
        } = cli.command
        {
            assert_eq!(
                owner,
                vec![AuthEventType::SignInRedirect, AuthEventType::LinkPopup]
            );
            assert_eq!(finisher_error.as_deref(), Some("auth/user-disabled"));
        } else {
            panic!("Expected Replay command");
        }
    }

    #[test]
    fn test_cli_rejects_unknown_owner_type() {
        let result = Cli::try_parse_from([
            "signin-relay",
            "replay",
            "-e",
            "log.jsonl",
            "--owner",
            "signInViaCarrierPigeon",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "signin-relay",
            "-v",
            "--json-logs",
            "--mobile",
            "-c",
            "custom.yaml",
            "check-config",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert!(cli.mobile);
        assert_eq!(cli.config.as_deref(), Some("custom.yaml"));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["signin-relay"]).is_err());
    }
}
