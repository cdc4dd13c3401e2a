/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `replay`        - drive a recorded event log through an event manager
- `check_config`  - load, validate and print the effective configuration
*/

use crate::config::RelayConfig;
use crate::error::Result;

pub mod replay;

/// Print the effective configuration as YAML
///
/// The configuration has already been validated by the caller.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn check_config(config: &RelayConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    println!("{}", yaml.trim_end());
    tracing::info!(key = %config.manager_key(), "Configuration is valid");
    Ok(())
}
