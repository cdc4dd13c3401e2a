//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file output.
//! Integrates with the tracing ecosystem for structured event logging.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level for
/// this crate.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(format!(
            "signin_relay={}",
            config.level.to_lowercase()
        ))?),
    }
}

/// Initialize logging based on configuration.
///
/// Sets up structured logging with support for both JSON and human-readable formats,
/// with optional file output in addition to STDERR.
///
/// # Arguments
///
/// * `config` - Logging configuration
///
/// # Errors
///
/// Returns an error if the level is not a valid filter, the log file cannot
/// be opened, or a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use signin_relay::config::LoggingConfig;
/// use signin_relay::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     json: true,
///     file: None,
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config)?);

    if config.json {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(Arc::new(file));

            registry.with(stderr_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stderr_layer).try_init()?;
        }
    } else {
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        if let Some(file_path) = &config.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            registry.with(stderr_layer).with(file_layer).try_init()?;
        } else {
            registry.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

/// Create a span carrying the identifying fields of an auth event.
///
/// # Examples
///
/// ```
/// use signin_relay::auth_event_span;
/// use signin_relay::event::{AuthEvent, AuthEventType};
///
/// let event = AuthEvent::new(AuthEventType::SignInPopup).with_event_id("p1");
/// let _guard = auth_event_span!(event).entered();
/// ```
#[macro_export]
macro_rules! auth_event_span {
    ($event:expr) => {
        tracing::debug_span!(
            "auth_event",
            event_type = %$event.event_type,
            event_id = ?$event.event_id,
            uid = ?$event.uid(),
            has_error = $event.has_error()
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert_eq!(config.file, None);
    }

    #[test]
    fn test_env_filter_accepts_configured_level() {
        let config = LoggingConfig {
            level: "WARN".to_string(),
            json: false,
            file: None,
        };
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn test_logging_config_from_yaml() {
        let config: LoggingConfig =
            serde_yaml::from_str("level: trace\njson: true\nfile: /tmp/relay.log\n").unwrap();
        assert_eq!(config.level, "trace");
        assert!(config.json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/relay.log")));
    }

    #[test]
    fn test_auth_event_span_builds() {
        use crate::event::{AuthEvent, AuthEventType};
        let event = AuthEvent::new(AuthEventType::LinkRedirect).with_session_id("s1");
        let span = auth_event_span!(event);
        let _guard = span.entered();
    }
}
