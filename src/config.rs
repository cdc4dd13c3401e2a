//! Configuration management for signin-relay
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::channel::{Delay, EnvironmentProfile};
use crate::error::{RelayError, Result};
use crate::manager::{EmulatorConfig, ManagerKey, ManagerOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for signin-relay
///
/// Every section is optional in the file and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// App identity
    #[serde(default)]
    pub app: AppConfig,
    /// Redirect and popup timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Duplicate suppression
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Runtime environment facts
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Channel to dispatcher mailbox
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Redirect flag persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// App identity used to key the event manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Domain hosting the sign-in relay
    #[serde(default = "default_auth_domain")]
    pub auth_domain: String,
    /// Project API key
    #[serde(default)]
    pub api_key: String,
    /// App instance name
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Emulator base URL, when running against a local emulator
    #[serde(default)]
    pub emulator_url: Option<String>,
}

fn default_auth_domain() -> String {
    "example.firebaseapp.com".to_string()
}

fn default_app_name() -> String {
    "[DEFAULT]".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_domain: default_auth_domain(),
            api_key: String::new(),
            app_name: default_app_name(),
            emulator_url: None,
        }
    }
}

/// Timeout durations in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Redirect result timeout on desktop
    #[serde(default = "default_redirect_short_ms")]
    pub redirect_short_ms: u64,
    /// Redirect result timeout on mobile
    #[serde(default = "default_redirect_long_ms")]
    pub redirect_long_ms: u64,
    /// Popup close grace period on desktop
    #[serde(default = "default_popup_short_ms")]
    pub popup_short_ms: u64,
    /// Popup close grace period on mobile
    #[serde(default = "default_popup_long_ms")]
    pub popup_long_ms: u64,
    /// Upper bound on any timeout while offline
    #[serde(default = "default_offline_delay_ms")]
    pub offline_delay_ms: u64,
}

fn default_redirect_short_ms() -> u64 {
    30_000
}

fn default_redirect_long_ms() -> u64 {
    60_000
}

fn default_popup_short_ms() -> u64 {
    2_000
}

fn default_popup_long_ms() -> u64 {
    10_000
}

fn default_offline_delay_ms() -> u64 {
    5_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            redirect_short_ms: default_redirect_short_ms(),
            redirect_long_ms: default_redirect_long_ms(),
            popup_short_ms: default_popup_short_ms(),
            popup_long_ms: default_popup_long_ms(),
            offline_delay_ms: default_offline_delay_ms(),
        }
    }
}

/// Duplicate suppression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Seconds after the last processed event before the cache is cleared
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    600
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
        }
    }
}

/// Runtime environment facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Running on a mobile device
    #[serde(default)]
    pub mobile: bool,
    /// Network believed reachable
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mobile: false,
            online: default_online(),
        }
    }
}

/// Mailbox between channel and dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Undelivered events buffered before the channel waits
    #[serde(default = "default_mailbox_capacity")]
    pub capacity: usize,
}

fn default_mailbox_capacity() -> usize {
    crate::channel::DEFAULT_MAILBOX_CAPACITY
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: default_mailbox_capacity(),
        }
    }
}

/// Redirect flag persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for redirect marker files; in-memory when unset
    #[serde(default)]
    pub flag_dir: Option<PathBuf>,
}

/// Logging output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file, environment and CLI
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML file; defaults are used if it is missing
    /// * `cli` - Parsed command line, applied last
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        // App identity
        if let Ok(auth_domain) = std::env::var("SIGNIN_RELAY_AUTH_DOMAIN") {
            self.app.auth_domain = auth_domain;
        }

        if let Ok(api_key) = std::env::var("SIGNIN_RELAY_API_KEY") {
            self.app.api_key = api_key;
        }

        if let Ok(app_name) = std::env::var("SIGNIN_RELAY_APP_NAME") {
            self.app.app_name = app_name;
        }

        if let Ok(url) = std::env::var("SIGNIN_RELAY_EMULATOR_URL") {
            self.app.emulator_url = if url.is_empty() { None } else { Some(url) };
        }

        // Timeouts
        override_parsed("SIGNIN_RELAY_REDIRECT_SHORT_MS", &mut self.timeouts.redirect_short_ms);
        override_parsed("SIGNIN_RELAY_REDIRECT_LONG_MS", &mut self.timeouts.redirect_long_ms);
        override_parsed("SIGNIN_RELAY_POPUP_SHORT_MS", &mut self.timeouts.popup_short_ms);
        override_parsed("SIGNIN_RELAY_POPUP_LONG_MS", &mut self.timeouts.popup_long_ms);
        override_parsed("SIGNIN_RELAY_OFFLINE_DELAY_MS", &mut self.timeouts.offline_delay_ms);

        // Dedup, environment, mailbox
        override_parsed("SIGNIN_RELAY_DEDUP_WINDOW_SECS", &mut self.dedup.window_secs);
        override_parsed("SIGNIN_RELAY_MOBILE", &mut self.environment.mobile);
        override_parsed("SIGNIN_RELAY_ONLINE", &mut self.environment.online);
        override_parsed("SIGNIN_RELAY_MAILBOX_CAPACITY", &mut self.mailbox.capacity);

        if let Ok(dir) = std::env::var("SIGNIN_RELAY_FLAG_DIR") {
            self.storage.flag_dir = Some(PathBuf::from(dir));
        }

        // Logging
        if let Ok(level) = std::env::var("SIGNIN_RELAY_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: SIGNIN_RELAY_LOG_LEVEL");
            self.logging.level = level;
        }

        override_parsed("SIGNIN_RELAY_JSON_LOGS", &mut self.logging.json);

        if let Ok(file) = std::env::var("SIGNIN_RELAY_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
        if cli.json_logs {
            self.logging.json = true;
        }
        if cli.mobile {
            self.environment.mobile = true;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if a short delay exceeds its long
    /// counterpart, a duration or capacity is zero, the app name is empty,
    /// the emulator URL does not parse, or the log level is unknown.
    pub fn validate(&self) -> Result<()> {
        if self.app.app_name.is_empty() {
            return Err(RelayError::Config("app_name cannot be empty".to_string()).into());
        }

        if let Some(url) = &self.app.emulator_url {
            url::Url::parse(url).map_err(|e| {
                RelayError::Config(format!("Invalid emulator_url '{}': {}", url, e))
            })?;
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("redirect_short_ms", t.redirect_short_ms),
            ("redirect_long_ms", t.redirect_long_ms),
            ("popup_short_ms", t.popup_short_ms),
            ("popup_long_ms", t.popup_long_ms),
            ("offline_delay_ms", t.offline_delay_ms),
        ] {
            if value == 0 {
                return Err(RelayError::Config(format!("{} must be greater than 0", name)).into());
            }
        }
        self.redirect_delay()?;
        self.popup_delay()?;

        if self.dedup.window_secs == 0 {
            return Err(
                RelayError::Config("dedup.window_secs must be greater than 0".to_string()).into(),
            );
        }

        if self.mailbox.capacity == 0 {
            return Err(
                RelayError::Config("mailbox.capacity must be greater than 0".to_string()).into(),
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RelayError::Config(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ))
            .into());
        }

        Ok(())
    }

    /// Redirect result timeout bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the short delay exceeds the long one.
    pub fn redirect_delay(&self) -> Result<Delay> {
        Delay::new(
            Duration::from_millis(self.timeouts.redirect_short_ms),
            Duration::from_millis(self.timeouts.redirect_long_ms),
        )
    }

    /// Popup grace period bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the short delay exceeds the long one.
    pub fn popup_delay(&self) -> Result<Delay> {
        Delay::new(
            Duration::from_millis(self.timeouts.popup_short_ms),
            Duration::from_millis(self.timeouts.popup_long_ms),
        )
    }

    /// Environment profile for picking delays.
    pub fn environment_profile(&self) -> EnvironmentProfile {
        EnvironmentProfile {
            mobile: self.environment.mobile,
            online: self.environment.online,
            offline_delay: Duration::from_millis(self.timeouts.offline_delay_ms),
        }
    }

    /// Options for every event manager built from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if either delay pair is inverted.
    pub fn manager_options(&self) -> Result<ManagerOptions> {
        Ok(ManagerOptions {
            dedup_window: Duration::from_secs(self.dedup.window_secs),
            redirect_delay: self.redirect_delay()?,
            popup_delay: self.popup_delay()?,
            environment: self.environment_profile(),
            mailbox_capacity: self.mailbox.capacity,
        })
    }

    /// Registry key for the configured app.
    pub fn manager_key(&self) -> ManagerKey {
        let key = ManagerKey::new(
            self.app.auth_domain.clone(),
            self.app.api_key.clone(),
            self.app.app_name.clone(),
        );
        match &self.app.emulator_url {
            Some(url) => key.with_emulator(EmulatorConfig { url: url.clone() }),
            None => key,
        }
    }
}

/// Replaces `target` with the parsed value of env var `name`, if set.
/// Unparsable values are logged and ignored.
fn override_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.parse() {
        Ok(value) => {
            *target = value;
            tracing::debug!("Env override: {}", name);
        }
        Err(_) => tracing::warn!("Invalid {}: {}", name, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_config_file;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.app.app_name, "[DEFAULT]");
        assert_eq!(config.timeouts.redirect_short_ms, 30_000);
        assert_eq!(config.timeouts.redirect_long_ms, 60_000);
        assert_eq!(config.timeouts.popup_short_ms, 2_000);
        assert_eq!(config.timeouts.popup_long_ms, 10_000);
        assert_eq!(config.dedup.window_secs, 600);
        assert_eq!(config.mailbox.capacity, 16);
        assert!(config.environment.online);
        assert!(config.storage.flag_dir.is_none());
    }

    #[test]
    fn test_config_validation_success() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_app_name() {
        let mut config = RelayConfig::default();
        config.app.app_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_inverted_redirect_delay() {
        let mut config = RelayConfig::default();
        config.timeouts.redirect_short_ms = 90_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_inverted_popup_delay() {
        let mut config = RelayConfig::default();
        config.timeouts.popup_long_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_values() {
        let mut config = RelayConfig::default();
        config.timeouts.offline_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.dedup.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.mailbox.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_emulator_url() {
        let mut config = RelayConfig::default();
        config.app.emulator_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.app.emulator_url = Some("http://localhost:9099".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_log_level() {
        let mut config = RelayConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
app:
  api_key: AIza-test
  app_name: shop
  emulator_url: http://localhost:9099
timeouts:
  redirect_short_ms: 1000
  redirect_long_ms: 2000
environment:
  mobile: true
logging:
  level: debug
  json: true
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app.api_key, "AIza-test");
        assert_eq!(config.app.auth_domain, "example.firebaseapp.com");
        assert_eq!(config.timeouts.redirect_long_ms, 2000);
        assert_eq!(config.timeouts.popup_short_ms, 2000);
        assert!(config.environment.mobile);
        assert!(config.environment.online);
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_manager_options_pick_mobile_delay() {
        let mut config = RelayConfig::default();
        config.environment.mobile = true;
        let options = config.manager_options().unwrap();
        assert_eq!(
            options.redirect_delay.get(&options.environment),
            Duration::from_secs(60)
        );
        assert_eq!(options.dedup_window, Duration::from_secs(600));
    }

    #[test]
    fn test_manager_key_includes_emulator() {
        let mut config = RelayConfig::default();
        config.app.api_key = "k".to_string();
        assert_eq!(config.manager_key().storage_key(), "k:[DEFAULT]");

        config.app.emulator_url = Some("http://localhost:9099".to_string());
        assert_eq!(
            config.manager_key().storage_key(),
            "k:[DEFAULT]:http://localhost:9099"
        );
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = RelayConfig::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.app.app_name, "[DEFAULT]");
    }

    #[test]
    #[serial]
    fn test_load_from_file_then_cli_overrides() {
        let (_dir, path) = temp_config_file("logging:\n  level: warn\n");

        let cli = crate::cli::Cli {
            verbose: true,
            mobile: true,
            ..Default::default()
        };
        let config = RelayConfig::load(path.to_str().unwrap(), &cli).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.environment.mobile);
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_is_config_error() {
        let (_dir, path) = temp_config_file("timeouts: [not, a, map]\n");

        let err = RelayConfig::load(path.to_str().unwrap(), &crate::cli::Cli::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_and_ignores_invalid() {
        std::env::set_var("SIGNIN_RELAY_APP_NAME", "env-app");
        std::env::set_var("SIGNIN_RELAY_REDIRECT_SHORT_MS", "1500");
        std::env::set_var("SIGNIN_RELAY_MAILBOX_CAPACITY", "many");
        std::env::set_var("SIGNIN_RELAY_ONLINE", "false");

        let mut config = RelayConfig::default();
        config.apply_env_vars();

        assert_eq!(config.app.app_name, "env-app");
        assert_eq!(config.timeouts.redirect_short_ms, 1500);
        assert_eq!(config.mailbox.capacity, 16);
        assert!(!config.environment.online);

        std::env::remove_var("SIGNIN_RELAY_APP_NAME");
        std::env::remove_var("SIGNIN_RELAY_REDIRECT_SHORT_MS");
        std::env::remove_var("SIGNIN_RELAY_MAILBOX_CAPACITY");
        std::env::remove_var("SIGNIN_RELAY_ONLINE");
    }
}
