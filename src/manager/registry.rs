//! Manager registry
//!
//! One [`EventManager`] exists per app identity. The registry is owned by
//! the application's composition root and hands out shared handles through
//! [`ManagerRegistry::get_or_create`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::{EventManager, ManagerOptions};
use crate::channel::{ChannelFactory, SignInChannel};
use crate::storage::RedirectFlagStore;

/// Separator between key components.
const KEY_SEPARATOR: char = ':';

/// Local emulator the app talks to instead of production.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Emulator base URL, e.g. `http://localhost:9099`
    pub url: String,
}

/// Identity of an app for manager lookup.
///
/// The auth domain is carried for channel construction but is not part of
/// the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerKey {
    /// Domain hosting the sign-in relay
    pub auth_domain: String,
    /// Project API key
    pub api_key: String,
    /// App instance name
    pub app_name: String,
    /// Emulator, if any
    pub emulator: Option<EmulatorConfig>,
}

impl ManagerKey {
    /// Creates a key without an emulator.
    pub fn new(
        auth_domain: impl Into<String>,
        api_key: impl Into<String>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            auth_domain: auth_domain.into(),
            api_key: api_key.into(),
            app_name: app_name.into(),
            emulator: None,
        }
    }

    /// Sets the emulator.
    pub fn with_emulator(mut self, emulator: EmulatorConfig) -> Self {
        self.emulator = Some(emulator);
        self
    }

    /// Storage key: `apiKey:appName`, plus `:emulatorUrl` when emulated.
    ///
    /// # Examples
    ///
    /// ```
    /// use signin_relay::manager::{EmulatorConfig, ManagerKey};
    ///
    /// let key = ManagerKey::new("app.example.com", "AIza", "[DEFAULT]");
    /// assert_eq!(key.storage_key(), "AIza:[DEFAULT]");
    ///
    /// let key = key.with_emulator(EmulatorConfig { url: "http://localhost:9099".into() });
    /// assert_eq!(key.storage_key(), "AIza:[DEFAULT]:http://localhost:9099");
    /// ```
    pub fn storage_key(&self) -> String {
        let mut key = format!("{}{KEY_SEPARATOR}{}", self.api_key, self.app_name);
        if let Some(emulator) = &self.emulator {
            key.push(KEY_SEPARATOR);
            key.push_str(&emulator.url);
        }
        key
    }
}

impl fmt::Display for ManagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Builds channels for a given app identity.
pub type KeyedChannelFactory = Arc<dyn Fn(&ManagerKey) -> Arc<dyn SignInChannel> + Send + Sync>;

/// Memoized [`EventManager`]s keyed by [`ManagerKey::storage_key`].
pub struct ManagerRegistry {
    channel_factory: KeyedChannelFactory,
    flag_store: Arc<dyn RedirectFlagStore>,
    options: ManagerOptions,
    managers: Mutex<HashMap<String, EventManager>>,
}

impl fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("managers", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

impl ManagerRegistry {
    /// Creates an empty registry. Every manager it creates shares
    /// `flag_store` and `options`.
    pub fn new(
        channel_factory: KeyedChannelFactory,
        flag_store: Arc<dyn RedirectFlagStore>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            channel_factory,
            flag_store,
            options,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the manager for `key`, creating it on first use.
    ///
    /// Keys that differ only in auth domain share a manager.
    pub fn get_or_create(&self, key: &ManagerKey) -> EventManager {
        let storage_key = key.storage_key();
        let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        managers
            .entry(storage_key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %storage_key, "Creating event manager");
                let factory: ChannelFactory = {
                    let build = Arc::clone(&self.channel_factory);
                    let key = key.clone();
                    Arc::new(move || build(&key))
                };
                EventManager::new(
                    storage_key.clone(),
                    factory,
                    Arc::clone(&self.flag_store),
                    self.options,
                )
            })
            .clone()
    }

    /// Number of managers created so far.
    pub fn len(&self) -> usize {
        self.managers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no manager has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
