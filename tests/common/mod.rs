use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use signin_relay::channel::memory::MemoryChannelOptions;
use signin_relay::channel::{ChannelFactory, MemoryChannel, SignInChannel};
use signin_relay::manager::{EventManager, ManagerOptions};
use signin_relay::storage::{MemoryFlagStore, RedirectFlagStore};

pub const KEY: &str = "api-key:[DEFAULT]";

pub type MadeChannels = Arc<Mutex<Vec<MemoryChannel>>>;

#[allow(dead_code)]
pub fn recording_factory(options: MemoryChannelOptions) -> (ChannelFactory, MadeChannels) {
    let made: MadeChannels = Arc::new(Mutex::new(Vec::new()));
    let factory: ChannelFactory = {
        let made = Arc::clone(&made);
        Arc::new(move || {
            let channel = MemoryChannel::with_options(options.clone());
            made.lock().unwrap().push(channel.clone());
            Arc::new(channel) as Arc<dyn SignInChannel>
        })
    };
    (factory, made)
}

#[allow(dead_code)]
pub fn latest(made: &MadeChannels) -> MemoryChannel {
    made.lock()
        .unwrap()
        .last()
        .cloned()
        .expect("factory has not built a channel")
}

/// Manager over `MemoryChannel`s built from `options`, with a fresh
/// in-memory flag store.
#[allow(dead_code)]
pub fn manager_with(options: MemoryChannelOptions) -> (EventManager, MadeChannels) {
    manager_with_store(options, Arc::new(MemoryFlagStore::new()))
}

#[allow(dead_code)]
pub fn manager_with_store(
    options: MemoryChannelOptions,
    store: Arc<dyn RedirectFlagStore>,
) -> (EventManager, MadeChannels) {
    let (factory, made) = recording_factory(options);
    let manager = EventManager::new(KEY, factory, store, ManagerOptions::default());
    (manager, made)
}

/// Options for a channel with volatile storage, so the redirect slot starts
/// unresolved.
#[allow(dead_code)]
pub fn volatile() -> MemoryChannelOptions {
    MemoryChannelOptions {
        volatile_storage: true,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
