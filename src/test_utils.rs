//! Test utilities for signin-relay
//!
//! Channel factories that remember what they built, plus temporary
//! configuration files.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::channel::memory::MemoryChannelOptions;
use crate::channel::{ChannelFactory, MemoryChannel, SignInChannel};

/// Channels built by a [`recording_factory`], oldest first.
pub type MadeChannels = Arc<Mutex<Vec<MemoryChannel>>>;

/// Factory handing out `MemoryChannel`s built from `options`, remembering
/// each instance so tests can drive it.
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

/// The most recently built channel.
///
/// # Panics
///
/// Panics if the factory has not been called yet.
pub fn latest(made: &MadeChannels) -> MemoryChannel {
    made.lock()
        .unwrap()
        .last()
        .cloned()
        .expect("factory has not built a channel")
}

/// Write `contents` to `config.yaml` in a fresh temporary directory.
///
/// # Panics
///
/// Panics if the directory or file cannot be created.
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, contents).expect("Failed to write config file");
    (dir, path)
}
