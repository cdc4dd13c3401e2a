//! signin-relay - sign-in event correlation library
//!
//! This library correlates asynchronous sign-in callback events delivered by
//! an embedded relay with the callers waiting on them. Popup flows resolve
//! the consumer that started them; redirect flows resolve a single shared
//! slot that any number of callers can await.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `event`: Auth event model and the dedup cache
//! - `consumer`: Consumer trait implemented by sign-in flows
//! - `channel`: Sign-in channel abstraction, mailbox and in-process channel
//! - `storage`: Persistent pending-redirect flag
//! - `processor`: Redirect and popup processors
//! - `manager`: Event manager and the per-app registry
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use signin_relay::channel::{MemoryChannel, SignInChannel};
//! use signin_relay::manager::{ManagerKey, ManagerOptions, ManagerRegistry};
//! use signin_relay::storage::MemoryFlagStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ManagerRegistry::new(
//!         Arc::new(|_key: &ManagerKey| Arc::new(MemoryChannel::new()) as Arc<dyn SignInChannel>),
//!         Arc::new(MemoryFlagStore::new()),
//!         ManagerOptions::default(),
//!     );
//!     let manager = registry.get_or_create(&ManagerKey::new("example.firebaseapp.com", "key", "app"));
//!     let outcome = manager.get_redirect_result().await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod logging;
pub mod manager;
pub mod processor;
pub mod storage;

// Re-export commonly used types
pub use config::RelayConfig;
pub use consumer::Consumer;
pub use error::{AuthError, AuthErrorCode, RelayError, Result};
pub use event::{AuthEvent, AuthEventType, SignInOutcome};
pub use manager::{EventManager, ManagerKey, ManagerOptions, ManagerRegistry};

#[cfg(test)]
pub mod test_utils;
