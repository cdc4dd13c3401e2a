//! Sign-in channel abstraction
//!
//! The channel is the out-of-process collaborator that embeds the sign-in
//! relay, starts popup and redirect flows, and reports each callback as an
//! [`AuthEvent`]. This module defines the [`SignInChannel`] trait the manager
//! drives, plus the pieces shared by every implementation:
//!
//! - [`EventSink`] / [`Mailbox`] -- a bounded mailbox carrying events from the
//!   channel to the manager's single dispatcher task, one at a time, with a
//!   per-event acknowledgement ("an owner was found, safe to discard").
//! - [`Delay`] -- environment-dependent timeout durations.
//! - [`PopupHandle`] and [`ProviderRequest`] -- opaque inputs to the flows.
//!
//! Concrete implementations live in submodules:
//!
//! - [`memory::MemoryChannel`] -- in-process channel used by the replay
//!   command and tests.
//!
//! # Channel Wiring
//!
//! ```text
//! channel deliver() --> EventSink --> Mailbox --> dispatcher task --> EventManager::dispatch
//!        ^                                               |
//!        +------------------ ack (bool) -----------------+
//! ```

pub mod memory;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{AuthError, RelayError, Result};
use crate::event::{AuthEvent, AuthEventType};

pub use memory::MemoryChannel;

/// Default mailbox capacity between a channel and its dispatcher.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// Builds a fresh channel instance; called once at startup and on every
/// reset.
pub type ChannelFactory = Arc<dyn Fn() -> Arc<dyn SignInChannel> + Send + Sync>;

/// Abstraction over the embedded sign-in relay.
///
/// All flow-starting methods return typed [`AuthError`]s so that failures can
/// be delivered to waiting callers unchanged.
#[async_trait]
pub trait SignInChannel: Send + Sync + std::fmt::Debug {
    /// Embeds the relay and waits until it is ready to deliver events.
    async fn initialize_and_wait(&self) -> std::result::Result<(), AuthError>;

    /// Attaches the sink events are delivered to. Replaces any previous sink.
    fn add_event_listener(&self, sink: EventSink);

    /// Detaches the current sink, if any.
    fn remove_event_listener(&self);

    /// Starts a popup flow in `popup`.
    async fn process_popup(
        &self,
        popup: &PopupHandle,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        already_redirected: bool,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError>;

    /// Starts a full-page redirect flow.
    async fn process_redirect(
        &self,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError>;

    /// Resolves with the error to report once `popup` is detected closed
    /// (followed by `delay`) or the relay reports a capability failure.
    async fn start_popup_timeout(&self, popup: &PopupHandle, delay: Duration) -> AuthError;

    /// Whether the relay must be embedded on startup even when no redirect is
    /// pending.
    fn should_be_initialized_early(&self) -> bool;

    /// Whether the redirect flag may be lost between loads, so "no pending
    /// redirect" cannot be trusted.
    fn has_volatile_storage(&self) -> bool;

    /// Whether starting a redirect unloads the current process/page.
    fn unloads_on_redirect(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// One event in transit, with the channel waiting on its acknowledgement.
#[derive(Debug)]
pub struct Delivery {
    /// The event, or `None` when the relay produced nothing parseable.
    pub event: Option<AuthEvent>,
    /// Receives `true` when an owner was found.
    pub ack: oneshot::Sender<bool>,
}

/// Channel-side handle of the event mailbox.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Delivery>,
}

/// Manager-side end of the event mailbox.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Delivery>,
}

impl EventSink {
    /// Creates a connected `(EventSink, Mailbox)` pair holding at most
    /// `capacity` undelivered events.
    ///
    /// # Examples
    ///
    /// ```
    /// use signin_relay::channel::EventSink;
    ///
    /// let (sink, _mailbox) = EventSink::mailbox(4);
    /// assert!(!sink.is_closed());
    /// ```
    pub fn mailbox(capacity: usize) -> (EventSink, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (EventSink { tx }, Mailbox { rx })
    }

    /// Delivers `event` and waits for the dispatcher's verdict.
    ///
    /// Returns `Ok(true)` if an owner claimed the event, `Ok(false)` if it
    /// was a duplicate, unowned, or rejected as invalid.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidAuthEvent`] if the listener was detached
    /// or the dispatcher stopped before answering.
    pub async fn deliver(&self, event: Option<AuthEvent>) -> Result<bool> {
        let (ack, verdict) = oneshot::channel();
        self.tx
            .send(Delivery { event, ack })
            .await
            .map_err(|_| RelayError::InvalidAuthEvent("event listener detached".to_string()))?;
        verdict.await.map_err(|_| {
            RelayError::InvalidAuthEvent("dispatcher stopped before acknowledging".to_string())
                .into()
        })
    }

    /// Whether the dispatcher side has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Mailbox {
    /// Receives the next delivery, or `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Flow inputs
// ---------------------------------------------------------------------------

/// Opaque handle to a popup window opened for a sign-in attempt.
///
/// Clones share the same closed flag.
#[derive(Debug, Clone)]
pub struct PopupHandle {
    id: Uuid,
    closed: Arc<AtomicBool>,
}

impl PopupHandle {
    /// Creates a handle for a newly opened popup.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identifier of the popup.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Marks the popup as closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the popup has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for PopupHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity provider request handed through to the channel untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// Provider identifier, e.g. `google.com`
    pub provider_id: String,
    /// Requested OAuth scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Extra provider-specific parameters
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl ProviderRequest {
    /// Creates a request for `provider_id` with no scopes.
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Runtime facts that decide which timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentProfile {
    /// Running on a mobile device
    pub mobile: bool,
    /// Network believed reachable
    pub online: bool,
    /// Cap applied when offline
    pub offline_delay: Duration,
}

impl Default for EnvironmentProfile {
    fn default() -> Self {
        Self {
            mobile: false,
            online: true,
            offline_delay: Duration::from_secs(5),
        }
    }
}

/// A timeout with a short (desktop) and a long (mobile) duration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use signin_relay::channel::{Delay, EnvironmentProfile};
///
/// let delay = Delay::new(Duration::from_secs(30), Duration::from_secs(60)).unwrap();
/// let mobile = EnvironmentProfile { mobile: true, ..Default::default() };
/// assert_eq!(delay.get(&mobile), Duration::from_secs(60));
///
/// let offline = EnvironmentProfile { online: false, ..Default::default() };
/// assert_eq!(delay.get(&offline), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delay {
    short: Duration,
    long: Duration,
}

impl Delay {
    /// Redirect result timeout: 30s desktop, 60s mobile.
    pub const REDIRECT: Delay = Delay {
        short: Duration::from_secs(30),
        long: Duration::from_secs(60),
    };

    /// Popup close-detection timeout: 2s desktop, 10s mobile.
    pub const POPUP: Delay = Delay {
        short: Duration::from_secs(2),
        long: Duration::from_secs(10),
    };

    /// Creates a delay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `short` exceeds `long`.
    pub fn new(short: Duration, long: Duration) -> Result<Self> {
        if short > long {
            return Err(RelayError::Config(format!(
                "short delay ({short:?}) must not exceed long delay ({long:?})"
            ))
            .into());
        }
        Ok(Self { short, long })
    }

    /// Shortest duration this delay can yield online.
    pub fn short(&self) -> Duration {
        self.short
    }

    /// Longest duration this delay can yield.
    pub fn long(&self) -> Duration {
        self.long
    }

    /// Duration matching the environment.
    ///
    /// Offline picks the smaller of the offline cap and the short delay, so a
    /// dead network is detected quickly.
    pub fn get(&self, env: &EnvironmentProfile) -> Duration {
        if !env.online {
            return env.offline_delay.min(self.short);
        }
        if env.mobile {
            self.long
        } else {
            self.short
        }
    }
}
