//! Event manager
//!
//! The [`EventManager`] is the single entry point for sign-in callback
//! events. It owns consumer registration, duplicate suppression, routing to
//! the redirect and popup processors, and the lifecycle of the sign-in
//! channel that produces events.
//!
//! Callers interact with it through three groups of methods:
//!
//! - [`EventManager::subscribe`] / [`EventManager::unsubscribe`] -- register
//!   consumers; the first subscription also performs startup (pending
//!   redirect check and channel initialization).
//! - [`EventManager::process_popup`] / [`EventManager::process_redirect`] /
//!   [`EventManager::start_popup_timeout`] -- start flows through the
//!   current channel.
//! - [`EventManager::get_redirect_result`] /
//!   [`EventManager::clear_redirect_result`] -- read the redirect slot.
//!
//! Events reach [`EventManager::dispatch`] through a bounded mailbox drained
//! by one dispatcher task per channel instance, so delivery is serial.
//!
//! # Module Layout
//!
//! - [`registry`] -- memoized managers keyed by app identity

pub mod registry;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{
    ChannelFactory, Delay, EnvironmentProfile, EventSink, Mailbox, PopupHandle, ProviderRequest,
    SignInChannel, DEFAULT_MAILBOX_CAPACITY,
};
use crate::consumer::Consumer;
use crate::error::{AuthError, AuthErrorCode, RelayError, Result};
use crate::event::dedup::DEFAULT_DEDUP_WINDOW;
use crate::event::{AuthEvent, AuthEventType, DedupCache};
use crate::processor::{
    Completion, EventProcessor, PopupProcessor, RedirectOutcome, RedirectProcessor,
};
use crate::storage::RedirectFlagStore;

pub use registry::{EmulatorConfig, ManagerKey, ManagerRegistry};

/// Tunables for an [`EventManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Bulk-clear window of the dedup cache
    pub dedup_window: Duration,
    /// Redirect result timeout
    pub redirect_delay: Delay,
    /// Grace period after a popup is detected closed
    pub popup_delay: Delay,
    /// Runtime facts used to pick between short and long delays
    pub environment: EnvironmentProfile,
    /// Undelivered events buffered between channel and dispatcher
    pub mailbox_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            redirect_delay: Delay::REDIRECT,
            popup_delay: Delay::POPUP,
            environment: EnvironmentProfile::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// EventManager
// ---------------------------------------------------------------------------

struct ManagerState {
    consumers: Vec<Arc<dyn Consumer>>,
    dedup: DedupCache,
    /// Startup (pending-redirect check) has begun for this generation.
    startup_begun: bool,
    /// The dispatcher is attached to the current channel.
    initialized: bool,
    /// Bumped on every reset; identifies the current channel instance.
    generation: u64,
    channel: Arc<dyn SignInChannel>,
    /// Stops the dispatcher attached to the current channel.
    listener: Option<CancellationToken>,
}

struct ManagerInner {
    key: String,
    options: ManagerOptions,
    channel_factory: ChannelFactory,
    flag_store: Arc<dyn RedirectFlagStore>,
    redirect: RedirectProcessor,
    popup: PopupProcessor,
    state: Mutex<ManagerState>,
}

/// Correlates sign-in callback events with the consumers waiting on them.
///
/// Cloning yields another handle to the same manager.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use signin_relay::channel::{ChannelFactory, MemoryChannel, SignInChannel};
/// use signin_relay::consumer::{Consumer, ScriptedConsumer};
/// use signin_relay::event::{AuthEvent, AuthEventType};
/// use signin_relay::manager::{EventManager, ManagerOptions};
/// use signin_relay::storage::MemoryFlagStore;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let channel = MemoryChannel::new();
/// let factory: ChannelFactory = {
///     let channel = channel.clone();
///     Arc::new(move || Arc::new(channel.clone()) as Arc<dyn SignInChannel>)
/// };
/// let manager = EventManager::new(
///     "key:[DEFAULT]",
///     factory,
///     Arc::new(MemoryFlagStore::new()),
///     ManagerOptions::default(),
/// );
///
/// let consumer: Arc<dyn Consumer> = Arc::new(ScriptedConsumer::new([AuthEventType::Unknown]));
/// manager.subscribe(consumer).await;
/// manager.initialize().await?;
///
/// assert!(channel.emit(AuthEvent::new(AuthEventType::Unknown)).await?);
/// assert!(manager.get_redirect_result().await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("EventManager")
            .field("key", &self.inner.key)
            .field("consumers", &state.consumers.len())
            .field("initialized", &state.initialized)
            .field("generation", &state.generation)
            .finish()
    }
}

impl EventManager {
    /// Creates a manager for `key`.
    ///
    /// `channel_factory` is called once now and again after every reset.
    ///
    /// # Arguments
    ///
    /// * `key` - Storage key (`apiKey:appName[:emulatorUrl]`), also used for
    ///   the redirect flag
    /// * `channel_factory` - Builds fresh channel instances
    /// * `flag_store` - Persists the "redirect in flight" flag
    /// * `options` - Delays, dedup window and mailbox capacity
    pub fn new(
        key: impl Into<String>,
        channel_factory: ChannelFactory,
        flag_store: Arc<dyn RedirectFlagStore>,
        options: ManagerOptions,
    ) -> Self {
        let channel = channel_factory();
        let redirect = RedirectProcessor::new(options.redirect_delay.get(&options.environment));
        Self {
            inner: Arc::new(ManagerInner {
                key: key.into(),
                options,
                channel_factory,
                flag_store,
                redirect,
                popup: PopupProcessor::new(),
                state: Mutex::new(ManagerState {
                    consumers: Vec::new(),
                    dedup: DedupCache::new(options.dedup_window),
                    startup_begun: false,
                    initialized: false,
                    generation: 0,
                    channel,
                    listener: None,
                }),
            }),
        }
    }

    /// Storage key this manager was created for.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Options this manager was created with.
    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    /// The redirect slot.
    pub fn redirect_processor(&self) -> &RedirectProcessor {
        &self.inner.redirect
    }

    /// The channel instance currently in use.
    pub fn channel(&self) -> Arc<dyn SignInChannel> {
        Arc::clone(&self.state().channel)
    }

    /// Identifier of the current channel instance.
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Whether the dispatcher is attached to the current channel.
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    /// Registers `consumer`. Adding the same consumer twice is a no-op.
    ///
    /// The first subscription after construction or reset also runs startup:
    /// a redirect flag left by a previous load is cleared and the channel is
    /// initialized; otherwise the channel is initialized only if it asks to
    /// be, and the redirect slot defaults to empty unless the channel's
    /// storage is volatile. Startup failures are logged, never returned.
    pub async fn subscribe(&self, consumer: Arc<dyn Consumer>) {
        let run_startup = {
            let mut state = self.state();
            if !state.consumers.iter().any(|c| Arc::ptr_eq(c, &consumer)) {
                state.consumers.push(consumer);
            }
            if state.initialized || state.startup_begun {
                false
            } else {
                state.startup_begun = true;
                true
            }
        };
        if run_startup {
            self.startup().await;
        }
    }

    /// Removes `consumer`. Safe if it was never subscribed.
    pub fn unsubscribe(&self, consumer: &Arc<dyn Consumer>) {
        self.state().consumers.retain(|c| !Arc::ptr_eq(c, consumer));
    }

    /// Whether `consumer` is subscribed.
    pub fn is_subscribed(&self, consumer: &Arc<dyn Consumer>) -> bool {
        self.state().consumers.iter().any(|c| Arc::ptr_eq(c, consumer))
    }

    async fn startup(&self) {
        let key = self.inner.key.as_str();
        let pending = match self.inner.flag_store.get_pending_status(key).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(key, "Failed to read redirect flag, assuming none: {e:#}");
                false
            }
        };

        if !pending {
            self.initialize_with_no_pending_redirect().await;
            return;
        }

        tracing::info!(key, "Redirect pending from previous load");
        if let Err(e) = self.inner.flag_store.remove_pending_status(key).await {
            tracing::warn!(key, "Failed to clear redirect flag: {e:#}");
        }
        if let Err(e) = self.initialize().await {
            self.handle_startup_failure(e);
        }
    }

    async fn initialize_with_no_pending_redirect(&self) {
        let channel = self.channel();
        if !channel.has_volatile_storage() {
            self.inner.redirect.default_to_empty_response();
        }
        if channel.should_be_initialized_early() {
            if let Err(e) = self.initialize().await {
                self.handle_startup_failure(e);
            }
        }
    }

    /// A channel wrongly assumed to be available reports `cordova-not-ready`;
    /// replay that as an operation-not-supported event so redirect callers
    /// get a typed rejection.
    fn handle_startup_failure(&self, error: AuthError) {
        if error.code != AuthErrorCode::CordovaNotReady {
            tracing::warn!(key = %self.inner.key, code = %error.code, "Channel initialization failed: {error}");
            return;
        }
        tracing::warn!(key = %self.inner.key, "Channel misdetected; reporting operation not supported");
        let event = AuthEvent::failed(
            AuthEventType::Unknown,
            AuthError::new(AuthErrorCode::OperationNotSupported),
        );
        if let Err(e) = self.dispatch(Some(event)) {
            tracing::error!("Failed to dispatch misdetection event: {e:#}");
        }
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// Attaches the dispatcher (once) and waits for the channel to be ready.
    ///
    /// # Errors
    ///
    /// Returns the channel's error. The manager is reset first unless a
    /// newer channel instance has already replaced the failing one.
    pub async fn initialize(&self) -> std::result::Result<(), AuthError> {
        let (channel, generation) = {
            let mut state = self.state();
            if !state.initialized {
                state.initialized = true;
                self.attach_listener(&mut state);
            }
            (Arc::clone(&state.channel), state.generation)
        };

        if let Err(e) = channel.initialize_and_wait().await {
            self.reset_if_current(generation);
            return Err(e);
        }
        tracing::info!(key = %self.inner.key, generation, "Channel ready");
        Ok(())
    }

    /// Detaches from the current channel, replaces it with a fresh instance
    /// and forgets processed events.
    pub fn reset(&self) {
        let mut state = self.state();
        self.reset_locked(&mut state);
    }

    fn reset_if_current(&self, generation: u64) {
        let mut state = self.state();
        if state.generation != generation {
            tracing::debug!(
                generation,
                current = state.generation,
                "Stale channel failed; leaving replacement alone"
            );
            return;
        }
        self.reset_locked(&mut state);
    }

    fn reset_locked(&self, state: &mut ManagerState) {
        state.initialized = false;
        state.startup_begun = false;
        if let Some(listener) = state.listener.take() {
            listener.cancel();
        }
        state.channel.remove_event_listener();
        state.channel = (self.inner.channel_factory)();
        state.generation += 1;
        state.dedup.clear();
        tracing::info!(key = %self.inner.key, generation = state.generation, "Event manager reset");
    }

    fn attach_listener(&self, state: &mut ManagerState) {
        if state.listener.is_some() {
            return;
        }
        let (sink, mailbox) = EventSink::mailbox(self.inner.options.mailbox_capacity);
        let cancellation = CancellationToken::new();
        state.channel.add_event_listener(sink);
        start_dispatch_loop(mailbox, cancellation.clone(), Arc::downgrade(&self.inner));
        state.listener = Some(cancellation);
        tracing::debug!(generation = state.generation, "Dispatcher attached");
    }

    fn attach_if_current(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation && !state.initialized {
            state.initialized = true;
            self.attach_listener(&mut state);
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Routes one event to its owner.
    ///
    /// Returns `true` iff a subscribed consumer claimed the event, even if
    /// processing it later fails; the channel may then discard it upstream.
    /// Duplicates of an already processed `uid` inside the dedup window
    /// return `false` without reaching any consumer. The redirect slot
    /// defaults to empty afterwards if nothing has claimed it.
    ///
    /// Finisher round trips run in spawned tasks, so this must be called
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidAuthEvent`] for a null event.
    pub fn dispatch(&self, event: Option<AuthEvent>) -> Result<bool> {
        let Some(event) = event else {
            tracing::error!(key = %self.inner.key, "Channel delivered a null event");
            return Err(RelayError::InvalidAuthEvent("null event".to_string()).into());
        };

        let _span = crate::auth_event_span!(event).entered();
        let now = Instant::now();
        let consumers = {
            let mut state = self.state();
            if state.dedup.is_duplicate(&event, now) {
                tracing::debug!(uid = ?event.uid(), "Ignoring already processed event");
                return Ok(false);
            }
            state.consumers.clone()
        };

        let event_type = event.event_type;
        let event_id = event.event_id.as_deref();
        let owner = consumers
            .into_iter()
            .find(|c| c.can_handle(event_type, event_id));

        let claimed = match owner {
            Some(owner) => {
                match self.route(&event, &owner) {
                    Ok(completion) => {
                        tokio::spawn(completion);
                        tracing::debug!(%event_type, event_id = ?event_id, "Event routed");
                    }
                    Err(e) => {
                        tracing::warn!(%event_type, event_id = ?event_id, "Dropping event: {e}");
                    }
                }
                // Recorded even when the owner rejected it.
                self.state().dedup.record(&event, now);
                true
            }
            None => {
                tracing::debug!(%event_type, event_id = ?event_id, "No consumer owns event");
                false
            }
        };

        self.inner.redirect.default_to_empty_response();
        Ok(claimed)
    }

    fn route(
        &self,
        event: &AuthEvent,
        owner: &Arc<dyn Consumer>,
    ) -> std::result::Result<Completion, AuthError> {
        match EventProcessor::for_type(event.event_type) {
            EventProcessor::Redirect => self.inner.redirect.process(event, owner),
            EventProcessor::Popup => self.inner.popup.process(event, owner),
        }
    }

    // -----------------------------------------------------------------------
    // Flows
    // -----------------------------------------------------------------------

    /// Starts a popup flow through the current channel.
    ///
    /// Attaches the dispatcher on success.
    ///
    /// # Errors
    ///
    /// Returns the channel's error after resetting the manager, so the next
    /// attempt starts with a fresh channel.
    pub async fn process_popup(
        &self,
        popup: &PopupHandle,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        already_redirected: bool,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError> {
        let (channel, generation) = {
            let state = self.state();
            (Arc::clone(&state.channel), state.generation)
        };
        match channel
            .process_popup(popup, event_type, provider, event_id, already_redirected, tenant_id)
            .await
        {
            Ok(()) => {
                self.attach_if_current(generation);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%event_type, code = %e.code, "Popup flow failed to start");
                self.reset_if_current(generation);
                Err(e)
            }
        }
    }

    /// Starts a redirect flow through the current channel.
    ///
    /// The redirect flag is set before the flow starts and cleared if it
    /// fails. When the channel unloads on redirect the returned future never
    /// completes. Otherwise it completes once the redirect slot resolves;
    /// read the outcome with [`EventManager::get_redirect_result`].
    ///
    /// # Errors
    ///
    /// Returns the channel's error, `operation-not-supported` if the channel
    /// was misdetected, or `internal-error` if the flag cannot be written.
    pub async fn process_redirect(
        &self,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError> {
        let key = self.inner.key.as_str();
        if let Err(e) = self.inner.flag_store.set_pending_status(key).await {
            return Err(AuthError::with_message(
                AuthErrorCode::InternalError,
                format!("failed to persist redirect flag: {e:#}"),
            ));
        }

        let channel = self.channel();
        if let Err(e) = channel
            .process_redirect(event_type, provider, event_id, tenant_id)
            .await
        {
            if e.code == AuthErrorCode::CordovaNotReady {
                return Err(AuthError::new(AuthErrorCode::OperationNotSupported));
            }
            if let Err(remove) = self.inner.flag_store.remove_pending_status(key).await {
                tracing::warn!(key, "Failed to clear redirect flag: {remove:#}");
            }
            return Err(e);
        }

        if channel.unloads_on_redirect() {
            tracing::info!(%event_type, "Redirect started; awaiting unload");
            return futures::future::pending().await;
        }

        if let Err(e) = self.inner.flag_store.remove_pending_status(key).await {
            tracing::warn!(key, "Failed to clear redirect flag: {e:#}");
        }
        if let Err(e) = self.get_redirect_result().await {
            tracing::debug!(%event_type, "Redirect finished with error: {e}");
        }
        Ok(())
    }

    /// Reports a popup closed by the user (or a capability failure detected
    /// mid-flow) straight to `owner`, bypassing dispatch.
    ///
    /// Completes only when the channel detects the failure; callers usually
    /// spawn it and abort it once the popup resolves.
    pub async fn start_popup_timeout(
        &self,
        owner: Arc<dyn Consumer>,
        event_type: AuthEventType,
        popup: &PopupHandle,
        event_id: Option<&str>,
    ) {
        let delay = self.inner.options.popup_delay.get(&self.inner.options.environment);
        let error = self.channel().start_popup_timeout(popup, delay).await;
        tracing::debug!(%event_type, event_id = ?event_id, code = %error.code, "Popup timed out");
        owner.resolve_pending_popup(event_type, Err(error), event_id);
    }

    // -----------------------------------------------------------------------
    // Redirect slot
    // -----------------------------------------------------------------------

    /// Waits for the outcome of the last redirect.
    pub async fn get_redirect_result(&self) -> RedirectOutcome {
        self.inner.redirect.get_redirect_result().await
    }

    /// Forgets the redirect outcome unless it is a capability error.
    pub fn clear_redirect_result(&self) {
        self.inner.redirect.clear_redirect_result();
    }
}

// ---------------------------------------------------------------------------
// Dispatcher loop
// ---------------------------------------------------------------------------

/// Spawns the task that drains `mailbox` into [`EventManager::dispatch`], one
/// event at a time, acknowledging each delivery.
///
/// Stops when `cancellation` fires, when every sink is dropped, or when the
/// manager itself is gone.
fn start_dispatch_loop(
    mut mailbox: Mailbox,
    cancellation: CancellationToken,
    manager: Weak<ManagerInner>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                delivery = mailbox.recv() => {
                    let Some(delivery) = delivery else {
                        break;
                    };
                    let Some(inner) = manager.upgrade() else {
                        break;
                    };
                    let claimed = match (EventManager { inner }).dispatch(delivery.event) {
                        Ok(claimed) => claimed,
                        Err(e) => {
                            tracing::error!("Dispatch failed: {e:#}");
                            false
                        }
                    };
                    // The channel may have stopped waiting.
                    let _ = delivery.ack.send(claimed);
                }
            }
        }
    })
}
