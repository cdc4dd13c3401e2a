//! In-process sign-in channel
//!
//! [`MemoryChannel`] stands in for an embedded relay. Tests and the replay
//! command queue callback events on it; once the channel is initialized and
//! a listener is attached, queued events are delivered one at a time through
//! the listener's [`EventSink`]. Initialization and flow-start failures can
//! be scripted, and every started flow is recorded for inspection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{EventSink, PopupHandle, ProviderRequest, SignInChannel};
use crate::error::{AuthError, AuthErrorCode, RelayError, Result};
use crate::event::{AuthEvent, AuthEventType};

/// How often a popup is polled for close-detection.
const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment traits a [`MemoryChannel`] reports to the manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelOptions {
    /// Reported by [`SignInChannel::should_be_initialized_early`]
    pub initialize_early: bool,
    /// Reported by [`SignInChannel::has_volatile_storage`]
    pub volatile_storage: bool,
    /// Reported by [`SignInChannel::unloads_on_redirect`]
    pub unloads_on_redirect: bool,
    /// Failure returned by every `initialize_and_wait` call
    pub init_error: Option<AuthError>,
    /// Failure returned by every flow start
    pub flow_error: Option<AuthError>,
    /// Reported by popup timeouts instead of waiting for close
    pub storage_unsupported: bool,
}

/// A flow started through the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedFlow {
    /// Flow type
    pub event_type: AuthEventType,
    /// Provider the flow was started for
    pub provider_id: String,
    /// Attempt identifier
    pub event_id: Option<String>,
    /// Tenant identifier
    pub tenant_id: Option<String>,
}

#[derive(Debug, Default)]
struct ChannelState {
    listener: Option<EventSink>,
    queued: VecDeque<Option<AuthEvent>>,
    flushing: bool,
    started: Vec<StartedFlow>,
}

/// In-process [`SignInChannel`].
///
/// # Examples
///
/// ```
/// use signin_relay::channel::{MemoryChannel, SignInChannel};
/// use signin_relay::event::{AuthEvent, AuthEventType};
///
/// let channel = MemoryChannel::new();
/// channel.queue(AuthEvent::new(AuthEventType::Unknown));
/// assert_eq!(channel.queued_len(), 1);
/// assert!(!channel.should_be_initialized_early());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    options: Arc<MemoryChannelOptions>,
    ready: Arc<AtomicBool>,
    init_calls: Arc<AtomicUsize>,
    state: Arc<Mutex<ChannelState>>,
}

impl MemoryChannel {
    /// Creates a browser-like channel: lazy init, durable storage, unloads
    /// on redirect.
    pub fn new() -> Self {
        Self::with_options(MemoryChannelOptions {
            unloads_on_redirect: true,
            ..Default::default()
        })
    }

    /// Creates a channel with explicit options.
    pub fn with_options(options: MemoryChannelOptions) -> Self {
        Self {
            options: Arc::new(options),
            ready: Arc::new(AtomicBool::new(false)),
            init_calls: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(Mutex::new(ChannelState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an event for delivery once the channel is ready and a
    /// listener is attached.
    pub fn queue(&self, event: AuthEvent) {
        self.state().queued.push_back(Some(event));
        self.flush();
    }

    /// Queues a null delivery, a relay contract violation.
    pub fn queue_null(&self) {
        self.state().queued.push_back(None);
        self.flush();
    }

    /// Delivers `event` right away through the attached listener.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidAuthEvent`] if no listener is attached or
    /// the dispatcher is gone.
    pub async fn emit(&self, event: AuthEvent) -> Result<bool> {
        self.emit_raw(Some(event)).await
    }

    /// Like [`MemoryChannel::emit`], but can also deliver a null event.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidAuthEvent`] if no listener is attached or
    /// the dispatcher is gone.
    pub async fn emit_raw(&self, event: Option<AuthEvent>) -> Result<bool> {
        let sink = self.state().listener.clone().ok_or_else(|| {
            RelayError::InvalidAuthEvent("no event listener attached".to_string())
        })?;
        sink.deliver(event).await
    }

    /// Number of events not yet delivered.
    pub fn queued_len(&self) -> usize {
        self.state().queued.len()
    }

    /// Whether a listener is currently attached.
    pub fn has_listener(&self) -> bool {
        self.state().listener.is_some()
    }

    /// Number of `initialize_and_wait` calls.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Flows started so far.
    pub fn started_flows(&self) -> Vec<StartedFlow> {
        self.state().started.clone()
    }

    fn record_flow(
        &self,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        tenant_id: Option<&str>,
    ) {
        self.state().started.push(StartedFlow {
            event_type,
            provider_id: provider.provider_id.clone(),
            event_id: event_id.map(str::to_string),
            tenant_id: tenant_id.map(str::to_string),
        });
    }

    /// Starts a background drain of the queue if the channel is ready, a
    /// listener is attached, and no drain is running.
    fn flush(&self) {
        if !self.ready.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state();
            if state.flushing || state.listener.is_none() || state.queued.is_empty() {
                return;
            }
            state.flushing = true;
        }
        let channel = self.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut state = channel.state();
                    match (state.listener.clone(), state.queued.pop_front()) {
                        (Some(sink), Some(event)) => Some((sink, event)),
                        (None, Some(event)) => {
                            state.queued.push_front(event);
                            None
                        }
                        _ => None,
                    }
                };
                let Some((sink, event)) = next else {
                    channel.state().flushing = false;
                    break;
                };
                match sink.deliver(event).await {
                    Ok(claimed) => tracing::trace!(claimed, "Memory channel delivered event"),
                    Err(e) => tracing::debug!("Memory channel delivery failed: {e}"),
                }
            }
        });
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignInChannel for MemoryChannel {
    async fn initialize_and_wait(&self) -> std::result::Result<(), AuthError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.options.init_error {
            return Err(error.clone());
        }
        self.ready.store(true, Ordering::SeqCst);
        self.flush();
        Ok(())
    }

    fn add_event_listener(&self, sink: EventSink) {
        self.state().listener = Some(sink);
        self.flush();
    }

    fn remove_event_listener(&self) {
        self.state().listener = None;
    }

    async fn process_popup(
        &self,
        _popup: &PopupHandle,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        _already_redirected: bool,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError> {
        self.initialize_and_wait().await?;
        if let Some(error) = &self.options.flow_error {
            return Err(error.clone());
        }
        self.record_flow(event_type, provider, event_id, tenant_id);
        Ok(())
    }

    async fn process_redirect(
        &self,
        event_type: AuthEventType,
        provider: &ProviderRequest,
        event_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> std::result::Result<(), AuthError> {
        if let Some(error) = &self.options.flow_error {
            return Err(error.clone());
        }
        self.record_flow(event_type, provider, event_id, tenant_id);
        Ok(())
    }

    async fn start_popup_timeout(&self, popup: &PopupHandle, delay: Duration) -> AuthError {
        if self.options.storage_unsupported {
            return AuthError::new(AuthErrorCode::WebStorageUnsupported);
        }
        while !popup.is_closed() {
            tokio::time::sleep(POPUP_POLL_INTERVAL).await;
        }
        // Give an in-flight callback a chance to land before failing.
        tokio::time::sleep(delay).await;
        AuthError::new(AuthErrorCode::PopupClosedByUser)
    }

    fn should_be_initialized_early(&self) -> bool {
        self.options.initialize_early
    }

    fn has_volatile_storage(&self) -> bool {
        self.options.volatile_storage
    }

    fn unloads_on_redirect(&self) -> bool {
        self.options.unloads_on_redirect
    }
}
