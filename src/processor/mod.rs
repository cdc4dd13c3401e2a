//! Event processors
//!
//! A processor turns an owned [`AuthEvent`](crate::event::AuthEvent) into a
//! delivered outcome. The set is closed: redirect-flow events (and the
//! on-load `Unknown` probe) go to the single [`RedirectProcessor`], popup
//! events to the stateless [`PopupProcessor`].
//!
//! Processing is split in two. The synchronous step classifies the event,
//! updates processor state, and fails only when the owner cannot finish the
//! event at all. It returns a [`Completion`] that performs the finisher
//! round trip and captures its result; completions never fail.

pub mod popup;
pub mod redirect;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{AuthError, AuthErrorCode};
use crate::event::AuthEventType;

pub use popup::PopupProcessor;
pub use redirect::{RedirectOutcome, RedirectProcessor};

/// Deferred half of event processing. Always runs to completion.
pub type Completion = BoxFuture<'static, ()>;

/// A completion with nothing left to do.
pub(crate) fn completed() -> Completion {
    futures::future::ready(()).boxed()
}

/// The error a processor reports when routed an event its owner cannot
/// finish.
pub(crate) fn invalid_event(event_type: AuthEventType) -> AuthError {
    AuthError::with_message(
        AuthErrorCode::InvalidAuthEvent,
        format!("no finisher available for {event_type} event"),
    )
}

/// Which processor handles an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventProcessor {
    /// Redirect results and the on-load probe
    Redirect,
    /// Popup results
    Popup,
}

impl EventProcessor {
    /// Routing table from event type to processor.
    ///
    /// # Examples
    ///
    /// ```
    /// use signin_relay::event::AuthEventType;
    /// use signin_relay::processor::EventProcessor;
    ///
    /// assert_eq!(EventProcessor::for_type(AuthEventType::Unknown), EventProcessor::Redirect);
    /// assert_eq!(EventProcessor::for_type(AuthEventType::LinkPopup), EventProcessor::Popup);
    /// ```
    pub fn for_type(event_type: AuthEventType) -> Self {
        match event_type {
            AuthEventType::Unknown
            | AuthEventType::SignInRedirect
            | AuthEventType::LinkRedirect
            | AuthEventType::ReauthRedirect => Self::Redirect,
            AuthEventType::SignInPopup | AuthEventType::LinkPopup | AuthEventType::ReauthPopup => {
                Self::Popup
            }
        }
    }
}
