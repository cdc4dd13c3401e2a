//! Consumer-facing contracts
//!
//! A [`Consumer`] is a host feature that may own a pending sign-in attempt.
//! The manager asks each subscribed consumer, in subscription order, whether
//! it owns an incoming event; the first one that says yes supplies the
//! [`Finisher`] that exchanges the raw callback for a completed sign-in.
//!
//! # Module Layout
//!
//! - [`scripted`] -- table-driven consumer used by the replay command and
//!   integration tests

pub mod scripted;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::AuthError;
use crate::event::{AuthEvent, AuthEventType, SignInOutcome};

pub use scripted::ScriptedConsumer;

/// Result of running a finisher or resolving a popup.
pub type OutcomeResult = std::result::Result<SignInOutcome, AuthError>;

/// Raw callback payload handed to a finisher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinisherRequest {
    /// Full callback URL returned by the identity provider
    pub url_response: Option<String>,
    /// Relay session identifier
    pub session_id: Option<String>,
    /// Tenant the attempt was started for
    pub tenant_id: Option<String>,
    /// Form-post body, when the provider answered with POST
    pub post_body: Option<String>,
}

impl From<&AuthEvent> for FinisherRequest {
    fn from(event: &AuthEvent) -> Self {
        Self {
            url_response: event.url_response.clone(),
            session_id: event.session_id.clone(),
            tenant_id: event.tenant_id.clone(),
            post_body: event.post_body.clone(),
        }
    }
}

/// Exchanges a raw callback payload for a completed sign-in.
///
/// Finishers usually perform a network round trip. Once started they always
/// run to completion.
pub type Finisher = Arc<dyn Fn(FinisherRequest) -> BoxFuture<'static, OutcomeResult> + Send + Sync>;

/// Wraps an async closure as a [`Finisher`].
///
/// # Examples
///
/// ```
/// use signin_relay::consumer::{finisher, FinisherRequest};
/// use signin_relay::event::SignInOutcome;
///
/// let f = finisher(|req: FinisherRequest| async move {
///     Ok(SignInOutcome::with_user(serde_json::json!({ "uid": req.session_id })))
/// });
/// # let _ = f;
/// ```
pub fn finisher<F, Fut>(f: F) -> Finisher
where
    F: Fn(FinisherRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OutcomeResult> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// A host feature that may own pending popup or redirect sign-ins.
///
/// Consumers are compared by identity (`Arc::ptr_eq`) for subscription.
#[cfg_attr(test, mockall::automock)]
pub trait Consumer: Send + Sync {
    /// Whether this consumer owns an event of `event_type` with `event_id`.
    fn can_handle<'a>(&self, event_type: AuthEventType, event_id: Option<&'a str>) -> bool;

    /// The finisher for an owned event, if this consumer can complete it.
    fn finisher<'a>(
        &self,
        event_type: AuthEventType,
        event_id: Option<&'a str>,
    ) -> Option<Finisher>;

    /// Delivers the outcome of a popup attempt to its owner.
    fn resolve_pending_popup<'a>(
        &self,
        event_type: AuthEventType,
        result: OutcomeResult,
        event_id: Option<&'a str>,
    );
}

impl std::fmt::Debug for dyn Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Consumer")
    }
}
