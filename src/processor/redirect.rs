//! Redirect result processing
//!
//! [`RedirectProcessor`] answers one question per load: what happened with
//! the last redirect sign-in. The answer lives in a single slot that callers
//! may await before or after it is known; every caller observes the same
//! outcome. Until something resolves the slot, the first waiting caller arms
//! a timeout shared by all later callers.
//!
//! # Slot States
//!
//! ```text
//! Unresolved --process()-------------------> Resolved
//!            --default_to_empty_response()-> Resolved ({user: null})
//!            --timeout--------------------> Resolved (auth/timeout)
//! Resolved   --reset()--------------------> Unresolved
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{completed, invalid_event, Completion};
use crate::consumer::{Consumer, FinisherRequest};
use crate::error::{AuthError, AuthErrorCode};
use crate::event::{AuthEvent, AuthEventType, SignInOutcome};

/// Outcome stored in the redirect slot.
pub type RedirectOutcome = std::result::Result<SignInOutcome, AuthError>;

#[derive(Debug, Default)]
struct RedirectState {
    /// Something has claimed the slot for this load.
    resolved: bool,
    /// A capability error was seen; clearing the slot is disabled.
    unrecoverable_error_seen: bool,
    /// Armed timeout, if any.
    timer: Option<CancellationToken>,
}

#[derive(Debug)]
struct Inner {
    slot: watch::Sender<Option<RedirectOutcome>>,
    state: Mutex<RedirectState>,
    timeout: Duration,
}

/// Single-slot resolver for the outcome of the last redirect.
///
/// Cloning yields another handle to the same slot.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use signin_relay::processor::RedirectProcessor;
///
/// # #[tokio::main]
/// # async fn main() {
/// let processor = RedirectProcessor::new(Duration::from_secs(30));
/// processor.default_to_empty_response();
///
/// let outcome = processor.get_redirect_result().await.unwrap();
/// assert!(outcome.is_empty());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedirectProcessor {
    inner: Arc<Inner>,
}

/// `Unknown` is routed here only as the on-load probe, so it counts as a
/// redirect flow when classifying errors.
fn is_redirect_flow(event_type: AuthEventType) -> bool {
    event_type == AuthEventType::Unknown || event_type.is_redirect()
}

impl RedirectProcessor {
    /// Creates an unresolved processor whose shared timeout is `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                slot,
                state: Mutex::new(RedirectState::default()),
                timeout,
            }),
        }
    }

    /// Duration of the shared timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    fn state(&self) -> MutexGuard<'_, RedirectState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Classifies a redirect-routed event owned by `owner`.
    ///
    /// In priority order:
    ///
    /// 1. An `Unknown` event without a capability error is the on-load probe
    ///    and resolves the slot to the empty outcome.
    /// 2. An error event rejects the slot if it belongs to a redirect flow,
    ///    otherwise resolves it to the empty outcome.
    /// 3. Otherwise the owner's finisher runs in the returned completion and
    ///    its result (or failure) is stored in the slot.
    ///
    /// # Errors
    ///
    /// Returns an `auth/invalid-auth-event` error when the owner has no
    /// finisher for a successful event. The slot is left untouched in that
    /// case so a later default can still answer waiting callers.
    pub fn process(
        &self,
        event: &AuthEvent,
        owner: &Arc<dyn Consumer>,
    ) -> std::result::Result<Completion, AuthError> {
        let event_type = event.event_type;
        let unrecoverable = event.error.as_ref().is_some_and(AuthError::is_unrecoverable);

        if event_type == AuthEventType::Unknown && !unrecoverable {
            self.claim(false);
            tracing::debug!("Unknown event resolves redirect slot to empty outcome");
            self.set_result(Ok(SignInOutcome::empty()));
            return Ok(completed());
        }

        if let Some(error) = &event.error {
            self.claim(unrecoverable);
            if is_redirect_flow(event_type) {
                tracing::info!(%event_type, code = %error.code, "Redirect slot rejected");
                self.set_result(Err(error.clone()));
            } else {
                self.set_result(Ok(SignInOutcome::empty()));
            }
            return Ok(completed());
        }

        let event_id = event.event_id.as_deref();
        let Some(finish) = owner.finisher(event_type, event_id) else {
            return Err(invalid_event(event_type));
        };

        self.claim(false);
        let request = FinisherRequest::from(event);
        let processor = self.clone();
        Ok(async move {
            let result = finish(request).await;
            let outcome = if is_redirect_flow(event_type) {
                result
            } else {
                result.map(|_| SignInOutcome::empty())
            };
            match &outcome {
                Ok(_) => tracing::info!(%event_type, "Redirect slot resolved"),
                Err(e) => tracing::info!(%event_type, code = %e.code, "Redirect finisher failed"),
            }
            processor.set_result(outcome);
        }
        .boxed())
    }

    /// Marks the slot as claimed by an event, discarding any earlier result.
    fn claim(&self, unrecoverable: bool) {
        self.reset();
        let mut state = self.state();
        state.resolved = true;
        state.unrecoverable_error_seen |= unrecoverable;
    }

    /// Resolves the slot to the empty outcome unless something already
    /// claimed it.
    pub fn default_to_empty_response(&self) {
        {
            let mut state = self.state();
            if state.resolved {
                return;
            }
            state.resolved = true;
        }
        tracing::debug!("No pending redirect; defaulting to empty outcome");
        self.set_result(Ok(SignInOutcome::empty()));
    }

    /// Replaces a claimed result with the empty outcome so the same redirect
    /// is not reported twice.
    ///
    /// Does nothing while unresolved, and never again once a capability
    /// error has been seen.
    pub fn clear_redirect_result(&self) {
        {
            let state = self.state();
            if !state.resolved || state.unrecoverable_error_seen {
                return;
            }
        }
        self.set_result(Ok(SignInOutcome::empty()));
    }

    /// Returns the slot to the unresolved state and disarms the timeout.
    ///
    /// A capability error seen earlier still disables clearing.
    pub fn reset(&self) {
        self.inner.slot.send_if_modified(|slot| slot.take().is_some());
        let mut state = self.state();
        state.resolved = false;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
    }

    /// Waits for the outcome of the last redirect.
    ///
    /// Returns immediately if the slot is resolved. Otherwise arms the shared
    /// timeout (once per unresolved period) and waits; a timeout resolves the
    /// slot with `auth/timeout`.
    pub async fn get_redirect_result(&self) -> RedirectOutcome {
        let mut rx = self.inner.slot.subscribe();
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome;
        }
        self.start_timeout();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(AuthError::new(AuthErrorCode::InternalError)))
    }

    /// Current result, if the slot holds one.
    pub fn peek(&self) -> Option<RedirectOutcome> {
        self.inner.slot.borrow().clone()
    }

    /// Whether an event, default, or timeout has claimed the slot.
    pub fn is_resolved(&self) -> bool {
        self.state().resolved
    }

    /// Whether a capability error has disabled clearing.
    pub fn unrecoverable_error_seen(&self) -> bool {
        self.state().unrecoverable_error_seen
    }

    /// Whether the shared timeout is armed.
    pub fn has_pending_timeout(&self) -> bool {
        self.state().timer.is_some()
    }

    fn set_result(&self, outcome: RedirectOutcome) {
        self.inner.slot.send_replace(Some(outcome));
        if let Some(timer) = self.state().timer.take() {
            timer.cancel();
        }
    }

    fn start_timeout(&self) {
        let token = {
            let mut state = self.state();
            if state.timer.is_some() {
                return;
            }
            let token = CancellationToken::new();
            state.timer = Some(token.clone());
            token
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        tracing::debug!(?timeout, "Redirect timeout armed");
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        RedirectProcessor { inner }.on_timeout();
                    }
                }
            }
        });
    }

    fn on_timeout(&self) {
        if self.inner.slot.borrow().is_some() {
            return;
        }
        tracing::warn!(timeout = ?self.inner.timeout, "Redirect result timed out");
        self.state().resolved = true;
        self.set_result(Err(AuthError::new(AuthErrorCode::Timeout)));
    }
}
