//! Table-driven consumer
//!
//! [`ScriptedConsumer`] owns a fixed set of event types (optionally a single
//! event ID), finishes every owned event with a canned outcome, and records
//! each popup resolution it receives. The replay command uses it to drive
//! recorded relay traffic through a manager.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use super::{Consumer, Finisher, FinisherRequest, OutcomeResult};
use crate::event::{AuthEventType, SignInOutcome};

/// One popup outcome delivered to a [`ScriptedConsumer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupResolution {
    /// Flow the popup belonged to
    pub event_type: AuthEventType,
    /// Attempt identifier
    pub event_id: Option<String>,
    /// Completed sign-in, when the popup succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SignInOutcome>,
    /// Failure, when the popup did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::AuthError>,
}

/// Consumer whose ownership and finisher behavior are fixed up front.
///
/// # Examples
///
/// ```
/// use signin_relay::consumer::{Consumer, ScriptedConsumer};
/// use signin_relay::event::{AuthEventType, SignInOutcome};
///
/// let consumer = ScriptedConsumer::new([AuthEventType::SignInRedirect])
///     .finishing_with(Ok(SignInOutcome::with_user(serde_json::json!({"uid": "u1"}))));
///
/// assert!(consumer.can_handle(AuthEventType::SignInRedirect, Some("e1")));
/// assert!(!consumer.can_handle(AuthEventType::LinkPopup, Some("e1")));
/// ```
pub struct ScriptedConsumer {
    owned: HashSet<AuthEventType>,
    event_id: Option<String>,
    response: OutcomeResult,
    latency: Duration,
    has_finisher: bool,
    finisher_calls: Arc<AtomicUsize>,
    popups: watch::Sender<Vec<PopupResolution>>,
}

impl ScriptedConsumer {
    /// Creates a consumer owning `types`, finishing with the empty outcome.
    pub fn new(types: impl IntoIterator<Item = AuthEventType>) -> Self {
        let (popups, _) = watch::channel(Vec::new());
        Self {
            owned: types.into_iter().collect(),
            event_id: None,
            response: Ok(SignInOutcome::empty()),
            latency: Duration::ZERO,
            has_finisher: true,
            finisher_calls: Arc::new(AtomicUsize::new(0)),
            popups,
        }
    }

    /// Restricts ownership to a single event ID.
    pub fn for_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Sets the canned finisher result.
    pub fn finishing_with(mut self, response: OutcomeResult) -> Self {
        self.response = response;
        self
    }

    /// Delays every finisher call, simulating a network round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Claims ownership but supplies no finisher.
    pub fn without_finisher(mut self) -> Self {
        self.has_finisher = false;
        self
    }

    /// Number of times a finisher was invoked.
    pub fn finisher_calls(&self) -> usize {
        self.finisher_calls.load(Ordering::SeqCst)
    }

    /// Popup resolutions received so far.
    pub fn popup_results(&self) -> Vec<PopupResolution> {
        self.popups.borrow().clone()
    }

    /// Waits until at least `count` popup resolutions have arrived.
    pub async fn wait_for_popup_results(&self, count: usize) -> Vec<PopupResolution> {
        let mut rx = self.popups.subscribe();
        let results = match rx.wait_for(|results| results.len() >= count).await {
            Ok(results) => results.clone(),
            Err(_) => self.popup_results(),
        };
        results
    }
}

impl Consumer for ScriptedConsumer {
    fn can_handle(&self, event_type: AuthEventType, event_id: Option<&str>) -> bool {
        if !self.owned.contains(&event_type) {
            return false;
        }
        match &self.event_id {
            Some(expected) => event_id == Some(expected.as_str()),
            None => true,
        }
    }

    fn finisher(&self, event_type: AuthEventType, event_id: Option<&str>) -> Option<Finisher> {
        if !self.has_finisher || !self.can_handle(event_type, event_id) {
            return None;
        }
        let calls = Arc::clone(&self.finisher_calls);
        let response = self.response.clone();
        let latency = self.latency;
        Some(super::finisher(move |_request: FinisherRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            let response = response.clone();
            async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                response
            }
        }))
    }

    fn resolve_pending_popup(
        &self,
        event_type: AuthEventType,
        result: OutcomeResult,
        event_id: Option<&str>,
    ) {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(error) => (None, Some(error)),
        };
        self.popups.send_modify(|results| {
            results.push(PopupResolution {
                event_type,
                event_id: event_id.map(str::to_string),
                outcome,
                error,
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, AuthErrorCode};

    #[test]
    fn test_event_id_restriction() {
        let consumer = ScriptedConsumer::new([AuthEventType::SignInPopup]).for_event_id("p1");
        assert!(consumer.can_handle(AuthEventType::SignInPopup, Some("p1")));
        assert!(!consumer.can_handle(AuthEventType::SignInPopup, Some("p2")));
        assert!(!consumer.can_handle(AuthEventType::SignInPopup, None));
    }

    #[test]
    fn test_without_finisher() {
        let consumer = ScriptedConsumer::new([AuthEventType::SignInPopup]).without_finisher();
        assert!(consumer.can_handle(AuthEventType::SignInPopup, None));
        assert!(consumer.finisher(AuthEventType::SignInPopup, None).is_none());
    }

    #[tokio::test]
    async fn test_finisher_counts_calls_and_returns_canned_result() {
        let err = AuthError::new(AuthErrorCode::Other("user-disabled".into()));
        let consumer =
            ScriptedConsumer::new([AuthEventType::LinkRedirect]).finishing_with(Err(err.clone()));
        let f = consumer.finisher(AuthEventType::LinkRedirect, None).unwrap();
        assert_eq!(f(FinisherRequest::default()).await, Err(err));
        assert_eq!(consumer.finisher_calls(), 1);
    }

    #[tokio::test]
    async fn test_popup_results_are_recorded() {
        let consumer = ScriptedConsumer::new([AuthEventType::SignInPopup]);
        consumer.resolve_pending_popup(
            AuthEventType::SignInPopup,
            Ok(SignInOutcome::empty()),
            Some("p1"),
        );
        let results = consumer.wait_for_popup_results(1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_id.as_deref(), Some("p1"));
        assert!(results[0].error.is_none());
    }
}
