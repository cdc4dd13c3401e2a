//! Popup event processing
//!
//! Popup results are never stored here; every outcome goes straight to the
//! owning consumer through [`Consumer::resolve_pending_popup`].

use std::sync::Arc;

use futures::FutureExt;

use super::{completed, invalid_event, Completion};
use crate::consumer::{Consumer, FinisherRequest};
use crate::error::AuthError;
use crate::event::AuthEvent;

/// Stateless forwarder from popup events to their owners.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopupProcessor;

impl PopupProcessor {
    /// Creates the processor.
    pub fn new() -> Self {
        Self
    }

    /// Classifies a popup event owned by `owner`.
    ///
    /// - Error events are reported to the owner immediately.
    /// - Successful events run the owner's finisher in the returned
    ///   completion; its result or failure is reported to the owner.
    ///
    /// # Errors
    ///
    /// Returns an `auth/invalid-auth-event` error if the owner has no
    /// finisher for the event. This is the only failure surfaced to the
    /// caller.
    pub fn process(
        &self,
        event: &AuthEvent,
        owner: &Arc<dyn Consumer>,
    ) -> std::result::Result<Completion, AuthError> {
        let event_type = event.event_type;
        let event_id = event.event_id.clone();

        if let Some(error) = &event.error {
            tracing::debug!(%event_type, event_id = ?event_id, code = %error.code, "Popup event carries error");
            owner.resolve_pending_popup(event_type, Err(error.clone()), event_id.as_deref());
            return Ok(completed());
        }

        let Some(finish) = owner.finisher(event_type, event_id.as_deref()) else {
            return Err(invalid_event(event_type));
        };

        let request = FinisherRequest::from(event);
        let owner = Arc::clone(owner);
        Ok(async move {
            let result = finish(request).await;
            if let Err(e) = &result {
                tracing::debug!(%event_type, event_id = ?event_id, "Popup finisher failed: {e}");
            }
            owner.resolve_pending_popup(event_type, result, event_id.as_deref());
        }
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{finisher, MockConsumer};
    use crate::error::AuthErrorCode;
    use crate::event::{AuthEventType, SignInOutcome};
    use serde_json::json;

    #[tokio::test]
    async fn test_error_event_notifies_owner_without_finisher() {
        let mut mock = MockConsumer::new();
        mock.expect_finisher().never();
        mock.expect_resolve_pending_popup()
            .withf(|t, result, id| {
                *t == AuthEventType::SignInPopup
                    && matches!(result, Err(e) if e.code == AuthErrorCode::PopupClosedByUser)
                    && *id == Some("p1")
            })
            .times(1)
            .return_const(());
        let owner: Arc<dyn Consumer> = Arc::new(mock);

        let event = AuthEvent::failed(
            AuthEventType::SignInPopup,
            AuthError::new(AuthErrorCode::PopupClosedByUser),
        )
        .with_event_id("p1");
        PopupProcessor::new().process(&event, &owner).unwrap().await;
    }

    #[tokio::test]
    async fn test_success_event_reports_finisher_result() {
        let mut mock = MockConsumer::new();
        mock.expect_finisher().times(1).returning(|_, _| {
            Some(finisher(|req: FinisherRequest| async move {
                Ok(SignInOutcome::with_user(json!({ "via": req.url_response })))
            }))
        });
        mock.expect_resolve_pending_popup()
            .withf(|_, result, id| {
                matches!(result, Ok(o) if o.user == Some(json!({"via": "https://cb"})))
                    && *id == Some("p2")
            })
            .times(1)
            .return_const(());
        let owner: Arc<dyn Consumer> = Arc::new(mock);

        let event = AuthEvent::new(AuthEventType::LinkPopup)
            .with_event_id("p2")
            .with_url_response("https://cb");
        PopupProcessor::new().process(&event, &owner).unwrap().await;
    }

    #[tokio::test]
    async fn test_finisher_failure_goes_to_owner_not_caller() {
        let mut mock = MockConsumer::new();
        mock.expect_finisher().returning(|_, _| {
            Some(finisher(|_req: FinisherRequest| async move {
                Err(AuthError::new(AuthErrorCode::Other("user-disabled".into())))
            }))
        });
        mock.expect_resolve_pending_popup()
            .withf(|_, result, _| result.is_err())
            .times(1)
            .return_const(());
        let owner: Arc<dyn Consumer> = Arc::new(mock);

        let event = AuthEvent::new(AuthEventType::ReauthPopup).with_event_id("p3");
        let completion = PopupProcessor::new().process(&event, &owner);
        assert!(completion.is_ok());
        completion.unwrap().await;
    }

    #[test]
    fn test_missing_finisher_is_invalid_event() {
        let mut mock = MockConsumer::new();
        mock.expect_finisher().returning(|_, _| None);
        mock.expect_resolve_pending_popup().never();
        let owner: Arc<dyn Consumer> = Arc::new(mock);

        let event = AuthEvent::new(AuthEventType::SignInPopup).with_event_id("p4");
        let err = PopupProcessor::new().process(&event, &owner).err().unwrap();
        assert_eq!(err.code, AuthErrorCode::InvalidAuthEvent);
    }
}
