//! Auth event value types
//!
//! An [`AuthEvent`] describes one callback observed by the sign-in channel:
//! the identity provider handed control back to the app and the relay
//! packaged the result. Events are immutable once built.
//!
//! The JSON form mirrors the relay's payload:
//!
//! ```json
//! {"type":"signInViaRedirect","eventId":"e1","urlResponse":"https://app/cb?code=x"}
//! ```

pub mod dedup;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

pub use dedup::DedupCache;

/// The kind of sign-in flow an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthEventType {
    /// Emitted on load when no popup/redirect data is available.
    Unknown,
    /// Sign in via full-page redirect.
    #[serde(rename = "signInViaRedirect")]
    SignInRedirect,
    /// Link a provider via full-page redirect.
    #[serde(rename = "linkViaRedirect")]
    LinkRedirect,
    /// Reauthenticate via full-page redirect.
    #[serde(rename = "reauthViaRedirect")]
    ReauthRedirect,
    /// Sign in via popup window.
    #[serde(rename = "signInViaPopup")]
    SignInPopup,
    /// Link a provider via popup window.
    #[serde(rename = "linkViaPopup")]
    LinkPopup,
    /// Reauthenticate via popup window.
    #[serde(rename = "reauthViaPopup")]
    ReauthPopup,
}

impl AuthEventType {
    /// All event types, in declaration order.
    pub const ALL: [AuthEventType; 7] = [
        Self::Unknown,
        Self::SignInRedirect,
        Self::LinkRedirect,
        Self::ReauthRedirect,
        Self::SignInPopup,
        Self::LinkPopup,
        Self::ReauthPopup,
    ];

    /// Whether this type belongs to a full-page redirect flow.
    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            Self::SignInRedirect | Self::LinkRedirect | Self::ReauthRedirect
        )
    }

    /// Whether this type belongs to a popup flow.
    pub fn is_popup(self) -> bool {
        matches!(
            self,
            Self::SignInPopup | Self::LinkPopup | Self::ReauthPopup
        )
    }

    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::SignInRedirect => "signInViaRedirect",
            Self::LinkRedirect => "linkViaRedirect",
            Self::ReauthRedirect => "reauthViaRedirect",
            Self::SignInPopup => "signInViaPopup",
            Self::LinkPopup => "linkViaPopup",
            Self::ReauthPopup => "reauthViaPopup",
        }
    }
}

impl std::fmt::Display for AuthEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthEventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown auth event type: {s}"))
    }
}

/// One external sign-in callback.
///
/// # Examples
///
/// ```
/// use signin_relay::event::{AuthEvent, AuthEventType};
///
/// let event = AuthEvent::new(AuthEventType::SignInRedirect)
///     .with_event_id("e1")
///     .with_url_response("https://app.example.com/cb?code=x");
///
/// assert_eq!(event.uid(), Some("e1"));
/// assert!(event.is_redirect());
/// assert!(!event.has_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    /// Flow the event belongs to
    #[serde(rename = "type")]
    pub event_type: AuthEventType,
    /// Identifier of the initiating attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Relay session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Full callback URL returned by the identity provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_response: Option<String>,
    /// Form-post body for providers that answer with POST
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_body: Option<String>,
    /// Tenant the attempt was started for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Failure reported by the relay instead of a payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthError>,
}

impl AuthEvent {
    /// Creates an event of the given type with no payload.
    pub fn new(event_type: AuthEventType) -> Self {
        Self {
            event_type,
            event_id: None,
            session_id: None,
            url_response: None,
            post_body: None,
            tenant_id: None,
            error: None,
        }
    }

    /// Creates an error event of the given type.
    pub fn failed(event_type: AuthEventType, error: AuthError) -> Self {
        Self::new(event_type).with_error(error)
    }

    /// Sets the event ID.
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Sets the session ID.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the callback URL.
    pub fn with_url_response(mut self, url_response: impl Into<String>) -> Self {
        self.url_response = Some(url_response.into());
        self
    }

    /// Sets the post body.
    pub fn with_post_body(mut self, post_body: impl Into<String>) -> Self {
        self.post_body = Some(post_body.into());
        self
    }

    /// Sets the tenant ID.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the error.
    pub fn with_error(mut self, error: AuthError) -> Self {
        self.error = Some(error);
        self
    }

    /// Deduplication key: the session ID if present, else the event ID.
    pub fn uid(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.event_id.as_deref())
    }

    /// Whether the relay reported a failure.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the event belongs to a redirect flow.
    pub fn is_redirect(&self) -> bool {
        self.event_type.is_redirect()
    }

    /// Whether the event belongs to a popup flow.
    pub fn is_popup(&self) -> bool {
        self.event_type.is_popup()
    }

    /// Builds an event from the relay's plain JSON object.
    ///
    /// Returns `None` when the object is not an event (missing or
    /// unrecognized `type`, malformed fields).
    ///
    /// # Examples
    ///
    /// ```
    /// use signin_relay::event::{AuthEvent, AuthEventType};
    ///
    /// let raw = serde_json::json!({"type": "linkViaPopup", "eventId": "p1"});
    /// let event = AuthEvent::from_plain_object(&raw).unwrap();
    /// assert_eq!(event.event_type, AuthEventType::LinkPopup);
    ///
    /// assert!(AuthEvent::from_plain_object(&serde_json::json!({"eventId": "p1"})).is_none());
    /// ```
    pub fn from_plain_object(raw: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(raw.clone()).ok()
    }

    /// Converts the event back to the relay's plain JSON object.
    pub fn to_plain_object(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The completed result of a popup or redirect sign-in.
///
/// An outcome with `user: None` is the "nothing happened" answer given to
/// redirect callers when no redirect was in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInOutcome {
    /// Signed-in user, as returned by the finisher
    pub user: Option<serde_json::Value>,
    /// Provider credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<serde_json::Value>,
    /// `signIn`, `link` or `reauthenticate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Provider profile details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_user_info: Option<serde_json::Value>,
}

impl SignInOutcome {
    /// The empty outcome: `{user: null}`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An outcome carrying only a user.
    pub fn with_user(user: serde_json::Value) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    /// Whether this is the empty outcome.
    pub fn is_empty(&self) -> bool {
        self.user.is_none()
    }
}
