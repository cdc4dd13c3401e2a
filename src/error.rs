//! Error types for signin-relay
//!
//! This module defines the crate-level [`RelayError`] used by configuration,
//! storage and dispatch, and the typed [`AuthError`] carried by sign-in
//! outcomes. `AuthError` is clonable so one failure can be replayed to every
//! caller waiting on the same result.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Prefix used by the relay when serializing auth error codes.
const CODE_PREFIX: &str = "auth/";

/// Main error type for signin-relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator delivered an event that violates the relay contract
    /// (null event, or an event routed to an owner with no finisher).
    #[error("Invalid auth event: {0}")]
    InvalidAuthEvent(String),

    /// The sign-in channel failed to initialize or to start a flow
    #[error("Channel error: {0}")]
    Channel(#[from] AuthError),

    /// Redirect flag storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for signin-relay operations
///
/// Uses `anyhow::Error` so callers can attach context while still being able
/// to downcast to [`RelayError`] or [`AuthError`].
pub type Result<T> = anyhow::Result<T>;

/// Classified auth error codes the relay reasons about.
///
/// Anything else the identity provider or a finisher reports is preserved
/// verbatim in [`AuthErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// A redirect or popup operation did not complete in time.
    Timeout,
    /// Web storage is unavailable to the relay (third-party data blocked).
    WebStorageUnsupported,
    /// The current environment cannot run this operation at all.
    OperationNotSupported,
    /// The relay contract was violated.
    InvalidAuthEvent,
    /// The user closed the popup before the flow finished.
    PopupClosedByUser,
    /// The platform bridge was assumed present but is not ready.
    CordovaNotReady,
    /// Unclassified internal failure.
    InternalError,
    /// The user backed out of the redirect.
    RedirectCancelledByUser,
    /// Any other code, without the `auth/` prefix.
    Other(String),
}

impl AuthErrorCode {
    /// Returns the code without the `auth/` prefix.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::WebStorageUnsupported => "web-storage-unsupported",
            Self::OperationNotSupported => "operation-not-supported-in-this-environment",
            Self::InvalidAuthEvent => "invalid-auth-event",
            Self::PopupClosedByUser => "popup-closed-by-user",
            Self::CordovaNotReady => "cordova-not-ready",
            Self::InternalError => "internal-error",
            Self::RedirectCancelledByUser => "redirect-cancelled-by-user",
            Self::Other(code) => code,
        }
    }

    /// Parses a code with or without the `auth/` prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use signin_relay::error::AuthErrorCode;
    ///
    /// assert_eq!(AuthErrorCode::parse("auth/timeout"), AuthErrorCode::Timeout);
    /// assert_eq!(
    ///     AuthErrorCode::parse("auth/user-disabled"),
    ///     AuthErrorCode::Other("user-disabled".to_string())
    /// );
    /// ```
    pub fn parse(raw: &str) -> Self {
        let code = raw.strip_prefix(CODE_PREFIX).unwrap_or(raw);
        match code {
            "timeout" => Self::Timeout,
            "web-storage-unsupported" => Self::WebStorageUnsupported,
            "operation-not-supported-in-this-environment" => Self::OperationNotSupported,
            "invalid-auth-event" => Self::InvalidAuthEvent,
            "popup-closed-by-user" => Self::PopupClosedByUser,
            "cordova-not-ready" => Self::CordovaNotReady,
            "internal-error" => Self::InternalError,
            "redirect-cancelled-by-user" => Self::RedirectCancelledByUser,
            other => Self::Other(other.to_string()),
        }
    }

    /// Default human-readable message for the code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Timeout => "The operation has timed out.",
            Self::WebStorageUnsupported => {
                "This browser is not supported or 3rd party cookies and data may be disabled."
            }
            Self::OperationNotSupported => {
                "This operation is not supported in the environment this application is running on."
            }
            Self::InvalidAuthEvent | Self::InternalError => "An internal error has occurred.",
            Self::PopupClosedByUser => {
                "The popup has been closed by the user before finalizing the operation."
            }
            Self::CordovaNotReady => "Cordova framework is not ready.",
            Self::RedirectCancelledByUser => {
                "The redirect operation has been cancelled by the user before finalizing."
            }
            Self::Other(_) => "An error has occurred.",
        }
    }

    /// Whether this code denotes a permanent capability failure that must
    /// never be cleared from the redirect slot.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::WebStorageUnsupported | Self::OperationNotSupported)
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CODE_PREFIX, self.as_str())
    }
}

impl Serialize for AuthErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AuthErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// A typed sign-in failure.
///
/// Delivered to redirect callers and popup owners through the same paths
/// whether it came from the relay, a finisher, or a timeout.
///
/// # Examples
///
/// ```
/// use signin_relay::error::{AuthError, AuthErrorCode};
///
/// let err = AuthError::new(AuthErrorCode::Timeout);
/// assert_eq!(err.to_string(), "auth/timeout: The operation has timed out.");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AuthError {
    /// Classified error code
    pub code: AuthErrorCode,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl AuthError {
    /// Creates an error with the code's default message.
    pub fn new(code: AuthErrorCode) -> Self {
        let message = code.default_message().to_string();
        Self { code, message }
    }

    /// Creates an error with a custom message.
    pub fn with_message(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for [`AuthErrorCode::is_unrecoverable`].
    pub fn is_unrecoverable(&self) -> bool {
        self.code.is_unrecoverable()
    }
}
