//! Error taxonomy for the authentication core.
//!
//! Four classes, matching how call sites must react:
//! - `Validation` — malformed input caught before any network call.
//! - `Transport` — network failure, timeout, or 5xx; transient,
//!   retried with backoff on the refresh path only.
//! - `Authentication` — terminal backend rejection (bad credentials,
//!   revoked refresh token, wrong one-time code).
//! - `State` — intent issued in an invalid flow state; a programming
//!   contract violation, never a network problem.
//!
//! All errors travel as values in intent results. Nothing here panics.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codes;

/// Structured error for all authentication operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Malformed input caught locally, before any network call.
    #[error("validation failed ({code}): {message}")]
    Validation {
        /// Stable code from [`codes`].
        code: &'static str,
        message: String,
    },

    /// Network-level failure: connection error, timeout, or a 5xx
    /// response. Transient — the refresh scheduler retries these.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The backend rejected the request. Terminal — never retried.
    #[error("authentication rejected ({code}, status {status}): {message}")]
    Authentication {
        /// HTTP status reported by the backend.
        status: u16,
        /// Backend error code, passed through verbatim.
        code: String,
        message: String,
    },

    /// Intent issued in an invalid flow state (for example an MFA code
    /// with no pending ticket). Surfaced synchronously.
    #[error("invalid flow state ({code}): {message}")]
    State {
        /// Stable code from [`codes`].
        code: &'static str,
        message: String,
    },
}

impl AuthError {
    /// Shorthand for a validation error with a stable code.
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Shorthand for a state error with a stable code.
    pub fn state(code: &'static str, message: impl Into<String>) -> Self {
        Self::State {
            code,
            message: message.into(),
        }
    }

    /// The stable machine-readable code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } | Self::State { code, .. } => code,
            Self::Transport { .. } => codes::NETWORK,
            Self::Authentication { code, .. } => code,
        }
    }

    /// Whether a retry with backoff could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether this is the backend telling us the account exists but is
    /// not yet verified (sign-in should surface "needs verification"
    /// rather than a hard failure).
    pub fn is_unverified_user(&self) -> bool {
        matches!(
            self,
            Self::Authentication { status: 401, code, .. } if code == codes::UNVERIFIED_USER
        )
    }
}

/// Convenience alias used across the workspace.
pub type AuthResult<T> = Result<T, AuthError>;

/// Error body returned by the identity backend on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status echoed in the body.
    pub status: u16,
    /// Machine-readable error code (the backend's `error` field).
    #[serde(rename = "error")]
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorResponse {
    /// Classifies a backend error body into the taxonomy: 5xx responses
    /// are transient transport failures, everything else is a terminal
    /// authentication rejection.
    pub fn into_auth_error(self) -> AuthError {
        if self.status >= 500 {
            AuthError::Transport {
                message: format!("{} ({})", self.message, self.status),
            }
        } else {
            AuthError::Authentication {
                status: self.status,
                code: self.code,
                message: self.message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_includes_code() {
        let err = AuthError::validation(codes::INVALID_EMAIL, "not an email");
        assert_eq!(
            err.to_string(),
            "validation failed (invalid-email): not an email"
        );
        assert_eq!(err.code(), codes::INVALID_EMAIL);
    }

    #[test]
    fn transport_is_transient() {
        assert!(AuthError::transport("connection refused").is_transient());
        let terminal = AuthError::Authentication {
            status: 401,
            code: "invalid-refresh-token".into(),
            message: "revoked".into(),
        };
        assert!(!terminal.is_transient());
    }

    #[test]
    fn server_errors_classify_as_transport() {
        let resp = ErrorResponse {
            status: 502,
            code: "bad-gateway".into(),
            message: "upstream down".into(),
        };
        assert!(matches!(resp.into_auth_error(), AuthError::Transport { .. }));
    }

    #[test]
    fn client_errors_classify_as_authentication() {
        let resp = ErrorResponse {
            status: 401,
            code: "invalid-email-password".into(),
            message: "wrong credentials".into(),
        };
        let err = resp.into_auth_error();
        assert_eq!(err.code(), "invalid-email-password");
        assert!(matches!(err, AuthError::Authentication { status: 401, .. }));
    }

    #[test]
    fn unverified_user_is_detected() {
        let err = ErrorResponse {
            status: 401,
            code: codes::UNVERIFIED_USER.into(),
            message: "Email is not verified".into(),
        }
        .into_auth_error();
        assert!(err.is_unverified_user());
    }

    #[test]
    fn error_body_deserializes_from_backend_shape() {
        let err: ErrorResponse = serde_json::from_str(
            r#"{"status":409,"error":"email-already-in-use","message":"Email already in use"}"#,
        )
        .unwrap();
        assert_eq!(err.code, "email-already-in-use");
        assert_eq!(err.status, 409);
    }
}
