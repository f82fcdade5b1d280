//! Stable error codes surfaced to callers.
//!
//! Every [`AuthError`](crate::AuthError) carries one of these codes so UI
//! layers can branch without parsing human-readable messages. Codes that
//! originate on the backend (for example `email-already-in-use`) are passed
//! through verbatim; the constants here cover the errors this core produces
//! locally.

/// Email fails the local shape check.
pub const INVALID_EMAIL: &str = "invalid-email";

/// Password fails the local length check.
pub const INVALID_PASSWORD: &str = "invalid-password";

/// Phone number fails the local E.164 shape check.
pub const INVALID_PHONE_NUMBER: &str = "invalid-phone-number";

/// One-time code is not a 6-digit string.
pub const INVALID_OTP: &str = "invalid-otp";

/// MFA ticket does not have the expected `mfaTotp:` shape.
pub const INVALID_MFA_TICKET: &str = "invalid-mfa-ticket";

/// An MFA code was submitted but no challenge is pending.
pub const NO_MFA_TICKET: &str = "no-mfa-ticket";

/// A top-level sign-in intent was issued while another is in flight.
pub const FLOW_ALREADY_RUNNING: &str = "flow-already-running";

/// A flow's result arrived after a sign-out and was discarded.
pub const FLOW_DISCARDED: &str = "flow-discarded";

/// An intent requires a signed-in session and none is present.
pub const NOT_SIGNED_IN: &str = "not-signed-in";

/// A link-credentials intent requires an anonymous session.
pub const NOT_ANONYMOUS: &str = "not-anonymous";

/// Network-level failure (connection, timeout, 5xx).
pub const NETWORK: &str = "network";

/// Backend rejected the refresh token as invalid, expired, or revoked.
pub const INVALID_REFRESH_TOKEN: &str = "invalid-refresh-token";

/// Backend code for a sign-in attempt on an unverified account.
pub const UNVERIFIED_USER: &str = "unverified-user";
