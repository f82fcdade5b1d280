//! Request and response bodies for the identity backend's REST surface.
//!
//! Field names are camelCase on the wire. WebAuthn challenge and credential
//! material is carried as opaque `serde_json::Value` — this core relays it
//! between the backend and the platform authenticator without inspecting it.

use serde::{Deserialize, Serialize};

use crate::session::SessionPayload;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPasswordSignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpEmailPasswordRequest {
    pub email: String,
    pub password: String,
}

/// Second factor kinds a backend may offer on an MFA challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaFactor {
    Totp,
}

/// Challenge returned when a sign-in attempt requires a second factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallengePayload {
    /// Opaque ticket correlating the suspended sign-in with the
    /// follow-up factor submission. Shape: `mfaTotp:<id>`.
    pub ticket: String,
    #[serde(default)]
    pub allowed_factors: Vec<MfaFactor>,
}

/// Response to sign-in style requests: either a session, or an MFA
/// challenge, or (sign-up with verification pending) neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa: Option<MfaChallengePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpEmailVerifyRequest {
    pub email: String,
    pub otp: String,
}

/// Magic-link sign-in: the emailed link signs the user in out-of-band,
/// so there is no in-app verify step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordlessEmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsSignInRequest {
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsOtpVerifyRequest {
    pub phone_number: String,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatSignInRequest {
    pub personal_access_token: String,
}

/// Federated sign-in or link with a provider-issued id token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTokenRequest {
    /// Provider name as known to the backend (for example `google`).
    pub provider: String,
    pub id_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaTotpSignInRequest {
    pub ticket: String,
    pub otp: String,
}

/// Enrollment payload from `mfa/totp/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaGenerateResponse {
    /// Shared secret to store in the authenticator app.
    pub totp_secret: String,
    /// Provisioning QR code, as a data URL.
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaActivateRequest {
    pub code: String,
    /// `"totp"` to enable, empty string to disable.
    pub active_mfa_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnSignInRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnSignUpRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Signed assertion or attestation relayed back to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnVerifyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Opaque credential produced by the platform authenticator.
    pub credential: serde_json::Value,
}

/// Upgrade of an anonymous user to a permanent account. The backend keeps
/// the original user id; only the credentials change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeanonymizeRequest {
    /// `email-password` or `passwordless`.
    pub sign_in_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Passwordless connection kind (`email` or `sms`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutRequest {
    /// Refresh token of the session being terminated. Absent when the
    /// local session was already gone (client-side-only sign-out).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When true, the backend revokes every refresh token for the user.
    pub all: bool,
}

/// What a caller must do next when a flow pauses before producing a
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum VerificationDetail {
    /// A verification email was (or must be) confirmed for this address.
    EmailVerification { email: String },
    /// A one-time code was emailed to this address.
    EmailOtp { email: String },
    /// A one-time code was texted to this number.
    SmsOtp { phone_number: String },
    /// A magic link was emailed; following it completes the sign-in
    /// out-of-band.
    MagicLink { email: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_response_with_mfa_only() {
        let resp: SignInResponsePayload =
            serde_json::from_str(r#"{"mfa":{"ticket":"mfaTotp:abc"}}"#).unwrap();
        assert!(resp.session.is_none());
        assert_eq!(resp.mfa.unwrap().ticket, "mfaTotp:abc");
    }

    #[test]
    fn requests_serialize_camel_case() {
        let req = PatSignInRequest {
            personal_access_token: "pat-1".into(),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"personalAccessToken":"pat-1"}"#
        );

        let req = SmsSignInRequest {
            phone_number: "+15551234567".into(),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"phoneNumber":"+15551234567"}"#
        );
    }

    #[test]
    fn id_token_request_omits_absent_nonce() {
        let req = IdTokenRequest {
            provider: "google".into(),
            id_token: "jwt".into(),
            nonce: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("nonce"));
    }
}
