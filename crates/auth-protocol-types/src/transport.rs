//! The transport boundary.
//!
//! The core treats the network as an opaque collaborator: typed request in,
//! typed response or [`AuthError`] out. `auth-http-transport` provides the
//! production implementation; tests script a mock.

use std::future::Future;

use crate::error::AuthResult;
use crate::payloads::{
    DeanonymizeRequest, EmailPasswordSignInRequest, IdTokenRequest, MfaActivateRequest,
    MfaGenerateResponse, MfaTotpSignInRequest, OtpEmailRequest, OtpEmailVerifyRequest,
    PasswordlessEmailRequest, PatSignInRequest, RefreshTokenRequest, SignInResponsePayload,
    SignOutRequest, SignUpEmailPasswordRequest, SmsOtpVerifyRequest, SmsSignInRequest,
    WebauthnSignInRequest, WebauthnSignUpRequest, WebauthnVerifyRequest,
};
use crate::session::SessionPayload;

/// Network calls against the identity backend.
///
/// Methods that act on behalf of an already-authenticated user take the
/// bearer `access_token` explicitly; the transport holds no session state.
pub trait AuthTransport: Send + Sync + 'static {
    fn sign_in_email_password(
        &self,
        req: EmailPasswordSignInRequest,
    ) -> impl Future<Output = AuthResult<SignInResponsePayload>> + Send;

    fn sign_up_email_password(
        &self,
        req: SignUpEmailPasswordRequest,
    ) -> impl Future<Output = AuthResult<SignInResponsePayload>> + Send;

    /// Requests a one-time code be emailed to the address.
    fn sign_in_otp_email(
        &self,
        req: OtpEmailRequest,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    fn verify_otp_email(
        &self,
        req: OtpEmailVerifyRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    /// Requests a magic link be emailed to the address.
    fn sign_in_passwordless_email(
        &self,
        req: PasswordlessEmailRequest,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    /// Requests a one-time code be texted to the number.
    fn sign_in_passwordless_sms(
        &self,
        req: SmsSignInRequest,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    fn verify_sms_otp(
        &self,
        req: SmsOtpVerifyRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn sign_in_anonymous(&self) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn sign_in_pat(
        &self,
        req: PatSignInRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn sign_in_id_token(
        &self,
        req: IdTokenRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn link_id_token(
        &self,
        req: IdTokenRequest,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    fn sign_in_mfa_totp(
        &self,
        req: MfaTotpSignInRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn mfa_generate(
        &self,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<MfaGenerateResponse>> + Send;

    fn mfa_activate(
        &self,
        req: MfaActivateRequest,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    /// Fetches a WebAuthn assertion challenge for an existing account.
    /// The challenge is opaque to this core.
    fn webauthn_sign_in_challenge(
        &self,
        req: WebauthnSignInRequest,
    ) -> impl Future<Output = AuthResult<serde_json::Value>> + Send;

    fn webauthn_sign_in_verify(
        &self,
        req: WebauthnVerifyRequest,
    ) -> impl Future<Output = AuthResult<SignInResponsePayload>> + Send;

    /// Fetches a WebAuthn registration challenge for a new account.
    fn webauthn_sign_up_challenge(
        &self,
        req: WebauthnSignUpRequest,
    ) -> impl Future<Output = AuthResult<serde_json::Value>> + Send;

    fn webauthn_sign_up_verify(
        &self,
        req: WebauthnVerifyRequest,
    ) -> impl Future<Output = AuthResult<SignInResponsePayload>> + Send;

    /// Upgrades an anonymous user to a permanent account.
    fn deanonymize(
        &self,
        req: DeanonymizeRequest,
        access_token: &str,
    ) -> impl Future<Output = AuthResult<()>> + Send;

    /// Exchanges a refresh token for a new session.
    fn refresh_token(
        &self,
        req: RefreshTokenRequest,
    ) -> impl Future<Output = AuthResult<SessionPayload>> + Send;

    fn sign_out(&self, req: SignOutRequest) -> impl Future<Output = AuthResult<()>> + Send;
}
