//! HTTP implementation of [`AuthTransport`] over `reqwest`.
//!
//! One POST helper carries every endpoint: serialize the request, send,
//! map non-2xx responses through the backend's `{status, error, message}`
//! error body into [`AuthError`], deserialize the success body. The
//! transport holds no session state; authenticated calls receive their
//! bearer token per call.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use auth_protocol_types::{
    AuthError, AuthResult, AuthTransport, DeanonymizeRequest, EmailPasswordSignInRequest,
    ErrorResponse, IdTokenRequest, MfaActivateRequest, MfaGenerateResponse, MfaTotpSignInRequest,
    OtpEmailRequest, OtpEmailVerifyRequest, PasswordlessEmailRequest, PatSignInRequest,
    RefreshTokenRequest, SessionPayload, SignInResponsePayload, SignOutRequest,
    SignUpEmailPasswordRequest, SmsOtpVerifyRequest, SmsSignInRequest, WebauthnSignInRequest,
    WebauthnSignUpRequest, WebauthnVerifyRequest,
};

/// Several endpoints wrap the session payload in an envelope.
#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    session: Option<SessionPayload>,
}

/// Production transport against an identity backend.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the auth service root, e.g.
    /// `https://auth.example.com/v1`. A trailing slash is tolerated.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Use a preconfigured client (timeouts, proxies, extra headers).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<Req, Res>(
        &self,
        path: &str,
        body: &Req,
        access_token: Option<&str>,
    ) -> AuthResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "auth request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::transport(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AuthError::transport(format!("reading {path} response failed: {e}")))?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &raw));
        }

        serde_json::from_str(&raw)
            .map_err(|e| AuthError::transport(format!("malformed {path} response: {e}")))
    }

    /// For endpoints whose success body is empty or uninteresting.
    async fn post_no_content<Req>(
        &self,
        path: &str,
        body: &Req,
        access_token: Option<&str>,
    ) -> AuthResult<()>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(%url, "auth request");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::transport(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), &raw));
        }
        Ok(())
    }

    async fn post_session<Req>(
        &self,
        path: &str,
        body: &Req,
        access_token: Option<&str>,
    ) -> AuthResult<SessionPayload>
    where
        Req: Serialize + ?Sized,
    {
        let envelope: SessionEnvelope = self.post(path, body, access_token).await?;
        envelope
            .session
            .ok_or_else(|| AuthError::transport(format!("{path} response missing session")))
    }
}

/// Maps a non-2xx response into [`AuthError`]: parse the structured
/// error body when present, otherwise fall back on the HTTP status.
fn error_from_response(status: u16, body: &str) -> AuthError {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        return parsed.into_auth_error();
    }
    if status >= 500 {
        AuthError::transport(format!("server error {status}"))
    } else {
        AuthError::Authentication {
            status,
            code: "unknown".to_string(),
            message: format!("request rejected with status {status}"),
        }
    }
}

impl AuthTransport for HttpTransport {
    async fn sign_in_email_password(
        &self,
        req: EmailPasswordSignInRequest,
    ) -> AuthResult<SignInResponsePayload> {
        self.post("/signin/email-password", &req, None).await
    }

    async fn sign_up_email_password(
        &self,
        req: SignUpEmailPasswordRequest,
    ) -> AuthResult<SignInResponsePayload> {
        self.post("/signup/email-password", &req, None).await
    }

    async fn sign_in_otp_email(&self, req: OtpEmailRequest) -> AuthResult<()> {
        self.post_no_content("/signin/otp/email", &req, None).await
    }

    async fn verify_otp_email(&self, req: OtpEmailVerifyRequest) -> AuthResult<SessionPayload> {
        self.post_session("/signin/otp/email/verify", &req, None)
            .await
    }

    async fn sign_in_passwordless_email(&self, req: PasswordlessEmailRequest) -> AuthResult<()> {
        self.post_no_content("/signin/passwordless/email", &req, None)
            .await
    }

    async fn sign_in_passwordless_sms(&self, req: SmsSignInRequest) -> AuthResult<()> {
        self.post_no_content("/signin/passwordless/sms", &req, None)
            .await
    }

    async fn verify_sms_otp(&self, req: SmsOtpVerifyRequest) -> AuthResult<SessionPayload> {
        self.post_session("/signin/passwordless/sms/otp", &req, None)
            .await
    }

    async fn sign_in_anonymous(&self) -> AuthResult<SessionPayload> {
        self.post_session("/signin/anonymous", &serde_json::json!({}), None)
            .await
    }

    async fn sign_in_pat(&self, req: PatSignInRequest) -> AuthResult<SessionPayload> {
        self.post_session("/signin/pat", &req, None).await
    }

    async fn sign_in_id_token(&self, req: IdTokenRequest) -> AuthResult<SessionPayload> {
        self.post_session("/signin/idtoken", &req, None).await
    }

    async fn link_id_token(&self, req: IdTokenRequest, access_token: &str) -> AuthResult<()> {
        self.post_no_content("/link/idtoken", &req, Some(access_token))
            .await
    }

    async fn sign_in_mfa_totp(&self, req: MfaTotpSignInRequest) -> AuthResult<SessionPayload> {
        self.post_session("/signin/mfa/totp", &req, None).await
    }

    async fn mfa_generate(&self, access_token: &str) -> AuthResult<MfaGenerateResponse> {
        self.post("/mfa/totp/generate", &serde_json::json!({}), Some(access_token))
            .await
    }

    async fn mfa_activate(&self, req: MfaActivateRequest, access_token: &str) -> AuthResult<()> {
        self.post_no_content("/user/mfa", &req, Some(access_token))
            .await
    }

    async fn webauthn_sign_in_challenge(
        &self,
        req: WebauthnSignInRequest,
    ) -> AuthResult<serde_json::Value> {
        self.post("/signin/webauthn", &req, None).await
    }

    async fn webauthn_sign_in_verify(
        &self,
        req: WebauthnVerifyRequest,
    ) -> AuthResult<SignInResponsePayload> {
        self.post("/signin/webauthn/verify", &req, None).await
    }

    async fn webauthn_sign_up_challenge(
        &self,
        req: WebauthnSignUpRequest,
    ) -> AuthResult<serde_json::Value> {
        self.post("/signup/webauthn", &req, None).await
    }

    async fn webauthn_sign_up_verify(
        &self,
        req: WebauthnVerifyRequest,
    ) -> AuthResult<SignInResponsePayload> {
        self.post("/signup/webauthn/verify", &req, None).await
    }

    async fn deanonymize(&self, req: DeanonymizeRequest, access_token: &str) -> AuthResult<()> {
        self.post_no_content("/user/deanonymize", &req, Some(access_token))
            .await
    }

    async fn refresh_token(&self, req: RefreshTokenRequest) -> AuthResult<SessionPayload> {
        // `/token` returns the session payload directly, no envelope.
        self.post("/token", &req, None).await
    }

    async fn sign_out(&self, req: SignOutRequest) -> AuthResult<()> {
        self.post_no_content("/signout", &req, None).await
    }
}
