//! Test harness: a scriptable transport plus engine builders.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::time::Duration;

use auth_protocol_types::{
    AuthResult, AuthTransport, DeanonymizeRequest, EmailPasswordSignInRequest, IdTokenRequest,
    MfaActivateRequest, MfaChallengePayload, MfaFactor, MfaGenerateResponse, MfaTotpSignInRequest,
    OtpEmailRequest, OtpEmailVerifyRequest, PasswordlessEmailRequest, PatSignInRequest,
    RefreshTokenRequest, SessionPayload,
    SignInResponsePayload, SignOutRequest, SignUpEmailPasswordRequest, SmsOtpVerifyRequest,
    SmsSignInRequest, WebauthnSignInRequest, WebauthnSignUpRequest, WebauthnVerifyRequest,
};
use session_broadcast_sync::{ChannelDisabled, SyncConfig};
use session_store_core::MemoryStorage;
use token_refresh_scheduler::RefreshConfig;

use crate::{AuthEngine, EngineConfig};

/// Session payload with the given tokens, expiring `expires_in` seconds
/// after receipt.
pub fn payload(access_token: &str, refresh_token: &str, expires_in: i64) -> SessionPayload {
    SessionPayload {
        access_token: access_token.to_string(),
        access_token_expires_in: expires_in,
        refresh_token: refresh_token.to_string(),
        refresh_token_id: None,
        user: None,
    }
}

/// Sign-in response carrying a session.
pub fn session_response(access_token: &str, refresh_token: &str) -> SignInResponsePayload {
    SignInResponsePayload {
        session: Some(payload(access_token, refresh_token, 900)),
        mfa: None,
    }
}

/// Sign-in response carrying an MFA challenge instead of a session.
pub fn mfa_response(ticket: &str) -> SignInResponsePayload {
    SignInResponsePayload {
        session: None,
        mfa: Some(MfaChallengePayload {
            ticket: ticket.to_string(),
            allowed_factors: vec![MfaFactor::Totp],
        }),
    }
}

/// Engine config with sub-second refresh timing so scheduler behavior is
/// observable within a test.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        refresh: RefreshConfig {
            margin: Duration::from_millis(900),
            backoff_base: Duration::from_millis(30),
            backoff_max: Duration::from_millis(120),
            max_attempts: 3,
            jitter: 0.0,
        },
        sync: SyncConfig {
            heartbeat_interval: Duration::from_millis(20),
            liveness_window: Duration::from_millis(70),
        },
    }
}

/// Standalone engine over memory storage with no broadcast channel.
pub fn start_engine(
    transport: MockTransport,
) -> AuthEngine<MockTransport, MemoryStorage, ChannelDisabled> {
    AuthEngine::start(
        transport,
        MemoryStorage::new(),
        ChannelDisabled,
        EngineConfig::default(),
    )
}

/// Like [`start_engine`] but with [`fast_config`] timing.
pub fn start_fast_engine(
    transport: MockTransport,
) -> AuthEngine<MockTransport, MemoryStorage, ChannelDisabled> {
    AuthEngine::start(
        transport,
        MemoryStorage::new(),
        ChannelDisabled,
        fast_config(),
    )
}

type Queue<T> = Mutex<VecDeque<AuthResult<T>>>;

#[derive(Default)]
struct Inner {
    sign_in_email: Queue<SignInResponsePayload>,
    sign_in_delay: Mutex<Option<Duration>>,
    sign_up_email: Queue<SignInResponsePayload>,
    otp_email_requests: Mutex<Vec<String>>,
    verify_otp_email: Queue<SessionPayload>,
    magic_link_requests: Mutex<Vec<String>>,
    sms_requests: Mutex<Vec<String>>,
    verify_sms: Queue<SessionPayload>,
    anonymous: Queue<SessionPayload>,
    pat: Queue<SessionPayload>,
    id_token: Queue<SessionPayload>,
    mfa_totp: Queue<SessionPayload>,
    mfa_totp_requests: Mutex<Vec<MfaTotpSignInRequest>>,
    mfa_generate: Queue<MfaGenerateResponse>,
    mfa_activate_requests: Mutex<Vec<MfaActivateRequest>>,
    webauthn_challenges: Queue<serde_json::Value>,
    webauthn_verify: Queue<SignInResponsePayload>,
    deanonymize_requests: Mutex<Vec<DeanonymizeRequest>>,
    link_requests: Mutex<Vec<IdTokenRequest>>,
    refresh: Queue<SessionPayload>,
    refresh_delay: Mutex<Option<Duration>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    sign_out_results: Queue<()>,
    sign_out_requests: Mutex<Vec<SignOutRequest>>,
}

/// Transport whose responses are scripted per endpoint. Endpoints a test
/// never scripted panic on use, so an unexpected network call fails the
/// test loudly.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_sign_in(&self, response: AuthResult<SignInResponsePayload>) {
        self.inner.sign_in_email.lock().unwrap().push_back(response);
    }

    /// Delay every email/password sign-in response, for concurrency tests.
    pub fn delay_sign_in(&self, delay: Duration) {
        *self.inner.sign_in_delay.lock().unwrap() = Some(delay);
    }

    pub fn queue_sign_up(&self, response: AuthResult<SignInResponsePayload>) {
        self.inner.sign_up_email.lock().unwrap().push_back(response);
    }

    pub fn queue_verify_otp_email(&self, response: AuthResult<SessionPayload>) {
        self.inner
            .verify_otp_email
            .lock()
            .unwrap()
            .push_back(response);
    }

    pub fn queue_verify_sms(&self, response: AuthResult<SessionPayload>) {
        self.inner.verify_sms.lock().unwrap().push_back(response);
    }

    pub fn queue_anonymous(&self, response: AuthResult<SessionPayload>) {
        self.inner.anonymous.lock().unwrap().push_back(response);
    }

    pub fn queue_pat(&self, response: AuthResult<SessionPayload>) {
        self.inner.pat.lock().unwrap().push_back(response);
    }

    pub fn queue_id_token(&self, response: AuthResult<SessionPayload>) {
        self.inner.id_token.lock().unwrap().push_back(response);
    }

    pub fn queue_mfa_totp(&self, response: AuthResult<SessionPayload>) {
        self.inner.mfa_totp.lock().unwrap().push_back(response);
    }

    pub fn queue_mfa_generate(&self, response: AuthResult<MfaGenerateResponse>) {
        self.inner.mfa_generate.lock().unwrap().push_back(response);
    }

    pub fn queue_webauthn_challenge(&self, response: AuthResult<serde_json::Value>) {
        self.inner
            .webauthn_challenges
            .lock()
            .unwrap()
            .push_back(response);
    }

    pub fn queue_webauthn_verify(&self, response: AuthResult<SignInResponsePayload>) {
        self.inner
            .webauthn_verify
            .lock()
            .unwrap()
            .push_back(response);
    }

    pub fn queue_refresh(&self, response: AuthResult<SessionPayload>) {
        self.inner.refresh.lock().unwrap().push_back(response);
    }

    /// Delay every refresh response, for stale-result tests.
    pub fn delay_refresh(&self, delay: Duration) {
        *self.inner.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn queue_sign_out(&self, response: AuthResult<()>) {
        self.inner.sign_out_results.lock().unwrap().push_back(response);
    }

    pub fn otp_email_requests(&self) -> Vec<String> {
        self.inner.otp_email_requests.lock().unwrap().clone()
    }

    pub fn magic_link_requests(&self) -> Vec<String> {
        self.inner.magic_link_requests.lock().unwrap().clone()
    }

    pub fn sms_requests(&self) -> Vec<String> {
        self.inner.sms_requests.lock().unwrap().clone()
    }

    pub fn mfa_totp_requests(&self) -> Vec<MfaTotpSignInRequest> {
        self.inner.mfa_totp_requests.lock().unwrap().clone()
    }

    pub fn mfa_activate_requests(&self) -> Vec<MfaActivateRequest> {
        self.inner.mfa_activate_requests.lock().unwrap().clone()
    }

    pub fn deanonymize_requests(&self) -> Vec<DeanonymizeRequest> {
        self.inner.deanonymize_requests.lock().unwrap().clone()
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.inner.refresh_tokens_seen.lock().unwrap().clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.inner.refresh_tokens_seen.lock().unwrap().len()
    }

    pub fn sign_out_requests(&self) -> Vec<SignOutRequest> {
        self.inner.sign_out_requests.lock().unwrap().clone()
    }
}

fn pop<T>(queue: &Queue<T>, endpoint: &str) -> AuthResult<T> {
    queue
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| panic!("{endpoint} was called but not scripted"))
}

impl AuthTransport for MockTransport {
    async fn sign_in_email_password(
        &self,
        _req: EmailPasswordSignInRequest,
    ) -> AuthResult<SignInResponsePayload> {
        let delay = *self.inner.sign_in_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        pop(&self.inner.sign_in_email, "sign_in_email_password")
    }

    async fn sign_up_email_password(
        &self,
        _req: SignUpEmailPasswordRequest,
    ) -> AuthResult<SignInResponsePayload> {
        pop(&self.inner.sign_up_email, "sign_up_email_password")
    }

    async fn sign_in_otp_email(&self, req: OtpEmailRequest) -> AuthResult<()> {
        self.inner.otp_email_requests.lock().unwrap().push(req.email);
        Ok(())
    }

    async fn verify_otp_email(&self, _req: OtpEmailVerifyRequest) -> AuthResult<SessionPayload> {
        pop(&self.inner.verify_otp_email, "verify_otp_email")
    }

    async fn sign_in_passwordless_email(&self, req: PasswordlessEmailRequest) -> AuthResult<()> {
        self.inner.magic_link_requests.lock().unwrap().push(req.email);
        Ok(())
    }

    async fn sign_in_passwordless_sms(&self, req: SmsSignInRequest) -> AuthResult<()> {
        self.inner.sms_requests.lock().unwrap().push(req.phone_number);
        Ok(())
    }

    async fn verify_sms_otp(&self, _req: SmsOtpVerifyRequest) -> AuthResult<SessionPayload> {
        pop(&self.inner.verify_sms, "verify_sms_otp")
    }

    async fn sign_in_anonymous(&self) -> AuthResult<SessionPayload> {
        pop(&self.inner.anonymous, "sign_in_anonymous")
    }

    async fn sign_in_pat(&self, _req: PatSignInRequest) -> AuthResult<SessionPayload> {
        pop(&self.inner.pat, "sign_in_pat")
    }

    async fn sign_in_id_token(&self, _req: IdTokenRequest) -> AuthResult<SessionPayload> {
        pop(&self.inner.id_token, "sign_in_id_token")
    }

    async fn link_id_token(&self, req: IdTokenRequest, _access_token: &str) -> AuthResult<()> {
        self.inner.link_requests.lock().unwrap().push(req);
        Ok(())
    }

    async fn sign_in_mfa_totp(&self, req: MfaTotpSignInRequest) -> AuthResult<SessionPayload> {
        self.inner.mfa_totp_requests.lock().unwrap().push(req);
        pop(&self.inner.mfa_totp, "sign_in_mfa_totp")
    }

    async fn mfa_generate(&self, _access_token: &str) -> AuthResult<MfaGenerateResponse> {
        pop(&self.inner.mfa_generate, "mfa_generate")
    }

    async fn mfa_activate(&self, req: MfaActivateRequest, _access_token: &str) -> AuthResult<()> {
        self.inner.mfa_activate_requests.lock().unwrap().push(req);
        Ok(())
    }

    async fn webauthn_sign_in_challenge(
        &self,
        _req: WebauthnSignInRequest,
    ) -> AuthResult<serde_json::Value> {
        pop(&self.inner.webauthn_challenges, "webauthn_sign_in_challenge")
    }

    async fn webauthn_sign_in_verify(
        &self,
        _req: WebauthnVerifyRequest,
    ) -> AuthResult<SignInResponsePayload> {
        pop(&self.inner.webauthn_verify, "webauthn_sign_in_verify")
    }

    async fn webauthn_sign_up_challenge(
        &self,
        _req: WebauthnSignUpRequest,
    ) -> AuthResult<serde_json::Value> {
        pop(&self.inner.webauthn_challenges, "webauthn_sign_up_challenge")
    }

    async fn webauthn_sign_up_verify(
        &self,
        _req: WebauthnVerifyRequest,
    ) -> AuthResult<SignInResponsePayload> {
        pop(&self.inner.webauthn_verify, "webauthn_sign_up_verify")
    }

    async fn deanonymize(&self, req: DeanonymizeRequest, _access_token: &str) -> AuthResult<()> {
        self.inner.deanonymize_requests.lock().unwrap().push(req);
        Ok(())
    }

    async fn refresh_token(&self, req: RefreshTokenRequest) -> AuthResult<SessionPayload> {
        let delay = *self.inner.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .refresh_tokens_seen
            .lock()
            .unwrap()
            .push(req.refresh_token);
        pop(&self.inner.refresh, "refresh_token")
    }

    async fn sign_out(&self, req: SignOutRequest) -> AuthResult<()> {
        self.inner.sign_out_requests.lock().unwrap().push(req);
        self.inner
            .sign_out_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
