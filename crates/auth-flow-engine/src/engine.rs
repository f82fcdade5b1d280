//! `AuthEngine`: intents, wiring, and the refresh handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use auth_protocol_types::{
    codes, validators, AuthError, AuthResult, AuthTransport, DeanonymizeRequest,
    EmailPasswordSignInRequest, IdTokenRequest, MfaActivateRequest, MfaGenerateResponse,
    MfaTotpSignInRequest, OtpEmailRequest, OtpEmailVerifyRequest, PasswordlessEmailRequest,
    PatSignInRequest, RefreshTokenRequest, Session, SessionPayload, SignInResponsePayload,
    SignOutRequest,
    SignUpEmailPasswordRequest, SmsOtpVerifyRequest, SmsSignInRequest, UserProfile,
    VerificationDetail, WebauthnSignInRequest, WebauthnSignUpRequest, WebauthnVerifyRequest,
};
use session_broadcast_sync::{BroadcastChannel, SyncConfig, Synchronizer, SynchronizerHandle};
use session_store_core::{CommitOrigin, SessionStorageBackend, SessionStore};
use token_refresh_scheduler::{
    compute_fire_at, RefreshConfig, RefreshHandler, RefreshOutcome, RefreshScheduler,
};

use crate::context::{FlowContext, FlowKind, FlowOutcome, MfaTicket};
use crate::webauthn::WebauthnConnector;

/// Engine tuning: refresh timing plus synchronizer heartbeats.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub refresh: RefreshConfig,
    pub sync: SyncConfig,
}

/// The authentication flow controller.
///
/// Generic over the transport, the storage backend, and the broadcast
/// channel so tests can script all three. Construction via
/// [`AuthEngine::start`] spawns the scheduler and synchronizer tasks;
/// it must run inside a tokio runtime.
pub struct AuthEngine<T, S, C: BroadcastChannel> {
    transport: Arc<T>,
    store: Arc<SessionStore<S>>,
    scheduler: RefreshScheduler,
    synchronizer: SynchronizerHandle<C>,
    flow: Mutex<Option<FlowContext>>,
    in_flight: AtomicBool,
    // Bumped on every sign-out; flows that started under an older epoch
    // discard their result instead of committing.
    sign_out_epoch: AtomicU64,
}

impl<T, S, C> AuthEngine<T, S, C>
where
    T: AuthTransport,
    S: SessionStorageBackend + 'static,
    C: BroadcastChannel + Clone,
{
    /// Builds the engine and starts its background tasks: restores any
    /// persisted session (fail open), spawns the synchronizer and the
    /// refresh scheduler, and wires store commits to both.
    pub fn start(transport: T, backend: S, channel: C, config: EngineConfig) -> Self {
        let transport = Arc::new(transport);
        let store = Arc::new(SessionStore::new(backend));

        let instance_id = Uuid::new_v4();
        let synchronizer = {
            let store = Arc::clone(&store);
            // Replicated commits are not published back out, so peer
            // changes cannot echo forever.
            Synchronizer::spawn(instance_id, config.sync, channel, move |session| {
                store.set_replicated(session);
            })
        };

        let refresher = Refresher {
            transport: Arc::clone(&transport),
            store: Arc::clone(&store),
            synchronizer: synchronizer.clone(),
            config: config.refresh.clone(),
        };
        let scheduler = RefreshScheduler::spawn(
            config.refresh.clone(),
            refresher,
            synchronizer.leadership(),
        );

        {
            let scheduler = scheduler.clone();
            let synchronizer = synchronizer.clone();
            let refresh_config = config.refresh;
            store.subscribe(move |session, generation, origin| {
                let fire_at = session.map(|s| {
                    compute_fire_at(s.access_token_expires_at, Utc::now(), &refresh_config)
                });
                scheduler.notify(fire_at);
                if origin == CommitOrigin::Local {
                    synchronizer.publish_session_changed(generation, session.cloned());
                }
            });
        }

        // Restore is a replicated commit: peers either already have this
        // session or have moved past it.
        if store.restore().is_some() {
            info!(%instance_id, "restored persisted session");
        }

        Self {
            transport,
            store,
            scheduler,
            synchronizer,
            flow: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            sign_out_epoch: AtomicU64::new(0),
        }
    }

    /// Stops the background tasks. The store (and its persisted state)
    /// stays intact.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.synchronizer.shutdown().await;
    }

    // --- observation ---------------------------------------------------

    pub fn session(&self) -> Option<Session> {
        self.store.get()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.store.get().and_then(|s| s.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get().is_some()
    }

    /// Whether this instance currently owns the refresh schedule.
    pub fn is_leader(&self) -> bool {
        self.synchronizer.is_leader()
    }

    /// The shared store, for hosts that want change subscriptions.
    pub fn store(&self) -> &Arc<SessionStore<S>> {
        &self.store
    }

    // --- sign-in intents -----------------------------------------------

    pub async fn sign_in_email_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        require_password(password)?;
        let guard = self.begin_intent()?;

        let result = self
            .transport
            .sign_in_email_password(EmailPasswordSignInRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await;

        match result {
            Ok(response) => self.complete_sign_in(response, email, FlowKind::EmailPassword, &guard),
            Err(err) if err.is_unverified_user() => {
                Ok(FlowOutcome::NeedsVerification(
                    VerificationDetail::EmailVerification {
                        email: email.to_string(),
                    },
                ))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn sign_up_email_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        require_password(password)?;
        let guard = self.begin_intent()?;

        let response = self
            .transport
            .sign_up_email_password(SignUpEmailPasswordRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.complete_sign_in(response, email, FlowKind::EmailSignUp, &guard)
    }

    /// Requests a one-time code by email. Completes with
    /// [`verify_otp_email`](Self::verify_otp_email).
    pub async fn sign_in_otp_email(&self, email: &str) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        let _guard = self.begin_intent()?;

        self.transport
            .sign_in_otp_email(OtpEmailRequest {
                email: email.to_string(),
            })
            .await?;

        self.set_flow(FlowContext::new(FlowKind::EmailOtp, email));
        Ok(FlowOutcome::NeedsVerification(VerificationDetail::EmailOtp {
            email: email.to_string(),
        }))
    }

    pub async fn verify_otp_email(&self, email: &str, otp: &str) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        require_otp(otp)?;
        let guard = self.begin_intent()?;

        let result = self
            .transport
            .verify_otp_email(OtpEmailVerifyRequest {
                email: email.to_string(),
                otp: otp.to_string(),
            })
            .await;
        self.complete_verification(result, &guard)
    }

    /// Requests a magic link by email. The link completes the sign-in
    /// out-of-band; there is no in-app verify step.
    pub async fn sign_in_passwordless_email(&self, email: &str) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        let _guard = self.begin_intent()?;

        self.transport
            .sign_in_passwordless_email(PasswordlessEmailRequest {
                email: email.to_string(),
            })
            .await?;

        Ok(FlowOutcome::NeedsVerification(VerificationDetail::MagicLink {
            email: email.to_string(),
        }))
    }

    /// Requests a one-time code by SMS. Completes with
    /// [`verify_sms_otp`](Self::verify_sms_otp).
    pub async fn sign_in_passwordless_sms(&self, phone_number: &str) -> AuthResult<FlowOutcome> {
        require_phone(phone_number)?;
        let _guard = self.begin_intent()?;

        self.transport
            .sign_in_passwordless_sms(SmsSignInRequest {
                phone_number: phone_number.to_string(),
            })
            .await?;

        self.set_flow(FlowContext::new(FlowKind::SmsOtp, phone_number));
        Ok(FlowOutcome::NeedsVerification(VerificationDetail::SmsOtp {
            phone_number: phone_number.to_string(),
        }))
    }

    pub async fn verify_sms_otp(&self, phone_number: &str, otp: &str) -> AuthResult<FlowOutcome> {
        require_phone(phone_number)?;
        require_otp(otp)?;
        let guard = self.begin_intent()?;

        let result = self
            .transport
            .verify_sms_otp(SmsOtpVerifyRequest {
                phone_number: phone_number.to_string(),
                otp: otp.to_string(),
            })
            .await;
        self.complete_verification(result, &guard)
    }

    pub async fn sign_in_anonymous(&self) -> AuthResult<FlowOutcome> {
        let guard = self.begin_intent()?;
        let payload = self.transport.sign_in_anonymous().await?;
        Ok(FlowOutcome::SignedIn(self.commit(payload, &guard)?))
    }

    pub async fn sign_in_pat(&self, personal_access_token: &str) -> AuthResult<FlowOutcome> {
        let guard = self.begin_intent()?;
        let payload = self
            .transport
            .sign_in_pat(PatSignInRequest {
                personal_access_token: personal_access_token.to_string(),
            })
            .await?;
        Ok(FlowOutcome::SignedIn(self.commit(payload, &guard)?))
    }

    /// Federated sign-in with a provider-issued id token.
    pub async fn sign_in_id_token(
        &self,
        provider: &str,
        id_token: &str,
        nonce: Option<&str>,
    ) -> AuthResult<FlowOutcome> {
        let guard = self.begin_intent()?;
        let payload = self
            .transport
            .sign_in_id_token(IdTokenRequest {
                provider: provider.to_string(),
                id_token: id_token.to_string(),
                nonce: nonce.map(str::to_string),
            })
            .await?;
        Ok(FlowOutcome::SignedIn(self.commit(payload, &guard)?))
    }

    /// Links a federated identity to the signed-in user.
    pub async fn link_id_token(
        &self,
        provider: &str,
        id_token: &str,
        nonce: Option<&str>,
    ) -> AuthResult<()> {
        let session = self.require_session()?;
        self.transport
            .link_id_token(
                IdTokenRequest {
                    provider: provider.to_string(),
                    id_token: id_token.to_string(),
                    nonce: nonce.map(str::to_string),
                },
                &session.access_token,
            )
            .await
    }

    /// Completes a [`FlowOutcome::NeedsSecondFactor`] sign-in. Uses the
    /// pending flow's ticket unless one is passed explicitly.
    pub async fn sign_in_mfa_totp(
        &self,
        ticket: Option<&str>,
        otp: &str,
    ) -> AuthResult<FlowOutcome> {
        require_otp(otp)?;
        let ticket = match ticket {
            Some(ticket) => ticket.to_string(),
            None => self
                .flow
                .lock()
                .expect("lock poisoned")
                .as_ref()
                .and_then(|flow| flow.mfa.as_ref())
                .map(|mfa| mfa.ticket.clone())
                .ok_or_else(|| {
                    AuthError::state(codes::NO_MFA_TICKET, "no pending second-factor challenge")
                })?,
        };
        if !validators::is_valid_mfa_ticket(&ticket) {
            return Err(AuthError::validation(
                codes::INVALID_MFA_TICKET,
                "malformed MFA ticket",
            ));
        }
        let guard = self.begin_intent()?;

        let result = self
            .transport
            .sign_in_mfa_totp(MfaTotpSignInRequest {
                ticket,
                otp: otp.to_string(),
            })
            .await;
        self.complete_verification(result, &guard)
    }

    // --- security keys -------------------------------------------------

    /// WebAuthn sign-in: fetches the assertion challenge, has the
    /// connector sign it, and submits the result.
    pub async fn sign_in_security_key<W: WebauthnConnector>(
        &self,
        email: &str,
        connector: &W,
    ) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        let guard = self.begin_intent()?;

        let challenge = self
            .transport
            .webauthn_sign_in_challenge(WebauthnSignInRequest {
                email: email.to_string(),
            })
            .await?;
        let credential = connector.get_credential(challenge).await?;
        let response = self
            .transport
            .webauthn_sign_in_verify(WebauthnVerifyRequest {
                email: Some(email.to_string()),
                credential,
            })
            .await?;
        self.complete_sign_in(response, email, FlowKind::SecurityKey, &guard)
    }

    /// WebAuthn sign-up: registration challenge, credential creation,
    /// verification.
    pub async fn sign_up_security_key<W: WebauthnConnector>(
        &self,
        email: &str,
        nickname: Option<&str>,
        connector: &W,
    ) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        let guard = self.begin_intent()?;

        let challenge = self
            .transport
            .webauthn_sign_up_challenge(WebauthnSignUpRequest {
                email: email.to_string(),
                nickname: nickname.map(str::to_string),
            })
            .await?;
        let credential = connector.create_credential(challenge).await?;
        let response = self
            .transport
            .webauthn_sign_up_verify(WebauthnVerifyRequest {
                email: Some(email.to_string()),
                credential,
            })
            .await?;
        self.complete_sign_in(response, email, FlowKind::SecurityKey, &guard)
    }

    // --- MFA management ------------------------------------------------

    /// Starts TOTP enrollment for the signed-in user. Session-scoped, so
    /// it runs outside the single-flow gate.
    pub async fn mfa_generate(&self) -> AuthResult<MfaGenerateResponse> {
        let session = self.require_session()?;
        self.transport.mfa_generate(&session.access_token).await
    }

    /// Activates TOTP with a code from the authenticator app.
    pub async fn mfa_activate(&self, code: &str) -> AuthResult<()> {
        require_otp(code)?;
        let session = self.require_session()?;
        self.transport
            .mfa_activate(
                MfaActivateRequest {
                    code: code.to_string(),
                    active_mfa_type: "totp".to_string(),
                },
                &session.access_token,
            )
            .await
    }

    // --- anonymous upgrade ---------------------------------------------

    /// Upgrades the signed-in anonymous user to an email+password
    /// account, keeping the user id. The address must be verified before
    /// the upgrade takes effect.
    pub async fn link_email_password(&self, email: &str, password: &str) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        require_password(password)?;
        let session = self.require_anonymous()?;
        let _guard = self.begin_intent()?;

        self.transport
            .deanonymize(
                DeanonymizeRequest {
                    sign_in_method: "email-password".to_string(),
                    email: Some(email.to_string()),
                    password: Some(password.to_string()),
                    connection: None,
                    phone_number: None,
                },
                &session.access_token,
            )
            .await?;
        Ok(FlowOutcome::NeedsVerification(
            VerificationDetail::EmailVerification {
                email: email.to_string(),
            },
        ))
    }

    /// Upgrades the signed-in anonymous user via a passwordless email;
    /// the upgrade completes when the emailed link or code is used.
    pub async fn link_passwordless_email(&self, email: &str) -> AuthResult<FlowOutcome> {
        require_email(email)?;
        let session = self.require_anonymous()?;
        let _guard = self.begin_intent()?;

        self.transport
            .deanonymize(
                DeanonymizeRequest {
                    sign_in_method: "passwordless".to_string(),
                    email: Some(email.to_string()),
                    password: None,
                    connection: Some("email".to_string()),
                    phone_number: None,
                },
                &session.access_token,
            )
            .await?;
        Ok(FlowOutcome::NeedsVerification(VerificationDetail::EmailOtp {
            email: email.to_string(),
        }))
    }

    // --- sign-out ------------------------------------------------------

    /// Clears the local session, announces the sign-out, and revokes the
    /// refresh token server-side (every token for the user when `all`).
    /// Idempotent: signing out while signed out is a no-op `Ok`. Server
    /// errors are logged, never surfaced — the local session is already
    /// gone.
    pub async fn sign_out(&self, all: bool) -> AuthResult<()> {
        // Not gated by the single-flow guard: sign-out must win against an
        // in-flight flow, whose late result the epoch bump discards.
        self.sign_out_epoch.fetch_add(1, Ordering::SeqCst);
        *self.flow.lock().expect("lock poisoned") = None;

        let Some(session) = self.store.get() else {
            debug!("sign-out with no session, nothing to do");
            return Ok(());
        };

        self.store.set(None);
        self.synchronizer.publish_signed_out();

        if let Err(err) = self
            .transport
            .sign_out(SignOutRequest {
                refresh_token: Some(session.refresh_token),
                all,
            })
            .await
        {
            warn!(%err, "server-side sign-out failed, local session already cleared");
        }
        Ok(())
    }

    // --- internals -----------------------------------------------------

    fn begin_intent(&self) -> AuthResult<IntentGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AuthError::state(
                codes::FLOW_ALREADY_RUNNING,
                "another authentication flow is in progress",
            ));
        }
        Ok(IntentGuard {
            flag: &self.in_flight,
            epoch: self.sign_out_epoch.load(Ordering::SeqCst),
        })
    }

    fn set_flow(&self, context: FlowContext) {
        *self.flow.lock().expect("lock poisoned") = Some(context);
    }

    /// Current pending multi-step flow, if any.
    pub fn flow(&self) -> Option<FlowContext> {
        self.flow.lock().expect("lock poisoned").clone()
    }

    fn require_session(&self) -> AuthResult<Session> {
        self.store
            .get()
            .ok_or_else(|| AuthError::state(codes::NOT_SIGNED_IN, "no active session"))
    }

    fn require_anonymous(&self) -> AuthResult<Session> {
        let session = self.require_session()?;
        let anonymous = session
            .user
            .as_ref()
            .is_some_and(|user| user.is_anonymous);
        if !anonymous {
            return Err(AuthError::state(
                codes::NOT_ANONYMOUS,
                "current user is not anonymous",
            ));
        }
        Ok(session)
    }

    /// Routes a sign-in response: MFA challenge, session, or pending
    /// verification (sign-up before the address is confirmed).
    fn complete_sign_in(
        &self,
        response: SignInResponsePayload,
        identifier: &str,
        kind: FlowKind,
        intent: &IntentGuard<'_>,
    ) -> AuthResult<FlowOutcome> {
        if let Some(challenge) = response.mfa {
            let ticket = MfaTicket::from(challenge);
            let mut context = FlowContext::new(kind, identifier);
            context.mfa = Some(ticket.clone());
            self.set_flow(context);
            return Ok(FlowOutcome::NeedsSecondFactor(ticket));
        }
        if let Some(payload) = response.session {
            return Ok(FlowOutcome::SignedIn(self.commit(payload, intent)?));
        }
        Ok(FlowOutcome::NeedsVerification(
            VerificationDetail::EmailVerification {
                email: identifier.to_string(),
            },
        ))
    }

    /// Routes a verification step result: commit on success, count the
    /// attempt on rejection.
    fn complete_verification(
        &self,
        result: AuthResult<SessionPayload>,
        intent: &IntentGuard<'_>,
    ) -> AuthResult<FlowOutcome> {
        match result {
            Ok(payload) => Ok(FlowOutcome::SignedIn(self.commit(payload, intent)?)),
            Err(err) => {
                if let Some(flow) = self.flow.lock().expect("lock poisoned").as_mut() {
                    flow.attempts += 1;
                }
                Err(err)
            }
        }
    }

    /// Commits a session payload: store write (which fans out to the
    /// scheduler and synchronizer) and flow teardown. A result arriving
    /// after an intervening sign-out is discarded, not committed.
    fn commit(&self, payload: SessionPayload, intent: &IntentGuard<'_>) -> AuthResult<Session> {
        if self.sign_out_epoch.load(Ordering::SeqCst) != intent.epoch {
            debug!("discarding flow result, signed out while it was in flight");
            return Err(AuthError::state(
                codes::FLOW_DISCARDED,
                "signed out while the flow was in flight",
            ));
        }
        let session = Session::from_payload(payload, Utc::now());
        self.store.set(Some(session.clone()));
        *self.flow.lock().expect("lock poisoned") = None;
        Ok(session)
    }
}

struct IntentGuard<'a> {
    flag: &'a AtomicBool,
    // Sign-out epoch observed when the flow began.
    epoch: u64,
}

impl Drop for IntentGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn require_email(email: &str) -> AuthResult<()> {
    if validators::is_valid_email(email) {
        Ok(())
    } else {
        Err(AuthError::validation(
            codes::INVALID_EMAIL,
            "not a valid email address",
        ))
    }
}

fn require_password(password: &str) -> AuthResult<()> {
    if validators::is_valid_password(password) {
        Ok(())
    } else {
        Err(AuthError::validation(
            codes::INVALID_PASSWORD,
            "password is too short",
        ))
    }
}

fn require_phone(phone_number: &str) -> AuthResult<()> {
    if validators::is_valid_phone_number(phone_number) {
        Ok(())
    } else {
        Err(AuthError::validation(
            codes::INVALID_PHONE_NUMBER,
            "not a valid phone number",
        ))
    }
}

fn require_otp(otp: &str) -> AuthResult<()> {
    if validators::is_valid_otp(otp) {
        Ok(())
    } else {
        Err(AuthError::validation(
            codes::INVALID_OTP,
            "one-time codes are six digits",
        ))
    }
}

/// Refresh handler: exchanges the refresh token, commits the rotated
/// session behind a generation check, clears on terminal rejection.
struct Refresher<T, S, C: BroadcastChannel> {
    transport: Arc<T>,
    store: Arc<SessionStore<S>>,
    synchronizer: SynchronizerHandle<C>,
    config: RefreshConfig,
}

impl<T, S, C> RefreshHandler for Refresher<T, S, C>
where
    T: AuthTransport,
    S: SessionStorageBackend + 'static,
    C: BroadcastChannel + Clone,
{
    async fn refresh(&self) -> RefreshOutcome {
        let (session, generation) = self.store.snapshot();
        let Some(session) = session else {
            debug!("refresh fired with no session");
            return RefreshOutcome::Superseded;
        };

        match self
            .transport
            .refresh_token(RefreshTokenRequest {
                refresh_token: session.refresh_token.clone(),
            })
            .await
        {
            Ok(payload) => {
                let rotated = Session::from_payload(payload, Utc::now());
                let fire_at =
                    compute_fire_at(rotated.access_token_expires_at, Utc::now(), &self.config);
                match self.store.set_if_generation(generation, Some(rotated)) {
                    Ok(_) => {
                        debug!("access token refreshed");
                        RefreshOutcome::Refreshed { fire_at }
                    }
                    Err(stale) => {
                        debug!(
                            expected = stale.expected,
                            current = stale.current,
                            "discarding refresh result, session changed underneath"
                        );
                        RefreshOutcome::Superseded
                    }
                }
            }
            Err(err) if err.is_transient() => {
                warn!(%err, "token refresh failed, will retry");
                RefreshOutcome::TransientFailure
            }
            Err(err) => {
                warn!(%err, "refresh token rejected, signing out");
                self.store.set(None);
                self.synchronizer.publish_signed_out();
                RefreshOutcome::TerminalFailure
            }
        }
    }
}
