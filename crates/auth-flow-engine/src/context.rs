//! Per-flow state for multi-step sign-ins.

use auth_protocol_types::{MfaChallengePayload, MfaFactor, Session, VerificationDetail};

/// Which flow opened the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    EmailPassword,
    EmailSignUp,
    EmailOtp,
    SmsOtp,
    SecurityKey,
}

/// Ticket correlating a suspended sign-in with its second factor.
/// Consumed once; submitting it invalidates it server-side.
#[derive(Debug, Clone, PartialEq)]
pub struct MfaTicket {
    pub ticket: String,
    pub allowed_factors: Vec<MfaFactor>,
}

impl From<MfaChallengePayload> for MfaTicket {
    fn from(payload: MfaChallengePayload) -> Self {
        Self {
            ticket: payload.ticket,
            allowed_factors: payload.allowed_factors,
        }
    }
}

/// State carried between the steps of a multi-step flow (OTP request →
/// verify, first factor → second factor). Created when the flow starts,
/// dropped at any terminal outcome.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub kind: FlowKind,
    /// Email or phone number the flow was started with.
    pub identifier: String,
    /// Pending second-factor challenge, if the first factor passed.
    pub mfa: Option<MfaTicket>,
    /// Failed verification attempts so far.
    pub attempts: u32,
}

impl FlowContext {
    pub fn new(kind: FlowKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            mfa: None,
            attempts: 0,
        }
    }
}

/// Where a flow intent landed.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// Session committed; the caller is authenticated.
    SignedIn(Session),
    /// The flow paused for an out-of-band step (verification email,
    /// emailed or texted one-time code).
    NeedsVerification(VerificationDetail),
    /// First factor accepted; a TOTP code must follow.
    NeedsSecondFactor(MfaTicket),
}

impl FlowOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            FlowOutcome::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}
