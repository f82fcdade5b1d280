//! Shared types for the Latchkey authentication session core.
//!
//! This crate defines the vocabulary every other crate speaks:
//! - **Session types** ([`Session`], [`UserProfile`]) — the authoritative
//!   authentication record and the identity attached to it.
//! - **Wire payloads** — request/response bodies exchanged with the
//!   identity backend, camelCase on the wire.
//! - **Error taxonomy** ([`AuthError`]) — validation, transport,
//!   authentication, and state errors with stable machine-readable codes.
//! - **Transport boundary** ([`AuthTransport`]) — the trait the HTTP
//!   client implements and the flow engine consumes.

#![allow(async_fn_in_trait)]

pub mod codes;
mod error;
mod payloads;
mod session;
mod transport;
pub mod validators;

pub use error::{AuthError, AuthResult, ErrorResponse};
pub use payloads::{
    DeanonymizeRequest, EmailPasswordSignInRequest, IdTokenRequest, MfaActivateRequest,
    MfaChallengePayload, MfaFactor, MfaGenerateResponse, MfaTotpSignInRequest, OtpEmailRequest,
    OtpEmailVerifyRequest, PasswordlessEmailRequest, PatSignInRequest, RefreshTokenRequest,
    SignInResponsePayload, SignOutRequest, SignUpEmailPasswordRequest, SmsOtpVerifyRequest,
    SmsSignInRequest, VerificationDetail, WebauthnSignInRequest, WebauthnSignUpRequest,
    WebauthnVerifyRequest,
};
pub use session::{Session, SessionPayload, UserProfile};
pub use transport::AuthTransport;
