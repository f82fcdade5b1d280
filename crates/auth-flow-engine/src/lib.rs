//! The authentication flow controller.
//!
//! [`AuthEngine`] is the single entry point applications talk to. It
//! owns the wiring between the three background concerns:
//!
//! - the [`SessionStore`](session_store_core::SessionStore), the
//!   authoritative copy of the current session;
//! - the refresh scheduler, which rotates the access token before it
//!   expires;
//! - the cross-instance synchronizer, which mirrors session changes to
//!   sibling instances and elects the one responsible for refreshing.
//!
//! Every sign-in intent follows the same contract: validate locally,
//! reject if another flow is in flight, call the transport, commit the
//! resulting session to the store, and return a [`FlowOutcome`]. The
//! store commit is what makes everything else happen — the scheduler and
//! synchronizer react to store changes, never to flows directly.

mod context;
mod engine;
mod webauthn;

#[cfg(test)]
mod tests;

pub use context::{FlowContext, FlowKind, FlowOutcome, MfaTicket};
pub use engine::{AuthEngine, EngineConfig};
pub use webauthn::WebauthnConnector;
