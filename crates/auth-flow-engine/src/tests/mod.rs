//! Integration tests for the auth engine.
//!
//! - `harness.rs` - scriptable `MockTransport` and engine builders
//! - `flows.rs`   - sign-in/up flows, validation, MFA, anonymous upgrade
//! - `refresh.rs` - proactive refresh, rotation, terminal rejection
//! - `sync.rs`    - cross-instance broadcast and leader election

pub(crate) mod harness;
