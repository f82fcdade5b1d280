//! Boundary to the platform authenticator.

use std::future::Future;

use auth_protocol_types::AuthResult;

/// Relays opaque WebAuthn payloads to whatever authenticator the host
/// platform provides. The engine never inspects challenge or credential
/// JSON; it forwards the backend's challenge out and the signed
/// credential back.
pub trait WebauthnConnector: Send + Sync {
    /// Registration ceremony: create a new credential for the given
    /// creation options.
    fn create_credential(
        &self,
        options: serde_json::Value,
    ) -> impl Future<Output = AuthResult<serde_json::Value>> + Send;

    /// Assertion ceremony: sign the given request options with an
    /// existing credential.
    fn get_credential(
        &self,
        options: serde_json::Value,
    ) -> impl Future<Output = AuthResult<serde_json::Value>> + Send;
}
