//! Session types: the authoritative authentication record.
//!
//! A [`SessionPayload`] is what the backend sends on the wire: the access
//! token plus a *relative* `accessTokenExpiresIn` in seconds. A [`Session`]
//! is the committed record with an *absolute* expiry instant, computed at
//! receipt time so the rest of the core never has to reason about when the
//! payload arrived.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The identity attached to a session.
///
/// Optional on a [`Session`] because some flows (mid-MFA, mid-verification)
/// hold tokens before the user record is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id as issued by the backend.
    pub id: String,
    /// Display name, may be empty for anonymous users.
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_number_verified: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Session body as returned by the backend (`/token`, sign-in responses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub access_token: String,
    /// Seconds until the access token expires, relative to receipt.
    pub access_token_expires_in: i64,
    pub refresh_token: String,
    /// Server-side id of the refresh token, used for targeted revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// The authoritative authentication record.
///
/// Either fully present or entirely absent — the store never holds a
/// partially populated session. Mutated only by replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    /// Absolute expiry instant, derived from the payload's relative
    /// `accessTokenExpiresIn` at receipt time.
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl Session {
    /// Builds a session from a wire payload, anchoring the relative
    /// expiry to `received_at`.
    pub fn from_payload(payload: SessionPayload, received_at: DateTime<Utc>) -> Self {
        Self {
            access_token: payload.access_token,
            access_token_expires_at: received_at
                + Duration::seconds(payload.access_token_expires_in),
            refresh_token: payload.refresh_token,
            refresh_token_id: payload.refresh_token_id,
            user: payload.user,
        }
    }

    /// Whether the access token has already expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_token_expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SessionPayload {
        SessionPayload {
            access_token: "t1".into(),
            access_token_expires_in: 900,
            refresh_token: "r1".into(),
            refresh_token_id: None,
            user: Some(UserProfile {
                id: "u1".into(),
                display_name: "Ada".into(),
                email: Some("a@b.com".into()),
                email_verified: true,
                phone_number_verified: false,
                is_anonymous: false,
                roles: vec!["user".into()],
            }),
        }
    }

    #[test]
    fn from_payload_anchors_expiry_to_receipt() {
        let received = Utc::now();
        let session = Session::from_payload(payload(), received);
        assert_eq!(
            session.access_token_expires_at,
            received + Duration::seconds(900)
        );
        assert!(!session.is_expired(received));
        assert!(session.is_expired(received + Duration::seconds(900)));
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session::from_payload(payload(), Utc::now());
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn payload_parses_backend_wire_shape() {
        let payload: SessionPayload = serde_json::from_str(
            r#"{"accessToken":"t1","accessTokenExpiresIn":900,"refreshToken":"r1","user":{"id":"u1"}}"#,
        )
        .unwrap();
        assert_eq!(payload.access_token, "t1");
        assert_eq!(payload.user.unwrap().id, "u1");
    }
}
