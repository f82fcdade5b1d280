//! Cross-instance session synchronization.
//!
//! Several instances of the auth core may run against the same account
//! (multiple windows, multiple processes sharing a storage backend).
//! This crate keeps them agreeing on two things:
//!
//! - **The session.** Local commits are published as
//!   [`SyncMessage::SessionChanged`]; remote ones are applied to the
//!   local store by the owning engine.
//! - **Who refreshes.** Each instance heartbeats; the instance with the
//!   lowest UUID among live peers is the leader and the only one that
//!   arms refresh timers. Election is lazy — leadership is re-derived
//!   from the peer table on every tick and message, never negotiated.
//!
//! The transport is the [`BroadcastChannel`] trait. [`LocalBroadcast`]
//! covers instances inside one process; [`ChannelDisabled`] is the
//! degraded mode where every instance considers itself leader and
//! duplicate refreshes are tolerated (token rotation makes them safe,
//! just wasteful).

mod channel;
mod synchronizer;

pub use channel::{BroadcastChannel, ChannelDisabled, LocalBroadcast, SyncReceiver};
pub use synchronizer::{Synchronizer, SynchronizerHandle};

use auth_protocol_types::Session;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;
use uuid::Uuid;

/// Messages exchanged between instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    /// The origin instance committed a session change at `generation`.
    #[serde(rename_all = "camelCase")]
    SessionChanged {
        origin: Uuid,
        generation: u64,
        session: Option<Session>,
    },
    /// The origin instance signed out.
    #[serde(rename_all = "camelCase")]
    SignedOut { origin: Uuid },
    /// Liveness beacon.
    #[serde(rename_all = "camelCase")]
    Heartbeat { origin: Uuid },
}

impl SyncMessage {
    /// The instance that sent this message.
    pub fn origin(&self) -> Uuid {
        match self {
            SyncMessage::SessionChanged { origin, .. }
            | SyncMessage::SignedOut { origin }
            | SyncMessage::Heartbeat { origin } => *origin,
        }
    }
}

/// Error type for broadcast channel operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("broadcast channel closed")]
    ChannelClosed,
}

/// Result type for broadcast channel operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Heartbeat and liveness tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often this instance announces itself.
    pub heartbeat_interval: Duration,
    /// A peer silent for longer than this is considered gone.
    pub liveness_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            liveness_window: Duration::from_secs(15),
        }
    }
}
