//! Broadcast channel implementations.

use std::future::Future;

use tokio::sync::broadcast;
use tracing::warn;

use crate::{SyncMessage, SyncResult};

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out transport between instances. Publishing never blocks; a
/// channel with no listeners simply drops the message.
pub trait BroadcastChannel: Send + Sync + 'static {
    type Receiver: SyncReceiver;

    fn publish(&self, message: SyncMessage) -> SyncResult<()>;

    /// Opens a fresh subscription. Messages published before the call
    /// are not replayed.
    fn subscribe(&self) -> Self::Receiver;
}

/// Receiving side of a subscription. `None` means the channel is gone.
pub trait SyncReceiver: Send + 'static {
    fn recv(&mut self) -> impl Future<Output = Option<SyncMessage>> + Send;
}

/// In-process channel over `tokio::sync::broadcast`. Instances in the
/// same process (several engine handles, tests) see each other's
/// messages; the publisher sees its own as well, which the synchronizer
/// filters by origin.
#[derive(Clone)]
pub struct LocalBroadcast {
    sender: broadcast::Sender<SyncMessage>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannel for LocalBroadcast {
    type Receiver = LocalReceiver;

    fn publish(&self, message: SyncMessage) -> SyncResult<()> {
        // No receivers is fine: nobody is listening yet.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> LocalReceiver {
        LocalReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct LocalReceiver {
    receiver: broadcast::Receiver<SyncMessage>,
}

impl SyncReceiver for LocalReceiver {
    async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Heartbeats are periodic and session state is
                    // absolute, so skipping ahead is safe.
                    warn!(skipped, "sync receiver lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Degraded mode: no channel available. Publishes vanish and nothing is
/// ever received, so every instance sees no live peers and elects
/// itself. Duplicate refreshes across instances are the accepted cost.
#[derive(Clone, Default)]
pub struct ChannelDisabled;

impl BroadcastChannel for ChannelDisabled {
    type Receiver = SilentReceiver;

    fn publish(&self, _message: SyncMessage) -> SyncResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> SilentReceiver {
        SilentReceiver
    }
}

pub struct SilentReceiver;

impl SyncReceiver for SilentReceiver {
    async fn recv(&mut self) -> Option<SyncMessage> {
        std::future::pending().await
    }
}
