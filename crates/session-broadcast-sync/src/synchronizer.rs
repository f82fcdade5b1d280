//! The synchronizer task: heartbeats, peer tracking, lazy election.

use std::collections::HashMap;

use auth_protocol_types::Session;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{BroadcastChannel, SyncReceiver};
use crate::{SyncConfig, SyncMessage};

/// Spawns and wires the synchronizer background task.
pub struct Synchronizer;

impl Synchronizer {
    /// Starts synchronizing over `channel`.
    ///
    /// `on_remote` runs for every session change published by another
    /// instance — `Some` for a committed session, `None` for sign-out.
    /// The callback must apply the change without republishing it.
    pub fn spawn<C, F>(
        instance_id: Uuid,
        config: SyncConfig,
        channel: C,
        on_remote: F,
    ) -> SynchronizerHandle<C>
    where
        C: BroadcastChannel + Clone,
        F: Fn(Option<Session>) + Send + 'static,
    {
        // Alone until a peer heartbeat says otherwise.
        let (leadership_tx, leadership_rx) = watch::channel(true);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(run(
            instance_id,
            config,
            channel.clone(),
            on_remote,
            leadership_tx,
            shutdown_rx,
        ));

        SynchronizerHandle {
            instance_id,
            channel,
            leadership: leadership_rx,
            shutdown: shutdown_tx,
        }
    }
}

/// Handle for publishing local changes and observing leadership.
#[derive(Clone)]
pub struct SynchronizerHandle<C> {
    instance_id: Uuid,
    channel: C,
    leadership: watch::Receiver<bool>,
    shutdown: mpsc::Sender<()>,
}

impl<C: BroadcastChannel> SynchronizerHandle<C> {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Leadership feed for the refresh scheduler.
    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.leadership.clone()
    }

    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    /// Announces a local session commit. Safe to call from synchronous
    /// contexts (store subscribers).
    pub fn publish_session_changed(&self, generation: u64, session: Option<Session>) {
        let _ = self.channel.publish(SyncMessage::SessionChanged {
            origin: self.instance_id,
            generation,
            session,
        });
    }

    /// Announces a local sign-out.
    pub fn publish_signed_out(&self) {
        let _ = self.channel.publish(SyncMessage::SignedOut {
            origin: self.instance_id,
        });
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
    }
}

/// What we know about a peer instance.
struct Peer {
    last_seen: Instant,
    /// Highest generation applied from this peer. Generations are
    /// per-origin counters; a broadcast at or below this is a stale
    /// reordering or duplicate and is not applied.
    last_applied_generation: u64,
}

impl Peer {
    fn seen(now: Instant) -> Self {
        Self {
            last_seen: now,
            last_applied_generation: 0,
        }
    }
}

/// Leader rule: lowest instance UUID among this instance and all peers
/// heard from within the liveness window.
fn derive_leadership(
    instance_id: Uuid,
    peers: &HashMap<Uuid, Peer>,
    now: Instant,
    window: Duration,
) -> bool {
    !peers
        .iter()
        .any(|(id, peer)| now.duration_since(peer.last_seen) <= window && *id < instance_id)
}

async fn run<C, F>(
    instance_id: Uuid,
    config: SyncConfig,
    channel: C,
    on_remote: F,
    leadership: watch::Sender<bool>,
    mut shutdown: mpsc::Receiver<()>,
) where
    C: BroadcastChannel,
    F: Fn(Option<Session>) + Send + 'static,
{
    let mut receiver = channel.subscribe();
    let mut peers: HashMap<Uuid, Peer> = HashMap::new();
    let mut ticker = interval(config.heartbeat_interval);
    let mut channel_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = channel.publish(SyncMessage::Heartbeat { origin: instance_id });
                peers.retain(|_, peer| {
                    Instant::now().duration_since(peer.last_seen) <= config.liveness_window
                });
                update_leadership(instance_id, &peers, &config, &leadership);
            }
            message = receiver.recv(), if channel_open => {
                match message {
                    Some(message) if message.origin() != instance_id => {
                        let now = Instant::now();
                        let peer = peers
                            .entry(message.origin())
                            .or_insert_with(|| Peer::seen(now));
                        peer.last_seen = now;
                        match message {
                            SyncMessage::SessionChanged { generation, session, origin } => {
                                if generation <= peer.last_applied_generation {
                                    debug!(%origin, generation, "ignoring stale session broadcast");
                                } else {
                                    peer.last_applied_generation = generation;
                                    debug!(%origin, generation, "applying remote session change");
                                    on_remote(session);
                                }
                            }
                            SyncMessage::SignedOut { origin } => {
                                debug!(%origin, "applying remote sign-out");
                                on_remote(None);
                            }
                            SyncMessage::Heartbeat { .. } => {}
                        }
                        update_leadership(instance_id, &peers, &config, &leadership);
                    }
                    // Our own echo.
                    Some(_) => {}
                    None => {
                        // Channel gone: degraded mode, alone and leading.
                        info!("sync channel closed, continuing standalone");
                        channel_open = false;
                        peers.clear();
                        update_leadership(instance_id, &peers, &config, &leadership);
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("synchronizer shut down");
                break;
            }
        }
    }
}

fn update_leadership(
    instance_id: Uuid,
    peers: &HashMap<Uuid, Peer>,
    config: &SyncConfig,
    leadership: &watch::Sender<bool>,
) {
    let leader = derive_leadership(instance_id, peers, Instant::now(), config.liveness_window);
    leadership.send_if_modified(|current| {
        if *current != leader {
            info!(leader, "leadership changed");
            *current = leader;
            true
        } else {
            false
        }
    });
}
