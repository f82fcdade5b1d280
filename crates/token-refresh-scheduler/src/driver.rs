//! Background task that owns the refresh timer.

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::fsm::{step, Effect, Event, SchedulerState};
use crate::RefreshConfig;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// What a refresh attempt came back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New session committed; schedule the next refresh for this instant.
    Refreshed { fire_at: DateTime<Utc> },
    /// Network-level failure; worth retrying.
    TransientFailure,
    /// The backend rejected the refresh token. The handler has already
    /// cleared the session; the schedule stops.
    TerminalFailure,
    /// Another commit replaced the session while the refresh was in
    /// flight; the result was discarded. The winning commit's session
    /// update re-arms the schedule.
    Superseded,
}

/// Performs the actual token refresh when the timer fires.
///
/// The handler owns everything the scheduler does not need to know
/// about: the transport call, committing the rotated session to the
/// store, clearing it on terminal failure.
pub trait RefreshHandler: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = RefreshOutcome> + Send;
}

enum Command {
    SessionUpdated { fire_at: Option<DateTime<Utc>> },
    Shutdown,
}

/// Handle to the background scheduling task.
///
/// Spawn with [`RefreshScheduler::spawn`], then feed it session changes
/// via [`session_updated`](Self::session_updated). The task exits on
/// [`shutdown`](Self::shutdown) or when the handle (and all clones) drop.
#[derive(Clone)]
pub struct RefreshScheduler {
    sender: mpsc::Sender<Command>,
}

impl RefreshScheduler {
    /// Spawns the scheduling task.
    ///
    /// `leadership` feeds leadership transitions; pass a watch channel
    /// that never leaves `true` for single-instance use.
    pub fn spawn<H: RefreshHandler>(
        config: RefreshConfig,
        handler: H,
        leadership: watch::Receiver<bool>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        tokio::spawn(run(config, handler, receiver, leadership));
        Self { sender }
    }

    /// Tells the scheduler the session changed. `Some(fire_at)` is the
    /// desired refresh instant; `None` means signed out.
    pub async fn session_updated(&self, fire_at: Option<DateTime<Utc>>) {
        if self
            .sender
            .send(Command::SessionUpdated { fire_at })
            .await
            .is_err()
        {
            warn!("refresh scheduler task is gone, session update dropped");
        }
    }

    /// Synchronous variant of [`session_updated`](Self::session_updated)
    /// for callers outside async context (store change subscribers).
    pub fn notify(&self, fire_at: Option<DateTime<Utc>>) {
        if let Err(err) = self.sender.try_send(Command::SessionUpdated { fire_at }) {
            warn!(%err, "refresh scheduler queue full, session update dropped");
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
    }
}

async fn run<H: RefreshHandler>(
    config: RefreshConfig,
    handler: H,
    mut receiver: mpsc::Receiver<Command>,
    mut leadership: watch::Receiver<bool>,
) {
    let mut state = SchedulerState {
        leader: *leadership.borrow(),
        ..SchedulerState::new()
    };
    let mut deadline: Option<Instant> = None;

    let (new_state, effects) = apply(state, Event::Started, &config, &handler).await;
    apply_effects(effects, &mut deadline);
    state = new_state;

    loop {
        let event = tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::SessionUpdated { fire_at }) => Event::SessionUpdated { fire_at },
                Some(Command::Shutdown) | None => Event::Shutdown,
            },
            changed = leadership.changed() => match changed {
                Ok(()) => {
                    if *leadership.borrow() {
                        Event::LeadershipGained
                    } else {
                        Event::LeadershipLost
                    }
                }
                // Synchronizer gone; keep whatever role we had.
                Err(_) => continue,
            },
            () = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    // No timer armed; park this branch.
                    None => std::future::pending().await,
                }
            } => {
                deadline = None;
                Event::TimerFired
            }
        };

        let shutting_down = matches!(event, Event::Shutdown);
        let (new_state, effects) = apply(state, event, &config, &handler).await;
        apply_effects(effects, &mut deadline);
        state = new_state;

        if shutting_down {
            debug!("refresh scheduler shut down");
            break;
        }
    }
}

/// Runs one event through the state machine, chasing `BeginRefresh`
/// effects through the handler until the schedule settles.
async fn apply<H: RefreshHandler>(
    state: SchedulerState,
    event: Event,
    config: &RefreshConfig,
    handler: &H,
) -> (SchedulerState, Vec<Effect>) {
    let (mut state, mut effects) = step(state, event, Utc::now(), config);

    while let Some(index) = effects.iter().position(|e| *e == Effect::BeginRefresh) {
        effects.remove(index);
        debug!(phase = ?state.phase, "refreshing access token");
        let outcome = handler.refresh().await;
        let event = match outcome {
            RefreshOutcome::Refreshed { fire_at } => Event::RefreshSucceeded { fire_at },
            RefreshOutcome::TransientFailure => Event::RefreshFailed { transient: true },
            // Both park the schedule; for Superseded the pending session
            // update immediately re-arms it.
            RefreshOutcome::TerminalFailure | RefreshOutcome::Superseded => {
                Event::RefreshFailed { transient: false }
            }
        };
        let (next_state, mut next_effects) = step(state, event, Utc::now(), config);
        state = next_state;
        effects.append(&mut next_effects);
    }

    (state, effects)
}

fn apply_effects(effects: Vec<Effect>, deadline: &mut Option<Instant>) {
    for effect in effects {
        match effect {
            Effect::ArmTimer { at } => {
                let delay = (at - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                *deadline = Some(Instant::now() + delay);
            }
            Effect::CancelTimer => *deadline = None,
            Effect::BeginRefresh => {
                // Consumed inside `apply`; nothing reaches here.
            }
        }
    }
}
