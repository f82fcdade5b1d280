//! The refresh schedule as a pure state machine.
//!
//! All timing decisions live here so they can be tested with a fake
//! clock. The driver owns the real timer and translates [`Effect`]s into
//! `sleep_until` deadlines.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use crate::RefreshConfig;

/// Where the schedule currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Not started, or shut down. Ignores everything except `Started`.
    Stopped,
    /// No timer armed. `fire_at` remembers when a refresh is wanted so a
    /// follower can arm it on gaining leadership; `None` means no session
    /// needs refreshing.
    Idle { fire_at: Option<DateTime<Utc>> },
    /// Timer armed for `fire_at`.
    Armed { fire_at: DateTime<Utc> },
    /// Refresh call in flight. `attempt` counts this call (1-based).
    Refreshing { attempt: u32 },
    /// Waiting out a backoff delay before attempt `attempt + 1`.
    Backoff {
        attempt: u32,
        resume_at: DateTime<Utc>,
    },
}

/// Schedule state: the phase plus whether this instance currently holds
/// leadership. Followers never arm timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub phase: Phase,
    pub leader: bool,
}

impl SchedulerState {
    /// Starts stopped and leading. Single-instance deployments never see
    /// a leadership event and behave as if election did not exist.
    pub fn new() -> Self {
        Self {
            phase: Phase::Stopped,
            leader: true,
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    /// The session changed. `Some(fire_at)` is the desired refresh
    /// instant for the new session; `None` means signed out.
    SessionUpdated { fire_at: Option<DateTime<Utc>> },
    TimerFired,
    /// Refresh succeeded; `fire_at` is the desired instant for the
    /// rotated session.
    RefreshSucceeded { fire_at: DateTime<Utc> },
    /// Refresh failed. Transient failures back off and retry; terminal
    /// ones stop the schedule.
    RefreshFailed { transient: bool },
    LeadershipGained,
    LeadershipLost,
    Shutdown,
}

/// Outputs the driver must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Arm (or re-arm) the timer for this instant. An instant already in
    /// the past fires immediately.
    ArmTimer { at: DateTime<Utc> },
    CancelTimer,
    /// Call the refresh handler.
    BeginRefresh,
}

/// When the refresh for a session expiring at `expires_at` should fire:
/// `expires_at - margin`, clamped to `now` if that is already past.
pub fn compute_fire_at(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RefreshConfig,
) -> DateTime<Utc> {
    let margin = chrono::Duration::from_std(config.margin).unwrap_or(chrono::Duration::zero());
    (expires_at - margin).max(now)
}

/// Backoff delay before retry number `attempt + 1`, given `attempt`
/// consecutive failures: `base * 2^(attempt - 1)` capped at `max`, with
/// ±`jitter` fraction of randomness so a fleet of clients does not retry
/// in lockstep.
pub fn compute_backoff(attempt: u32, config: &RefreshConfig) -> chrono::Duration {
    if attempt == 0 {
        return chrono::Duration::zero();
    }

    let base_ms = config.backoff_base.as_millis() as u64;
    let max_ms = config.backoff_max.as_millis() as u64;
    let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    let jittered = apply_jitter(delay_ms, config.jitter);
    chrono::Duration::milliseconds(jittered as i64)
}

fn apply_jitter(delay_ms: u64, jitter: f64) -> u64 {
    if jitter <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }
    let spread = (delay_ms as f64 * jitter).round() as i64;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    delay_ms.saturating_add_signed(offset)
}

/// Advances the schedule by one event. Pure: same inputs, same outputs.
pub fn step(
    state: SchedulerState,
    event: Event,
    now: DateTime<Utc>,
    config: &RefreshConfig,
) -> (SchedulerState, Vec<Effect>) {
    let SchedulerState { phase, leader } = state;

    match (phase, event) {
        // Shutdown wins from anywhere.
        (_, Event::Shutdown) => (
            SchedulerState {
                phase: Phase::Stopped,
                leader,
            },
            vec![Effect::CancelTimer],
        ),

        (Phase::Stopped, Event::Started) => (
            SchedulerState {
                phase: Phase::Idle { fire_at: None },
                leader,
            },
            vec![],
        ),
        // Stopped ignores everything else.
        (Phase::Stopped, _) => (
            SchedulerState {
                phase: Phase::Stopped,
                leader,
            },
            vec![],
        ),

        // Signed out: drop any timer and any in-flight bookkeeping.
        (_, Event::SessionUpdated { fire_at: None }) => (
            SchedulerState {
                phase: Phase::Idle { fire_at: None },
                leader,
            },
            vec![Effect::CancelTimer],
        ),

        // New session: arm if leading, remember otherwise. This also
        // covers a sign-in landing while a refresh for the old session is
        // in flight; the stale result is discarded by generation at the
        // store level and ignored here because the phase moved on.
        (_, Event::SessionUpdated { fire_at: Some(at) }) => {
            if leader {
                (
                    SchedulerState {
                        phase: Phase::Armed { fire_at: at },
                        leader,
                    },
                    vec![Effect::CancelTimer, Effect::ArmTimer { at }],
                )
            } else {
                (
                    SchedulerState {
                        phase: Phase::Idle { fire_at: Some(at) },
                        leader,
                    },
                    vec![Effect::CancelTimer],
                )
            }
        }

        (Phase::Armed { .. }, Event::TimerFired) if leader => (
            SchedulerState {
                phase: Phase::Refreshing { attempt: 1 },
                leader,
            },
            vec![Effect::BeginRefresh],
        ),
        (Phase::Backoff { attempt, .. }, Event::TimerFired) if leader => (
            SchedulerState {
                phase: Phase::Refreshing {
                    attempt: attempt + 1,
                },
                leader,
            },
            vec![Effect::BeginRefresh],
        ),

        (Phase::Refreshing { .. }, Event::RefreshSucceeded { fire_at }) => {
            if leader {
                (
                    SchedulerState {
                        phase: Phase::Armed { fire_at },
                        leader,
                    },
                    vec![Effect::ArmTimer { at: fire_at }],
                )
            } else {
                (
                    SchedulerState {
                        phase: Phase::Idle {
                            fire_at: Some(fire_at),
                        },
                        leader,
                    },
                    vec![],
                )
            }
        }

        (Phase::Refreshing { attempt }, Event::RefreshFailed { transient }) => {
            if !transient {
                // The refresh token itself is dead. The engine clears the
                // session, which will arrive as SessionUpdated(None).
                (
                    SchedulerState {
                        phase: Phase::Idle { fire_at: None },
                        leader,
                    },
                    vec![Effect::CancelTimer],
                )
            } else if attempt >= config.max_attempts {
                debug!(attempt, "refresh retries exhausted, leaving session in place");
                (
                    SchedulerState {
                        phase: Phase::Idle { fire_at: None },
                        leader,
                    },
                    vec![Effect::CancelTimer],
                )
            } else {
                let resume_at = now + compute_backoff(attempt, config);
                (
                    SchedulerState {
                        phase: Phase::Backoff { attempt, resume_at },
                        leader,
                    },
                    vec![Effect::ArmTimer { at: resume_at }],
                )
            }
        }

        (phase, Event::LeadershipGained) => {
            let leader = true;
            match phase {
                Phase::Idle {
                    fire_at: Some(at), ..
                } => (
                    SchedulerState {
                        phase: Phase::Armed { fire_at: at },
                        leader,
                    },
                    vec![Effect::ArmTimer { at }],
                ),
                other => (
                    SchedulerState {
                        phase: other,
                        leader,
                    },
                    vec![],
                ),
            }
        }

        (phase, Event::LeadershipLost) => {
            let leader = false;
            match phase {
                Phase::Armed { fire_at } => (
                    SchedulerState {
                        phase: Phase::Idle {
                            fire_at: Some(fire_at),
                        },
                        leader,
                    },
                    vec![Effect::CancelTimer],
                ),
                // The new leader owns retries now; its refreshed session
                // will arrive via broadcast.
                Phase::Backoff { .. } => (
                    SchedulerState {
                        phase: Phase::Idle { fire_at: None },
                        leader,
                    },
                    vec![Effect::CancelTimer],
                ),
                other => (
                    SchedulerState {
                        phase: other,
                        leader,
                    },
                    vec![],
                ),
            }
        }

        // Stale inputs: a timer that fired for a phase that moved on, a
        // refresh result after sign-out, a second Started.
        (phase, _) => (SchedulerState { phase, leader }, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RefreshConfig {
        RefreshConfig {
            jitter: 0.0,
            ..RefreshConfig::default()
        }
    }

    fn started() -> SchedulerState {
        SchedulerState {
            phase: Phase::Idle { fire_at: None },
            leader: true,
        }
    }

    #[test]
    fn fire_at_is_expiry_minus_margin() {
        let config = config();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(900);

        let fire_at = compute_fire_at(expires_at, now, &config);
        assert_eq!(fire_at, now + chrono::Duration::seconds(840));
    }

    #[test]
    fn fire_at_clamps_to_now_when_past() {
        let config = config();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(30);

        // 30s - 60s margin is in the past; fire immediately.
        assert_eq!(compute_fire_at(expires_at, now, &config), now);

        let already_expired = now - chrono::Duration::seconds(10);
        assert_eq!(compute_fire_at(already_expired, now, &config), now);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = config();
        assert_eq!(compute_backoff(0, &config), chrono::Duration::zero());
        assert_eq!(compute_backoff(1, &config), chrono::Duration::seconds(5));
        assert_eq!(compute_backoff(2, &config), chrono::Duration::seconds(10));
        assert_eq!(compute_backoff(3, &config), chrono::Duration::seconds(20));
        assert_eq!(compute_backoff(4, &config), chrono::Duration::seconds(40));
        assert_eq!(compute_backoff(7, &config), chrono::Duration::seconds(300));
        assert_eq!(compute_backoff(100, &config), chrono::Duration::seconds(300));
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let config = RefreshConfig::default(); // jitter 0.1
        for _ in 0..50 {
            let delay = compute_backoff(2, &config);
            assert!(delay >= chrono::Duration::seconds(9), "delay {delay}");
            assert!(delay <= chrono::Duration::seconds(11), "delay {delay}");
        }
    }

    #[test]
    fn session_update_arms_timer_when_leading() {
        let config = config();
        let now = Utc::now();
        let fire_at = now + chrono::Duration::seconds(840);

        let (state, effects) = step(
            started(),
            Event::SessionUpdated {
                fire_at: Some(fire_at),
            },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Armed { fire_at });
        assert_eq!(
            effects,
            vec![Effect::CancelTimer, Effect::ArmTimer { at: fire_at }]
        );
    }

    #[test]
    fn session_update_as_follower_remembers_without_arming() {
        let config = config();
        let now = Utc::now();
        let fire_at = now + chrono::Duration::seconds(840);

        let follower = SchedulerState {
            leader: false,
            ..started()
        };
        let (state, effects) = step(
            follower,
            Event::SessionUpdated {
                fire_at: Some(fire_at),
            },
            now,
            &config,
        );
        assert_eq!(
            state.phase,
            Phase::Idle {
                fire_at: Some(fire_at)
            }
        );
        assert!(!effects.contains(&Effect::ArmTimer { at: fire_at }));
    }

    #[test]
    fn timer_fire_begins_refresh() {
        let config = config();
        let now = Utc::now();
        let armed = SchedulerState {
            phase: Phase::Armed { fire_at: now },
            leader: true,
        };

        let (state, effects) = step(armed, Event::TimerFired, now, &config);
        assert_eq!(state.phase, Phase::Refreshing { attempt: 1 });
        assert_eq!(effects, vec![Effect::BeginRefresh]);
    }

    #[test]
    fn success_rearms_for_rotated_session() {
        let config = config();
        let now = Utc::now();
        let refreshing = SchedulerState {
            phase: Phase::Refreshing { attempt: 1 },
            leader: true,
        };
        let next = now + chrono::Duration::seconds(840);

        let (state, effects) = step(
            refreshing,
            Event::RefreshSucceeded { fire_at: next },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Armed { fire_at: next });
        assert_eq!(effects, vec![Effect::ArmTimer { at: next }]);
    }

    #[test]
    fn transient_failure_backs_off_then_retries() {
        let config = config();
        let now = Utc::now();
        let refreshing = SchedulerState {
            phase: Phase::Refreshing { attempt: 1 },
            leader: true,
        };

        let (state, effects) = step(
            refreshing,
            Event::RefreshFailed { transient: true },
            now,
            &config,
        );
        let resume_at = now + chrono::Duration::seconds(5);
        assert_eq!(
            state.phase,
            Phase::Backoff {
                attempt: 1,
                resume_at
            }
        );
        assert_eq!(effects, vec![Effect::ArmTimer { at: resume_at }]);

        let (state, effects) = step(state, Event::TimerFired, resume_at, &config);
        assert_eq!(state.phase, Phase::Refreshing { attempt: 2 });
        assert_eq!(effects, vec![Effect::BeginRefresh]);
    }

    #[test]
    fn exhausted_retries_go_idle_without_clearing() {
        let config = config();
        let now = Utc::now();
        let refreshing = SchedulerState {
            phase: Phase::Refreshing {
                attempt: config.max_attempts,
            },
            leader: true,
        };

        let (state, effects) = step(
            refreshing,
            Event::RefreshFailed { transient: true },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Idle { fire_at: None });
        assert_eq!(effects, vec![Effect::CancelTimer]);
    }

    #[test]
    fn terminal_failure_stops_the_schedule() {
        let config = config();
        let now = Utc::now();
        let refreshing = SchedulerState {
            phase: Phase::Refreshing { attempt: 1 },
            leader: true,
        };

        let (state, effects) = step(
            refreshing,
            Event::RefreshFailed { transient: false },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Idle { fire_at: None });
        assert_eq!(effects, vec![Effect::CancelTimer]);
    }

    #[test]
    fn sign_out_cancels_everything() {
        let config = config();
        let now = Utc::now();
        let armed = SchedulerState {
            phase: Phase::Armed {
                fire_at: now + chrono::Duration::seconds(840),
            },
            leader: true,
        };

        let (state, effects) = step(armed, Event::SessionUpdated { fire_at: None }, now, &config);
        assert_eq!(state.phase, Phase::Idle { fire_at: None });
        assert_eq!(effects, vec![Effect::CancelTimer]);
    }

    #[test]
    fn leadership_handoff_moves_the_timer() {
        let config = config();
        let now = Utc::now();
        let fire_at = now + chrono::Duration::seconds(840);
        let armed = SchedulerState {
            phase: Phase::Armed { fire_at },
            leader: true,
        };

        // Losing leadership drops the timer but keeps the instant.
        let (state, effects) = step(armed, Event::LeadershipLost, now, &config);
        assert_eq!(
            state.phase,
            Phase::Idle {
                fire_at: Some(fire_at)
            }
        );
        assert_eq!(effects, vec![Effect::CancelTimer]);

        // Gaining it back re-arms for the same instant.
        let (state, effects) = step(state, Event::LeadershipGained, now, &config);
        assert_eq!(state.phase, Phase::Armed { fire_at });
        assert_eq!(effects, vec![Effect::ArmTimer { at: fire_at }]);
    }

    #[test]
    fn stale_events_are_ignored() {
        let config = config();
        let now = Utc::now();

        // Timer fired after sign-out already reset the schedule.
        let (state, effects) = step(started(), Event::TimerFired, now, &config);
        assert_eq!(state.phase, Phase::Idle { fire_at: None });
        assert!(effects.is_empty());

        // Refresh result arriving after sign-out.
        let (state, effects) = step(
            started(),
            Event::RefreshSucceeded {
                fire_at: now + chrono::Duration::seconds(840),
            },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Idle { fire_at: None });
        assert!(effects.is_empty());

        // Stopped ignores session updates entirely.
        let stopped = SchedulerState::new();
        let (state, effects) = step(
            stopped,
            Event::SessionUpdated {
                fire_at: Some(now),
            },
            now,
            &config,
        );
        assert_eq!(state.phase, Phase::Stopped);
        assert!(effects.is_empty());
    }

    #[test]
    fn shutdown_from_any_phase() {
        let config = config();
        let now = Utc::now();
        let refreshing = SchedulerState {
            phase: Phase::Refreshing { attempt: 3 },
            leader: true,
        };

        let (state, effects) = step(refreshing, Event::Shutdown, now, &config);
        assert_eq!(state.phase, Phase::Stopped);
        assert_eq!(effects, vec![Effect::CancelTimer]);
    }
}
