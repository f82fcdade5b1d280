//! Proactive access-token refresh scheduling.
//!
//! Access tokens expire; this crate makes sure a fresh one is fetched
//! before that happens. The schedule is a small state machine
//! ([`fsm::step`]) that is pure — state plus event plus clock in, state
//! plus effects out — driven by a background tokio task
//! ([`RefreshScheduler`]) that owns the actual timer and calls the
//! [`RefreshHandler`] when it fires.
//!
//! Scheduling rules:
//!
//! - A session expiring at `T` triggers a refresh at `T - margin`
//!   (default 60s). If that instant is already past, the refresh fires
//!   immediately.
//! - Transient failures retry with exponential backoff
//!   (5s → 10s → 20s → ... → 300s cap, ±10% jitter) up to a bounded
//!   number of attempts, then give up and leave the session in place.
//! - Terminal failures (the backend rejected the refresh token) stop the
//!   schedule; the owning engine clears the session.
//! - Only the elected leader instance arms timers. Followers track the
//!   desired fire time and arm it the moment they gain leadership.

mod driver;
mod fsm;

pub use driver::{RefreshHandler, RefreshOutcome, RefreshScheduler};
pub use fsm::{compute_fire_at, Effect, Event, Phase, SchedulerState};

use tokio::time::Duration;

/// Tuning knobs for refresh timing and retry behavior.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How long before token expiry the refresh fires.
    pub margin: Duration,
    /// First retry delay after a transient failure.
    pub backoff_base: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
    /// Retries after this many consecutive transient failures stop; the
    /// session stays in place and expires naturally.
    pub max_attempts: u32,
    /// Jitter applied to each backoff delay, as a fraction (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            max_attempts: 5,
            jitter: 0.1,
        }
    }
}
