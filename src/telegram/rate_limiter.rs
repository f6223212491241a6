//! Per-account send pacing.
//!
//! Spaces out sends on one account so a batch of due contacts does not
//! trip Telegram's flood protection, and honours flood-wait replies by
//! pushing the next allowed send into the future.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Enforces a minimum gap between sends on one connection.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum gap between two sends.
    min_interval: Duration,

    /// Earliest instant the next send may start.
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum gap.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(None),
        }
    }

    /// Creates a limiter from a gap in milliseconds; 0 disables pacing.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// The configured minimum gap.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether a flood wait currently blocks sends for longer than the
    /// normal pacing gap.
    pub async fn is_penalized(&self) -> bool {
        self.time_until_allowed().await > self.min_interval
    }

    /// Waits for the next send slot and claims it.
    ///
    /// The lock is held while waiting, so concurrent callers are served one
    /// at a time. Returns how long the caller slept.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut next = self.next_allowed.lock().await;

        let wait_duration = next.map_or(Duration::ZERO, |at| {
            at.saturating_duration_since(Instant::now())
        });

        if !wait_duration.is_zero() {
            debug!(
                waited_ms = wait_duration.as_millis(),
                "Pacing send"
            );
            tokio::time::sleep(wait_duration).await;
        }

        *next = Some(Instant::now() + self.min_interval);
        wait_duration
    }

    /// Whether a send could start right now.
    pub async fn is_allowed(&self) -> bool {
        self.time_until_allowed().await.is_zero()
    }

    /// Time left until the next send slot.
    pub async fn time_until_allowed(&self) -> Duration {
        let next = self.next_allowed.lock().await;
        next.map_or(Duration::ZERO, |at| {
            at.saturating_duration_since(Instant::now())
        })
    }

    /// Blocks sends for `wait_seconds` after a flood-wait reply.
    ///
    /// Does not sleep; the next [`wait_and_acquire`](Self::wait_and_acquire) does.
    pub async fn penalize(&self, wait_seconds: u32) {
        warn!(wait_seconds, "Flood wait received, pausing sends");
        let until = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        let mut next = self.next_allowed.lock().await;
        if next.is_none_or(|at| at < until) {
            *next = Some(until);
        }
    }
}
