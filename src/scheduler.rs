//! Poll scheduling and timeouts.
//!
//! Each agent drives its cycle from a [`PollSchedule`]: after a cycle
//! finishes the schedule is armed at `now + interval`, and the agent
//! awaits that monotonic fire time on the `async-io-mini` reactor.  A slow
//! cycle pushes the next one back; the interval never adapts.
//!
//! ```text
//!  cycle ──▶ arm(now) ──▶ wait() ──▶ cycle ──▶ arm(now) ──▶ ...
//!            next_fire = now + interval
//! ```

use core::fmt;
use core::future::Future;
use std::time::{Duration, Instant};

use async_io_mini::Timer;
use futures_lite::future;

/// Repeating schedule with a monotonic next-fire time.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    interval: Duration,
    next_fire: Option<Instant>,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_fire: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pending fire time, if armed.
    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    /// Arm the schedule one interval after `now`.  Returns the fire time.
    pub fn arm(&mut self, now: Instant) -> Instant {
        let at = now + self.interval;
        self.next_fire = Some(at);
        at
    }

    /// Wait until the armed fire time.  An unarmed schedule fires at once.
    pub async fn wait(&mut self) {
        if let Some(at) = self.next_fire.take() {
            Timer::at(at).await;
        }
    }
}

/// The wrapped future did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timed out after {:?}", self.0)
    }
}

/// Race `fut` against a reactor timer.
pub async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
    future::or(async { Ok(fut.await) }, async {
        Timer::after(timeout).await;
        Err(Elapsed(timeout))
    })
    .await
}
