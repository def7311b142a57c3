//! Concurrency-safe work-order error tally.
//!
//! Counts consecutive error events per work order.  The map is split into
//! shards, each behind its own mutex, so updates for different work orders
//! rarely contend and every update to one key is a single critical section:
//! increment, compare against the threshold, and claim the escalation all
//! happen under the same lock.
//!
//! ## Claim lifecycle
//!
//! 1. [`WorkOrderTally::record`] increments the count.  When it reaches the
//!    threshold and no escalation is in flight for the key, the key is
//!    marked in flight and a [`Claim`] is returned.
//! 2. While the claim is held, further events for the key only count; they
//!    can never produce a second claim.
//! 3. [`Claim::reset`] zeroes the count (stop issued).  [`Claim::release`]
//!    (or dropping the claim) keeps the count so the next event retries.
//!
//! ```text
//!   OK ──(count ≥ threshold)──▶ IN FLIGHT ──reset──▶ OK (count = 0)
//!                                   │
//!                                   └──release──▶ ELEVATED ──next event──▶ IN FLIGHT
//! ```

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;

/// Number of independently locked shards.
const SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct Entry {
    count: u32,
    in_flight: bool,
    last_seen: Instant,
}

/// Result of recording one error event.
#[derive(Debug)]
pub enum Bump<'a> {
    /// Below threshold; carries the new count.
    Counted(u32),
    /// Threshold reached; the caller owns the escalation.
    Escalate(Claim<'a>),
    /// Another escalation for this key is already in flight.
    InFlight(u32),
}

/// Ownership of one escalation for one work order.
#[derive(Debug)]
#[must_use = "dropping a claim releases it with the count kept"]
pub struct Claim<'a> {
    tally: &'a WorkOrderTally,
    workorder: String,
    count: u32,
    settled: bool,
}

impl Claim<'_> {
    pub fn workorder(&self) -> &str {
        &self.workorder
    }

    /// Count at the moment the threshold was reached.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Escalation done: zero the count.
    pub fn reset(mut self) {
        self.tally.finish(&self.workorder, true);
        self.settled = true;
    }

    /// Escalation abandoned: keep the count elevated.
    pub fn release(mut self) {
        self.tally.finish(&self.workorder, false);
        self.settled = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.tally.finish(&self.workorder, false);
        }
    }
}

/// Sharded per-work-order error counter.
#[derive(Debug)]
pub struct WorkOrderTally {
    threshold: u32,
    hasher: RandomState,
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

impl WorkOrderTally {
    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            hasher: RandomState::new(),
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one error event for `workorder`.
    pub fn record(&self, workorder: &str) -> Bump<'_> {
        self.record_at(workorder, Instant::now())
    }

    /// [`record`](Self::record) with an explicit clock.
    pub fn record_at(&self, workorder: &str, now: Instant) -> Bump<'_> {
        let mut shard = self.shard(workorder);
        let entry = shard.entry(workorder.to_string()).or_insert(Entry {
            count: 0,
            in_flight: false,
            last_seen: now,
        });
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;

        if entry.in_flight {
            return Bump::InFlight(entry.count);
        }
        if entry.count < self.threshold {
            return Bump::Counted(entry.count);
        }
        entry.in_flight = true;
        Bump::Escalate(Claim {
            tally: self,
            workorder: workorder.to_string(),
            count: entry.count,
            settled: false,
        })
    }

    /// Current count for `workorder` (0 if never seen).
    pub fn count(&self, workorder: &str) -> u32 {
        self.shard(workorder).get(workorder).map_or(0, |e| e.count)
    }

    /// Number of tracked work orders.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries idle for longer than `max_idle`.  Returns how many.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    /// [`evict_idle`](Self::evict_idle) with an explicit clock.  Entries
    /// with an escalation in flight are kept.
    pub fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut map = lock(shard);
            let before = map.len();
            map.retain(|_, e| e.in_flight || now.saturating_duration_since(e.last_seen) <= max_idle);
            evicted += before - map.len();
        }
        if evicted > 0 {
            debug!("tally: evicted {} idle work orders", evicted);
        }
        evicted
    }

    // ── Internal ──────────────────────────────────────────────

    fn shard(&self, workorder: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let idx = (self.hasher.hash_one(workorder) as usize) % self.shards.len();
        lock(&self.shards[idx])
    }

    fn finish(&self, workorder: &str, reset: bool) {
        if let Some(e) = self.shard(workorder).get_mut(workorder) {
            e.in_flight = false;
            if reset {
                e.count = 0;
            }
        }
    }
}

/// A panic while holding a shard cannot leave an entry half-written, so a
/// poisoned lock is still usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
