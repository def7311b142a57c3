//! In-process event bus with consumer groups.
//!
//! Each subscriber gets its own queue per topic, so two handlers on the
//! same topic both see every event.  Delivery is in publish order per
//! topic; batching and idle polling follow [`BusConfig`].
//!
//! ```text
//!   publish(telemetry) ──┬──▶ [kpi-monitor]   ──▶ KpiMonitor::on_batch
//!                        └──▶ [telemetry-log] ──▶ TelemetryLogger::on_batch
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_io_mini::Timer;
use log::{debug, info, trace};

use crate::app::ports::{BatchHandler, EventPublisher};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::events::Topic;

type Queues = HashMap<(Topic, &'static str), VecDeque<String>>;

/// Fan-out bus kept in memory.
#[derive(Debug, Default)]
pub struct MemoryBus {
    queues: Mutex<Queues>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a consumer group on `topic`.  Only events published after
    /// this call are delivered to it.
    pub fn subscribe(&self, topic: Topic, group: &'static str) {
        self.lock().entry((topic, group)).or_default();
        debug!("bus: '{}' subscribed to {}", group, topic.name());
    }

    /// Open the consumer group `handler` reads from.
    pub fn subscribe_handler(&self, handler: &impl BatchHandler) {
        self.subscribe(handler.topic(), handler.name());
    }

    /// Remove up to `max` events from the group's queue.
    pub fn take_batch(&self, topic: Topic, group: &'static str, max: usize) -> Vec<String> {
        let mut queues = self.lock();
        match queues.get_mut(&(topic, group)) {
            Some(q) => {
                let n = q.len().min(max);
                q.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    /// Events waiting for the group.
    pub fn pending(&self, topic: Topic, group: &'static str) -> usize {
        self.lock().get(&(topic, group)).map_or(0, VecDeque::len)
    }

    /// Total events accepted by [`publish`](EventPublisher::publish).
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events published while no group was subscribed to their topic.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver everything currently queued for `handler`, batch by batch.
    /// Returns the number of events delivered.
    pub async fn drain(&self, handler: &impl BatchHandler, max_batch: usize) -> usize {
        let mut delivered = 0;
        loop {
            let batch = self.take_batch(handler.topic(), handler.name(), max_batch.max(1));
            if batch.is_empty() {
                return delivered;
            }
            delivered += batch.len();
            handler.on_batch(&batch).await;
        }
    }

    /// Feed `handler` forever, sleeping `idle_poll` whenever its queue is
    /// empty.
    pub async fn pump(&self, handler: &impl BatchHandler, cfg: &BusConfig) {
        self.subscribe_handler(handler);
        info!(
            "bus: pumping {} into '{}' (batch {})",
            handler.topic().name(),
            handler.name(),
            cfg.max_batch
        );
        loop {
            if self.drain(handler, cfg.max_batch).await == 0 {
                Timer::after(cfg.idle_poll()).await;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventPublisher for MemoryBus {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BusError> {
        let mut queues = self.lock();
        let mut groups = queues.iter_mut().filter(|((t, _), _)| *t == topic).peekable();
        if groups.peek().is_none() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("bus: no subscriber on {}", topic.name());
        }
        for (_, q) in groups {
            q.push_back(payload.clone());
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
