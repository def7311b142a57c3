//! Production KPI monitor.
//!
//! Derives the quality KPI of each work order from telemetry and raises a
//! `kpialerts` event when it drops below the configured limit:
//!
//! ```text
//!   KPI = GoodCount / (GoodCount + BadCount) × 100
//! ```
//!
//! Only the latest sample of each work order in a batch is evaluated.  An
//! order alerts once per crossing; it re-arms after its KPI recovers to
//! the limit or above.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::app::ports::{BatchHandler, EventPublisher};
use crate::events::{self, KpiAlertEvent, TelemetryEvent, Topic};

/// Quality KPI in percent, or `None` before anything was produced.
pub fn production_kpi(good: i64, bad: i64) -> Option<f64> {
    let total = good.checked_add(bad)?;
    if good < 0 || bad < 0 || total == 0 {
        return None;
    }
    Some(good as f64 / total as f64 * 100.0)
}

/// Consumes telemetry, publishes KPI alerts.
pub struct KpiMonitor<B> {
    bus: B,
    threshold: f64,
    /// Work orders currently below the limit (already alerted).
    breached: Mutex<HashSet<String>>,
}

impl<B: EventPublisher> KpiMonitor<B> {
    pub fn new(bus: B, threshold_percent: f64) -> Self {
        Self {
            bus,
            threshold: threshold_percent,
            breached: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_breached(&self, workorder: &str) -> bool {
        self.breached().contains(workorder)
    }

    /// Evaluate one sample.  Returns the alert to publish, if any.
    pub fn evaluate(&self, sample: &TelemetryEvent) -> Option<KpiAlertEvent> {
        let kpi = production_kpi(sample.good_count, sample.bad_count)?;
        let mut breached = self.breached();
        if kpi < self.threshold {
            if breached.insert(sample.workorder_id.clone()) {
                return Some(KpiAlertEvent {
                    workorder_id: sample.workorder_id.clone(),
                    kpi,
                });
            }
        } else if breached.remove(&sample.workorder_id) {
            info!("{}: KPI recovered to {:.1}%", sample.workorder_id, kpi);
        }
        None
    }

    fn breached(&self) -> MutexGuard<'_, HashSet<String>> {
        self.breached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: EventPublisher> BatchHandler for KpiMonitor<B> {
    fn name(&self) -> &'static str {
        "kpi-monitor"
    }

    fn topic(&self) -> Topic {
        Topic::Telemetry
    }

    async fn on_batch(&self, batch: &[String]) {
        let mut latest: BTreeMap<String, TelemetryEvent> = BTreeMap::new();
        for payload in batch {
            match serde_json::from_str::<TelemetryEvent>(payload) {
                Ok(sample) if sample.workorder_id.is_empty() => {
                    debug!("telemetry without work order ignored");
                }
                Ok(sample) => {
                    latest.insert(sample.workorder_id.clone(), sample);
                }
                Err(e) => warn!("telemetry skipped: {}", e),
            }
        }

        for sample in latest.values() {
            let Some(alert) = self.evaluate(sample) else {
                continue;
            };
            warn!(
                "{}: KPI {:.1}% below {:.1}%",
                alert.workorder_id, alert.kpi, self.threshold
            );
            let sent = match events::encode(&alert) {
                Ok(payload) => self.bus.publish(Topic::KpiAlerts, payload).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!("{}: KPI alert not published: {}", alert.workorder_id, e);
                // Re-arm so the next sample retries.
                self.breached().remove(&alert.workorder_id);
            }
        }
    }
}
