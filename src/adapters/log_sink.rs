//! Log-based telemetry sink.
//!
//! Implements [`BatchHandler`] on the telemetry topic by writing every
//! sample to the process logger.  A warehouse or dashboard adapter would
//! subscribe the same way.

use log::{info, warn};

use crate::app::ports::BatchHandler;
use crate::events::{TelemetryEvent, Topic};

/// Adapter that logs every telemetry sample.
pub struct TelemetryLogger;

impl TelemetryLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TelemetryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchHandler for TelemetryLogger {
    fn name(&self) -> &'static str {
        "telemetry-log"
    }

    fn topic(&self) -> Topic {
        Topic::Telemetry
    }

    async fn on_batch(&self, events: &[String]) {
        for payload in events {
            match serde_json::from_str::<TelemetryEvent>(payload) {
                Ok(t) => info!("{}", t),
                Err(e) => warn!("TELEM | unparsable sample ({}): {}", e, payload),
            }
        }
    }
}
