//! Error-count escalation.
//!
//! Each event on `errorcount` with a non-zero `DeviceErrors` mask counts
//! once against its work order.  A zero mask means the device is clear and
//! is not counted.  The event that brings the count to the threshold
//! resolves the device reporting that order and stops it.
//!
//! The count resets only once a device was found and the stop was
//! attempted, whatever the stop's result.  If no device reports the order
//! the count stays where it is and the next event for the order retries
//! the lookup.

use core::fmt;
use core::time::Duration;

use log::{debug, error, info, warn};

use crate::app::ports::{BatchHandler, CommandChannel, TwinStore};
use crate::config::EscalationConfig;
use crate::error::{CommandError, Result};
use crate::events::{self, ErrorEvent, Topic};

use super::tally::{Bump, WorkOrderTally};
use super::{emergency_stop, resolve_device};

/// What one error event led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorOutcome {
    /// The device reports no errors; nothing counted.
    Cleared { workorder: String },
    /// Counted, threshold not reached.
    Counted { workorder: String, count: u32 },
    /// Counted while another escalation for the order was running.
    InFlight { workorder: String, count: u32 },
    /// Threshold reached but no device reports the order.
    Unresolved { workorder: String, count: u32 },
    /// Stop issued; the count is back at zero.
    Stopped {
        workorder: String,
        device_id: String,
        status: core::result::Result<u16, CommandError>,
    },
}

impl fmt::Display for ErrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleared { workorder } => write!(f, "{workorder}: errors cleared"),
            Self::Counted { workorder, count } => write!(f, "{workorder}: {count} errors"),
            Self::InFlight { workorder, count } => {
                write!(f, "{workorder}: {count} errors (stop in flight)")
            }
            Self::Unresolved { workorder, count } => {
                write!(f, "{workorder}: {count} errors, no device reports it")
            }
            Self::Stopped {
                workorder,
                device_id,
                status,
            } => match status {
                Ok(code) => write!(f, "{workorder}: stop sent to {device_id} ({code})"),
                Err(e) => write!(f, "{workorder}: stop to {device_id} failed: {e}"),
            },
        }
    }
}

/// Consumes `errorcount` and stops lines with repeated errors.
pub struct ErrorEscalation<T, C> {
    twin: T,
    commands: C,
    tally: WorkOrderTally,
    timeout: Duration,
    idle_ttl: Duration,
}

impl<T: TwinStore, C: CommandChannel> ErrorEscalation<T, C> {
    pub fn new(twin: T, commands: C, cfg: &EscalationConfig) -> Self {
        Self {
            twin,
            commands,
            tally: WorkOrderTally::new(cfg.error_threshold),
            timeout: cfg.command_timeout(),
            idle_ttl: cfg.tally_idle_ttl(),
        }
    }

    pub fn tally(&self) -> &WorkOrderTally {
        &self.tally
    }

    /// Process one raw event.  `Err` covers malformed events and twin
    /// query failures; in the latter case the count is kept.
    pub async fn handle_event(&self, payload: &str) -> Result<ErrorOutcome> {
        let event: ErrorEvent = events::decode(payload)?;
        let workorder = event.workorder_id;
        if event.device_errors == 0 {
            return Ok(ErrorOutcome::Cleared { workorder });
        }

        let claim = match self.tally.record(&workorder) {
            Bump::Counted(count) => return Ok(ErrorOutcome::Counted { workorder, count }),
            Bump::InFlight(count) => return Ok(ErrorOutcome::InFlight { workorder, count }),
            Bump::Escalate(claim) => claim,
        };
        info!(
            "{}: {} errors, threshold {} reached",
            workorder,
            claim.count(),
            self.tally.threshold()
        );

        // A twin failure drops the claim, which keeps the count.
        let Some(device_id) = resolve_device(&self.twin, &workorder).await? else {
            let count = claim.count();
            claim.release();
            return Ok(ErrorOutcome::Unresolved { workorder, count });
        };

        let status = emergency_stop(&self.commands, &device_id, self.timeout).await;
        claim.reset();
        Ok(ErrorOutcome::Stopped {
            workorder,
            device_id,
            status,
        })
    }
}

impl<T: TwinStore, C: CommandChannel> BatchHandler for ErrorEscalation<T, C> {
    fn name(&self) -> &'static str {
        "error-escalation"
    }

    fn topic(&self) -> Topic {
        Topic::DeviceErrors
    }

    async fn on_batch(&self, events: &[String]) {
        for payload in events {
            match self.handle_event(payload).await {
                Ok(outcome @ ErrorOutcome::Cleared { .. })
                | Ok(outcome @ ErrorOutcome::Counted { .. })
                | Ok(outcome @ ErrorOutcome::InFlight { .. }) => debug!("{}", outcome),
                Ok(outcome @ ErrorOutcome::Unresolved { .. }) => warn!("{}", outcome),
                Ok(outcome @ ErrorOutcome::Stopped { status: Err(_), .. }) => error!("{}", outcome),
                Ok(outcome) => info!("{}", outcome),
                Err(e) => warn!("error event skipped: {}", e),
            }
        }
        self.tally.evict_idle(self.idle_ttl);
    }
}
