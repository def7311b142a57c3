//! KPI-breach escalation.
//!
//! For each event on `kpialerts`: resolve the device reporting the work
//! order, lower its desired production rate by a fixed step (floor 0),
//! then stop it.  The two actions are independent; a failed rate update
//! is logged and the stop still goes out.
//!
//! The rate update carries the etag of the desired read, so a concurrent
//! operator edit is rejected instead of silently overwritten.

use core::fmt;
use core::time::Duration;

use log::{error, info, warn};

use crate::app::ports::{BatchHandler, CommandChannel, TwinStore};
use crate::app::twin;
use crate::config::EscalationConfig;
use crate::error::{CommandError, EventError, Result, TwinError};
use crate::events::{self, KpiAlertEvent, Topic};

use super::{emergency_stop, resolve_device};

/// A desired-rate change written to the twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChange {
    pub from: i64,
    pub to: i64,
}

/// What one KPI alert led to.
#[derive(Debug, Clone, PartialEq)]
pub enum KpiOutcome {
    /// No device reports the work order; nothing was done.
    Unresolved { workorder: String },
    /// Rate update and stop attempted, each with its own result.
    Handled {
        workorder: String,
        device_id: String,
        rate: core::result::Result<RateChange, TwinError>,
        stop: core::result::Result<u16, CommandError>,
    },
}

impl fmt::Display for KpiOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved { workorder } => write!(f, "{workorder}: no device reports it"),
            Self::Handled {
                workorder,
                device_id,
                rate,
                stop,
            } => {
                write!(f, "{workorder} on {device_id}: ")?;
                match rate {
                    Ok(c) => write!(f, "rate {}→{}", c.from, c.to)?,
                    Err(e) => write!(f, "rate unchanged ({e})")?,
                }
                match stop {
                    Ok(code) => write!(f, ", stop {code}"),
                    Err(e) => write!(f, ", stop failed ({e})"),
                }
            }
        }
    }
}

/// Consumes `kpialerts`: throttle, then stop.
pub struct KpiEscalation<T, C> {
    twin: T,
    commands: C,
    timeout: Duration,
    decrement: i64,
    default_rate: i64,
}

impl<T: TwinStore, C: CommandChannel> KpiEscalation<T, C> {
    /// `default_rate` is assumed when the twin has no desired rate.
    pub fn new(twin: T, commands: C, cfg: &EscalationConfig, default_rate: i64) -> Self {
        Self {
            twin,
            commands,
            timeout: cfg.command_timeout(),
            decrement: cfg.rate_decrement,
            default_rate,
        }
    }

    /// Process one raw event.  `Err` covers malformed events and a failed
    /// device lookup; nothing was written in either case.
    pub async fn handle_event(&self, payload: &str) -> Result<KpiOutcome> {
        let workorder = match events::decode::<KpiAlertEvent>(payload) {
            Ok(alert) => {
                info!("{}: KPI {:.1}%", alert.workorder_id, alert.kpi);
                alert.workorder_id
            }
            // An alert without a usable `Kpi` still names the order.
            Err(EventError::Malformed(_)) => events::workorder_of(payload)?,
            Err(e) => return Err(e.into()),
        };

        let Some(device_id) = resolve_device(&self.twin, &workorder).await? else {
            return Ok(KpiOutcome::Unresolved { workorder });
        };

        let rate = self.lower_rate(&device_id).await;
        let stop = emergency_stop(&self.commands, &device_id, self.timeout).await;
        Ok(KpiOutcome::Handled {
            workorder,
            device_id,
            rate,
            stop,
        })
    }

    /// Desired rate minus one step, never below zero.
    pub fn lowered(&self, current: i64) -> i64 {
        current.saturating_sub(self.decrement).max(0)
    }

    async fn lower_rate(&self, device_id: &str) -> core::result::Result<RateChange, TwinError> {
        let snapshot = self.twin.desired(device_id).await?;
        let from = twin::desired_production_rate(&snapshot.properties).unwrap_or(self.default_rate);
        let to = self.lowered(from);
        self.twin
            .update_desired(
                device_id,
                twin::patch(twin::PRODUCTION_RATE, to),
                Some(snapshot.etag),
            )
            .await?;
        Ok(RateChange { from, to })
    }
}

impl<T: TwinStore, C: CommandChannel> BatchHandler for KpiEscalation<T, C> {
    fn name(&self) -> &'static str {
        "kpi-escalation"
    }

    fn topic(&self) -> Topic {
        Topic::KpiAlerts
    }

    async fn on_batch(&self, events: &[String]) {
        for payload in events {
            match self.handle_event(payload).await {
                Ok(outcome @ KpiOutcome::Unresolved { .. }) => warn!("{}", outcome),
                Ok(
                    outcome @ KpiOutcome::Handled {
                        rate: Ok(_),
                        stop: Ok(_),
                        ..
                    },
                ) => info!("{}", outcome),
                Ok(outcome) => error!("{}", outcome),
                Err(e) => warn!("KPI alert skipped: {}", e),
            }
        }
    }
}
