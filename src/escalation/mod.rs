//! Escalation handlers — turn bus events into emergency stops.
//!
//! | Handler              | Topic        | Action                                   |
//! |----------------------|--------------|------------------------------------------|
//! | [`ErrorEscalation`]  | `errorcount` | stop the line after N errors per order   |
//! | [`KpiEscalation`]    | `kpialerts`  | lower the desired rate, then stop        |
//!
//! Both resolve a work order to the device currently reporting it through
//! the twin store, and both stop it through the command channel.  Every
//! event is processed on its own; a failure is logged and the batch moves
//! on.

pub mod errors;
pub mod kpi;
pub mod tally;

pub use errors::{ErrorEscalation, ErrorOutcome};
pub use kpi::{KpiEscalation, KpiOutcome, RateChange};
pub use tally::{Bump, Claim, WorkOrderTally};

use core::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::app::commands::{DirectMethod, STATUS_OK};
use crate::app::ports::{CommandChannel, TwinStore};
use crate::app::twin;
use crate::error::{CommandError, TwinError};

/// First device whose reported `workorderId` equals `workorder`.
///
/// More than one match means two lines claim the same order; the first
/// is used and the rest are logged.
pub async fn resolve_device(
    twin: &impl TwinStore,
    workorder: &str,
) -> Result<Option<String>, TwinError> {
    let mut ids = twin
        .query_reported(twin::WORKORDER_ID, &Value::String(workorder.to_string()))
        .await?;
    if ids.len() > 1 {
        warn!(
            "work order {} reported by {} devices {:?}; using {}",
            workorder,
            ids.len(),
            ids,
            ids[0]
        );
    }
    Ok(if ids.is_empty() { None } else { Some(ids.swap_remove(0)) })
}

/// Invoke `EmergencyStop` on `device_id` and return the device's status.
pub async fn emergency_stop(
    commands: &impl CommandChannel,
    device_id: &str,
    timeout: Duration,
) -> Result<u16, CommandError> {
    let status = commands
        .invoke(device_id, DirectMethod::EmergencyStop.name(), timeout)
        .await?;
    if status == STATUS_OK {
        info!("{}: emergency stop acknowledged", device_id);
    } else {
        warn!("{}: emergency stop answered {}", device_id, status);
    }
    Ok(status)
}
