//! Event bus payloads.
//!
//! Every payload is a JSON object carrying at least `Workorderid`.
//! Agents produce telemetry and device-error events; the KPI monitor
//! produces KPI alerts; the escalation handlers consume errors and alerts.
//!
//! ```text
//! ┌─────────────┐  telemetry   ┌─────────────┐  kpialerts  ┌──────────────┐
//! │ DeviceAgent │─────────────▶│ KpiMonitor  │────────────▶│ KpiEscalation│
//! │             │  errorcount  └─────────────┘             └──────────────┘
//! │             │──────────────────────────────────────────▶ ErrorEscalation
//! └─────────────┘
//! ```

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BusError, EventError};

/// Event bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Periodic telemetry, one event per agent cycle.
    Telemetry,
    /// Device error-count changes.
    DeviceErrors,
    /// KPI breach alerts.
    KpiAlerts,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Telemetry, Topic::DeviceErrors, Topic::KpiAlerts];

    /// Wire name of the topic.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::DeviceErrors => "errorcount",
            Self::KpiAlerts => "kpialerts",
        }
    }
}

/// One poll cycle's worth of field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "Workorderid")]
    pub workorder_id: String,
    #[serde(rename = "ProductionStatus")]
    pub production_status: i64,
    #[serde(rename = "GoodCount")]
    pub good_count: i64,
    #[serde(rename = "BadCount")]
    pub bad_count: i64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TELEM | wo={} | status={} | good={} bad={} | T={:.1}\u{00b0}C",
            self.workorder_id, self.production_status, self.good_count, self.bad_count, self.temperature
        )
    }
}

/// Published when a line's device-error count changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(rename = "Workorderid")]
    pub workorder_id: String,
    #[serde(rename = "DeviceErrors")]
    pub device_errors: i64,
    /// Decoded fault names, for readers of the raw stream.
    #[serde(rename = "Faults", default)]
    pub faults: Vec<String>,
}

/// Published when a work order's KPI drops below the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiAlertEvent {
    #[serde(rename = "Workorderid")]
    pub workorder_id: String,
    #[serde(rename = "Kpi")]
    pub kpi: f64,
}

/// Serialise an event for publication.
pub fn encode<T: Serialize>(event: &T) -> Result<String, BusError> {
    serde_json::to_string(event).map_err(|e| BusError::Encode(e.to_string()))
}

/// Extract the non-empty `Workorderid` from a raw payload.
pub fn workorder_of(payload: &str) -> Result<String, EventError> {
    let obj = parse_object(payload)?;
    Ok(workorder_in(&obj)?.to_string())
}

/// Decode a typed event in one pass.  A missing or empty `Workorderid` is
/// reported as such; any other shape mismatch is `Malformed`.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, EventError> {
    let obj = parse_object(payload)?;
    workorder_in(&obj)?;
    serde_json::from_value(Value::Object(obj)).map_err(|e| EventError::Malformed(e.to_string()))
}

fn parse_object(payload: &str) -> Result<Map<String, Value>, EventError> {
    match serde_json::from_str(payload) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(EventError::Malformed("not a JSON object".into())),
        Err(e) => Err(EventError::Malformed(e.to_string())),
    }
}

fn workorder_in(obj: &Map<String, Value>) -> Result<&str, EventError> {
    match obj.get("Workorderid") {
        None | Some(Value::Null) => Err(EventError::MissingWorkorder),
        Some(Value::String(s)) if s.is_empty() => Err(EventError::MissingWorkorder),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(EventError::Malformed(format!("Workorderid is {other}"))),
    }
}
