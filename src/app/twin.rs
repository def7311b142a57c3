//! Twin property keys and patch helpers.
//!
//! Desired: `{ProductionRate}`: operator / handler intent.
//! Reported: `{ProductionRate, DeviceError, workorderId}`: what the agent
//! last observed on the device.

use log::warn;
use serde_json::Value;

use super::ports::Properties;

pub const PRODUCTION_RATE: &str = "ProductionRate";
pub const DEVICE_ERROR: &str = "DeviceError";
pub const WORKORDER_ID: &str = "workorderId";

/// Single-key property patch.
pub fn patch(key: &str, value: impl Into<Value>) -> Properties {
    let mut p = Properties::new();
    p.insert(key.to_string(), value.into());
    p
}

/// Desired production rate, if present and integral.
pub fn desired_production_rate(desired: &Properties) -> Option<i64> {
    let value = desired.get(PRODUCTION_RATE)?;
    match value {
        Value::Null => None,
        v => {
            let rate = v.as_i64().or_else(|| {
                // Whole-number floats are accepted as written by some tools.
                v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
            });
            if rate.is_none() {
                warn!("desired {} is not an integer: {}", PRODUCTION_RATE, v);
            }
            rate
        }
    }
}
