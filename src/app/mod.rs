//! Application core — line agent and the ports it is written against.
//!
//! All interaction with devices, the twin registry, the event bus and the
//! command channel happens through **port traits** defined in [`ports`],
//! keeping this layer fully testable without a plant or a cloud.

pub mod agent;
pub mod commands;
pub mod ports;
pub mod twin;
