//! Lineguard library.
//!
//! Line agents that mirror field devices into telemetry and twin state,
//! and the escalation handlers that stop lines on repeated device errors
//! or KPI breaches.  Everything I/O-facing sits behind the port traits in
//! [`app::ports`]; [`adapters`] holds the in-process implementations.

#![deny(unused_must_use)]

pub mod adapters;
pub mod analytics;
pub mod app;
pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod faults;
pub mod scheduler;
