//! Inbound remote methods.
//!
//! These are the procedures the cloud side can invoke on a line through
//! the command channel.  The [`DeviceAgent`](super::agent::DeviceAgent)
//! forwards each to the device procedure of the same name and answers
//! with an HTTP-style status code.

use core::fmt;

/// Status returned when the device procedure succeeded.
pub const STATUS_OK: u16 = 200;
/// Status returned when the method name is not registered.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Status returned when the device procedure failed.
pub const STATUS_FAILED: u16 = 500;

/// Remote methods a line agent registers on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectMethod {
    /// Halt the line immediately.
    EmergencyStop,
    /// Clear the device's latched error flags.
    ResetErrorStatus,
}

impl DirectMethod {
    pub const ALL: [DirectMethod; 2] = [DirectMethod::EmergencyStop, DirectMethod::ResetErrorStatus];

    /// Method name on the wire; also the device procedure's node leaf.
    pub const fn name(self) -> &'static str {
        match self {
            Self::EmergencyStop => "EmergencyStop",
            Self::ResetErrorStatus => "ResetErrorStatus",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl fmt::Display for DirectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
