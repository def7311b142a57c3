//! Device fault bitmask.
//!
//! The `DeviceError` node reports active faults as a bitfield so that
//! several simultaneous faults can be carried in one value.  The agent
//! treats the raw count as opaque for deduplication and only decodes it
//! for logs and the `Faults` list of the error event.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceFault {
    /// The line was stopped by an emergency stop.
    EmergencyStop = 0b0000_0001,
    /// Supply power was lost.
    PowerFailure = 0b0000_0010,
    /// A process sensor failed.
    SensorFailure = 0b0000_0100,
    /// Unclassified fault.
    Unknown = 0b0000_1000,
}

impl DeviceFault {
    pub const ALL: [DeviceFault; 4] = [
        DeviceFault::EmergencyStop,
        DeviceFault::PowerFailure,
        DeviceFault::SensorFailure,
        DeviceFault::Unknown,
    ];

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> i64 {
        self as i64
    }

    /// Decode every fault set in `flags`.  Bits outside the known set are
    /// ignored.
    pub fn decode(flags: i64) -> Vec<DeviceFault> {
        Self::ALL
            .into_iter()
            .filter(|f| flags & f.mask() != 0)
            .collect()
    }

    /// Names of every fault set in `flags`, as carried on the wire.
    pub fn names(flags: i64) -> Vec<String> {
        Self::decode(flags).into_iter().map(|f| f.to_string()).collect()
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmergencyStop => write!(f, "EmergencyStop"),
            Self::PowerFailure => write!(f, "PowerFailure"),
            Self::SensorFailure => write!(f, "SensorFailure"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
