//! Unified error types for the line agents and escalation handlers.
//!
//! Each external collaborator has its own error enum; all of them convert
//! into the crate-wide [`Error`] so a cycle or event can be handled at a
//! single point with `?`.

use core::fmt;
use core::time::Duration;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The field device could not be read, written or invoked.
    Device(DeviceError),
    /// The twin store rejected or failed a request.
    Twin(TwinError),
    /// An event could not be published.
    Bus(BusError),
    /// A remote method invocation failed or timed out.
    Command(CommandError),
    /// An inbound event payload was unusable.
    Event(EventError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "device: {e}"),
            Self::Twin(e) => write!(f, "twin: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Event(e) => write!(f, "event: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Device I/O errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device server could not be reached.
    Disconnected,
    /// The node exists but has no usable value.
    NodeUnreadable(String),
    /// The node holds a value of an unexpected type.
    TypeMismatch { node: String, expected: &'static str },
    /// Writing a node failed.
    WriteFailed(String),
    /// Invoking a device procedure failed.
    InvokeFailed(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "device server disconnected"),
            Self::NodeUnreadable(node) => write!(f, "node {node} unreadable"),
            Self::TypeMismatch { node, expected } => {
                write!(f, "node {node} is not {expected}")
            }
            Self::WriteFailed(node) => write!(f, "write to {node} failed"),
            Self::InvokeFailed(method) => write!(f, "invoke {method} failed"),
        }
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

// ---------------------------------------------------------------------------
// Twin store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwinError {
    /// No twin exists for the device id.
    UnknownDevice(String),
    /// The store could not be reached or timed out.
    Unavailable,
    /// The twin changed since it was read (stale etag).
    Conflict { expected: u64, actual: u64 },
    /// A property patch was rejected.
    Rejected(String),
}

impl fmt::Display for TwinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice(id) => write!(f, "unknown device {id}"),
            Self::Unavailable => write!(f, "twin store unavailable"),
            Self::Conflict { expected, actual } => {
                write!(f, "etag conflict (expected {expected}, found {actual})")
            }
            Self::Rejected(why) => write!(f, "patch rejected: {why}"),
        }
    }
}

impl From<TwinError> for Error {
    fn from(e: TwinError) -> Self {
        Self::Twin(e)
    }
}

// ---------------------------------------------------------------------------
// Event bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport refused the message.
    PublishFailed(String),
    /// The payload could not be serialised.
    Encode(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublishFailed(why) => write!(f, "publish failed: {why}"),
            Self::Encode(why) => write!(f, "encode failed: {why}"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Command channel errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No response arrived within the timeout.
    Timeout(Duration),
    /// The device is not bound to the channel.
    NotConnected(String),
    /// The channel could not deliver the request.
    Transport(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(t) => write!(f, "no response within {}s", t.as_secs()),
            Self::NotConnected(id) => write!(f, "device {id} not connected"),
            Self::Transport(why) => write!(f, "transport: {why}"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Inbound event errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The payload is not a JSON object.
    Malformed(String),
    /// The payload has no non-empty `Workorderid`.
    MissingWorkorder,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(why) => write!(f, "malformed payload: {why}"),
            Self::MissingWorkorder => write!(f, "payload has no Workorderid"),
        }
    }
}

impl From<EventError> for Error {
    fn from(e: EventError) -> Self {
        Self::Event(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
