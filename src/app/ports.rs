//! Port traits — the hexagonal boundary between the core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DeviceAgent / escalation handlers
//! ```
//!
//! Driven adapters (field device, twin store, event bus, command channel)
//! implement these traits.  The [`DeviceAgent`](super::agent::DeviceAgent)
//! and the escalation handlers consume them via generics, so the core never
//! touches a transport directly.
//!
//! Every method takes `&self`: one agent shares its device port between the
//! poll loop and the inbound method server, and handlers may process
//! overlapping batches.  Adapters keep their own interior state.

use core::time::Duration;

use crate::error::{BusError, CommandError, DeviceError, TwinError};
use crate::events::Topic;

// ───────────────────────────────────────────────────────────────
// Device I/O port (driven adapter: field device ↔ agent)
// ───────────────────────────────────────────────────────────────

/// A value held by a device node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// The node exists but carries no value.
    Null,
}

impl NodeValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats; the device reports whole temperatures as ints.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Any non-null scalar rendered as text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Bool(v) => Some(v.to_string()),
            Self::Null => None,
        }
    }
}

/// One physical field device reached through its node server.
pub trait DevicePort {
    /// Open the connection to the device server.
    async fn connect(&self) -> Result<(), DeviceError>;

    /// Read the current value of `node`.
    async fn read_node(&self, node: &str) -> Result<NodeValue, DeviceError>;

    /// Write `value` to `node`.
    async fn write_node(&self, node: &str, value: NodeValue) -> Result<(), DeviceError>;

    /// Invoke the procedure `method` on the object node `object`.
    async fn invoke(&self, object: &str, method: &str) -> Result<(), DeviceError>;
}

// ───────────────────────────────────────────────────────────────
// Twin store port (driven adapter: core ↔ remote registry)
// ───────────────────────────────────────────────────────────────

/// A flat set of twin properties.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// The desired half of a twin as read, with its concurrency tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredSnapshot {
    pub properties: Properties,
    pub etag: u64,
}

/// Per-device property store split into desired and reported halves.
///
/// No strong consistency: readers see whatever was last written.
pub trait TwinStore {
    /// Read the desired properties of `device_id`.
    async fn desired(&self, device_id: &str) -> Result<DesiredSnapshot, TwinError>;

    /// Merge `patch` into the desired properties.  With `if_match` set the
    /// write is rejected with [`TwinError::Conflict`] when the etag moved.
    async fn update_desired(
        &self,
        device_id: &str,
        patch: Properties,
        if_match: Option<u64>,
    ) -> Result<(), TwinError>;

    /// Merge `patch` into the reported properties.
    async fn update_reported(&self, device_id: &str, patch: Properties) -> Result<(), TwinError>;

    /// Ids of every device whose reported `key` equals `value`.
    async fn query_reported(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<String>, TwinError>;
}

// ───────────────────────────────────────────────────────────────
// Event bus ports (agent → bus → handlers)
// ───────────────────────────────────────────────────────────────

/// Publishing side of the event bus.
pub trait EventPublisher {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BusError>;
}

/// Subscribing side: the bus delivers batches at least once.
///
/// `on_batch` never fails; every event is a unit of work whose failure is
/// logged and contained inside the handler.
pub trait BatchHandler {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Topic this handler is registered on.
    fn topic(&self) -> Topic;

    async fn on_batch(&self, events: &[String]);
}

// ───────────────────────────────────────────────────────────────
// Command channel ports (handlers → channel → agent)
// ───────────────────────────────────────────────────────────────

/// Cloud-side remote method invocation.
pub trait CommandChannel {
    /// Invoke `method` on `device_id` and wait up to `timeout` for the
    /// device's status code.
    async fn invoke(
        &self,
        device_id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<u16, CommandError>;
}

/// Device-side binding: yields inbound method calls for one device.
pub trait MethodInbox {
    /// Next call, or `None` once the binding is closed.
    async fn next_call(&self) -> Option<MethodCall>;
}

/// An inbound method call awaiting its status code.
pub struct MethodCall {
    method: String,
    responder: Box<dyn FnOnce(u16) + Send>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, responder: impl FnOnce(u16) + Send + 'static) -> Self {
        Self {
            method: method.into(),
            responder: Box::new(responder),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Send the status code back to the caller.
    pub fn respond(self, status: u16) {
        (self.responder)(status);
    }
}

impl core::fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MethodCall").field("method", &self.method).finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// Shared-reference forwarding
// ───────────────────────────────────────────────────────────────

impl<T: TwinStore> TwinStore for &T {
    async fn desired(&self, device_id: &str) -> Result<DesiredSnapshot, TwinError> {
        (**self).desired(device_id).await
    }

    async fn update_desired(
        &self,
        device_id: &str,
        patch: Properties,
        if_match: Option<u64>,
    ) -> Result<(), TwinError> {
        (**self).update_desired(device_id, patch, if_match).await
    }

    async fn update_reported(&self, device_id: &str, patch: Properties) -> Result<(), TwinError> {
        (**self).update_reported(device_id, patch).await
    }

    async fn query_reported(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<String>, TwinError> {
        (**self).query_reported(key, value).await
    }
}

impl<T: EventPublisher> EventPublisher for &T {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BusError> {
        (**self).publish(topic, payload).await
    }
}

impl<T: CommandChannel> CommandChannel for &T {
    async fn invoke(
        &self,
        device_id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<u16, CommandError> {
        (**self).invoke(device_id, method, timeout).await
    }
}

impl<T: DevicePort> DevicePort for &T {
    async fn connect(&self) -> Result<(), DeviceError> {
        (**self).connect().await
    }

    async fn read_node(&self, node: &str) -> Result<NodeValue, DeviceError> {
        (**self).read_node(node).await
    }

    async fn write_node(&self, node: &str, value: NodeValue) -> Result<(), DeviceError> {
        (**self).write_node(node, value).await
    }

    async fn invoke(&self, object: &str, method: &str) -> Result<(), DeviceError> {
        (**self).invoke(object, method).await
    }
}
