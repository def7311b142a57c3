//! Mock port adapters for integration tests.
//!
//! Every mock records its calls so tests can assert on the full history.
//! Mocks that share a [`Journal`] also record into one ordered log, which
//! lets a test check the order of calls across ports.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lineguard::app::ports::{
    CommandChannel, DesiredSnapshot, DevicePort, EventPublisher, MethodCall, MethodInbox,
    NodeValue, Properties, TwinStore,
};
use lineguard::error::{BusError, CommandError, DeviceError, TwinError};
use lineguard::events::Topic;
use serde_json::Value;

// ── Journal ───────────────────────────────────────────────────

/// Ordered, shared call log.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

#[allow(dead_code)]
impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

// ── MockDevice ────────────────────────────────────────────────

pub struct MockDevice {
    pub nodes: RefCell<HashMap<String, NodeValue>>,
    pub writes: RefCell<Vec<(String, NodeValue)>>,
    pub invokes: RefCell<Vec<(String, String)>>,
    pub fail_connect: bool,
    pub fail_invoke: Cell<bool>,
    /// Writes to `ProductionRate` are clamped to this on read-back.
    pub rate_cap: Option<i64>,
}

#[allow(dead_code)]
impl MockDevice {
    /// Device under `base` with sane telemetry and no errors.
    pub fn healthy(base: &str, workorder: &str) -> Self {
        let mut nodes = HashMap::new();
        let mut set = |leaf: &str, v: NodeValue| {
            nodes.insert(format!("{base}/{leaf}"), v);
        };
        set("WorkorderId", NodeValue::Text(workorder.into()));
        set("ProductionStatus", NodeValue::Int(1));
        set("GoodCount", NodeValue::Int(95));
        set("BadCount", NodeValue::Int(5));
        set("Temperature", NodeValue::Float(61.2));
        set("ProductionRate", NodeValue::Int(100));
        set("DeviceError", NodeValue::Int(0));
        Self {
            nodes: RefCell::new(nodes),
            writes: RefCell::new(Vec::new()),
            invokes: RefCell::new(Vec::new()),
            fail_connect: false,
            fail_invoke: Cell::new(false),
            rate_cap: None,
        }
    }

    pub fn set(&self, path: &str, value: NodeValue) {
        self.nodes.borrow_mut().insert(path.to_string(), value);
    }

    pub fn remove(&self, path: &str) {
        self.nodes.borrow_mut().remove(path);
    }
}

impl DevicePort for MockDevice {
    async fn connect(&self) -> Result<(), DeviceError> {
        if self.fail_connect {
            Err(DeviceError::Disconnected)
        } else {
            Ok(())
        }
    }

    async fn read_node(&self, node: &str) -> Result<NodeValue, DeviceError> {
        self.nodes
            .borrow()
            .get(node)
            .cloned()
            .ok_or_else(|| DeviceError::NodeUnreadable(node.to_string()))
    }

    async fn write_node(&self, node: &str, value: NodeValue) -> Result<(), DeviceError> {
        self.writes.borrow_mut().push((node.to_string(), value.clone()));
        let stored = match (value, self.rate_cap) {
            (NodeValue::Int(v), Some(cap)) => NodeValue::Int(v.min(cap)),
            (v, _) => v,
        };
        self.nodes.borrow_mut().insert(node.to_string(), stored);
        Ok(())
    }

    async fn invoke(&self, object: &str, method: &str) -> Result<(), DeviceError> {
        self.invokes
            .borrow_mut()
            .push((object.to_string(), method.to_string()));
        if self.fail_invoke.get() {
            Err(DeviceError::InvokeFailed(method.to_string()))
        } else {
            Ok(())
        }
    }
}

// ── MockTwin ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TwinCall {
    Desired(String),
    UpdateDesired {
        device_id: String,
        patch: Properties,
        if_match: Option<u64>,
    },
    UpdateReported {
        device_id: String,
        patch: Properties,
    },
    Query {
        key: String,
        value: Value,
    },
}

#[derive(Default)]
pub struct MockTwin {
    pub calls: RefCell<Vec<TwinCall>>,
    /// Desired properties returned for every device.
    pub desired: RefCell<Properties>,
    pub etag: Cell<u64>,
    /// Work order → device ids returned by `query_reported`.
    pub owners: RefCell<HashMap<String, Vec<String>>>,
    pub fail_desired: Cell<bool>,
    pub fail_update_desired: Cell<bool>,
    pub fail_reported: Cell<bool>,
    pub fail_query: Cell<bool>,
    pub journal: Journal,
}

#[allow(dead_code)]
impl MockTwin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn own(&self, workorder: &str, device_id: &str) {
        self.owners
            .borrow_mut()
            .entry(workorder.to_string())
            .or_default()
            .push(device_id.to_string());
    }

    pub fn set_desired(&self, key: &str, value: Value) {
        self.desired.borrow_mut().insert(key.to_string(), value);
    }

    pub fn reported_writes(&self) -> Vec<Properties> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                TwinCall::UpdateReported { patch, .. } => Some(patch.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn desired_writes(&self) -> Vec<(Properties, Option<u64>)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                TwinCall::UpdateDesired {
                    patch, if_match, ..
                } => Some((patch.clone(), *if_match)),
                _ => None,
            })
            .collect()
    }

    pub fn is_untouched_by_writes(&self) -> bool {
        self.reported_writes().is_empty() && self.desired_writes().is_empty()
    }
}

impl TwinStore for MockTwin {
    async fn desired(&self, device_id: &str) -> Result<DesiredSnapshot, TwinError> {
        self.calls.borrow_mut().push(TwinCall::Desired(device_id.into()));
        if self.fail_desired.get() {
            return Err(TwinError::Unavailable);
        }
        Ok(DesiredSnapshot {
            properties: self.desired.borrow().clone(),
            etag: self.etag.get(),
        })
    }

    async fn update_desired(
        &self,
        device_id: &str,
        patch: Properties,
        if_match: Option<u64>,
    ) -> Result<(), TwinError> {
        self.journal.push(format!("twin.update_desired {device_id}"));
        self.calls.borrow_mut().push(TwinCall::UpdateDesired {
            device_id: device_id.into(),
            patch,
            if_match,
        });
        if self.fail_update_desired.get() {
            return Err(TwinError::Rejected("mock".into()));
        }
        Ok(())
    }

    async fn update_reported(&self, device_id: &str, patch: Properties) -> Result<(), TwinError> {
        self.calls.borrow_mut().push(TwinCall::UpdateReported {
            device_id: device_id.into(),
            patch,
        });
        if self.fail_reported.get() {
            return Err(TwinError::Unavailable);
        }
        Ok(())
    }

    async fn query_reported(&self, key: &str, value: &Value) -> Result<Vec<String>, TwinError> {
        self.calls.borrow_mut().push(TwinCall::Query {
            key: key.into(),
            value: value.clone(),
        });
        if self.fail_query.get() {
            return Err(TwinError::Unavailable);
        }
        let wo = value.as_str().unwrap_or_default();
        Ok(self.owners.borrow().get(wo).cloned().unwrap_or_default())
    }
}

// ── MockBus ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockBus {
    pub published: RefCell<Vec<(Topic, String)>>,
    pub fail: Cell<bool>,
    /// Fail publishes to this topic only.
    pub fail_topic: Cell<Option<Topic>>,
}

#[allow(dead_code)]
impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, topic: Topic) -> Vec<Value> {
        self.published
            .borrow()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, p)| serde_json::from_str(p).expect("published payload is JSON"))
            .collect()
    }
}

impl EventPublisher for MockBus {
    async fn publish(&self, topic: Topic, payload: String) -> Result<(), BusError> {
        if self.fail.get() || self.fail_topic.get() == Some(topic) {
            return Err(BusError::PublishFailed("mock".into()));
        }
        self.published.borrow_mut().push((topic, payload));
        Ok(())
    }
}

// ── MockCommands ──────────────────────────────────────────────

#[derive(Default)]
pub struct MockCommands {
    pub calls: RefCell<Vec<(String, String, Duration)>>,
    /// `None` answers 200; `Some(err)` fails every call.
    pub failure: RefCell<Option<CommandError>>,
    pub journal: Journal,
}

#[allow(dead_code)]
impl MockCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn stops_to(&self, device_id: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(d, m, _)| d == device_id && m == "EmergencyStop")
            .count()
    }
}

impl CommandChannel for MockCommands {
    async fn invoke(
        &self,
        device_id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<u16, CommandError> {
        self.journal.push(format!("command.{method} {device_id}"));
        self.calls
            .borrow_mut()
            .push((device_id.into(), method.into(), timeout));
        match self.failure.borrow().clone() {
            Some(e) => Err(e),
            None => Ok(200),
        }
    }
}

// ── ScriptedInbox ─────────────────────────────────────────────

/// Yields a fixed list of method names, then closes.
pub struct ScriptedInbox {
    pub pending: RefCell<Vec<String>>,
    pub statuses: Arc<Mutex<Vec<(String, u16)>>>,
}

#[allow(dead_code)]
impl ScriptedInbox {
    pub fn new(methods: &[&str]) -> Self {
        Self {
            pending: RefCell::new(methods.iter().rev().map(|m| m.to_string()).collect()),
            statuses: Arc::default(),
        }
    }

    pub fn answered(&self) -> Vec<(String, u16)> {
        self.statuses.lock().unwrap().clone()
    }
}

impl MethodInbox for ScriptedInbox {
    async fn next_call(&self) -> Option<MethodCall> {
        let method = self.pending.borrow_mut().pop()?;
        let statuses = self.statuses.clone();
        let name = method.clone();
        Some(MethodCall::new(method, move |status| {
            statuses.lock().unwrap().push((name, status));
        }))
    }
}
