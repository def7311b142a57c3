//! Simulated production line.
//!
//! Implements [`DevicePort`] over an in-memory model of one line so the
//! whole pipeline runs without a node server.  Nodes live under the
//! line's base path (`{base}/GoodCount`, …); procedures are invoked on
//! the base object.
//!
//! Every `WorkorderId` read advances the model by one step: while running
//! it produces `rate / 10` units with a pseudo-random scrap share and may
//! latch a random fault.  `EmergencyStop` halts the line and latches the
//! emergency-stop flag; `ResetErrorStatus` clears the flags.

use core::cell::RefCell;

use log::{debug, info};

use crate::app::agent::Node;
use crate::app::commands::DirectMethod;
use crate::app::ports::{DevicePort, NodeValue};
use crate::error::DeviceError;
use crate::faults::DeviceFault;

/// Units per work order before the line moves to the next one.
const UNITS_PER_ORDER: i64 = 500;

/// Snapshot of the simulated line's state.
#[derive(Debug, Clone, PartialEq)]
pub struct LineState {
    pub workorder_id: String,
    pub running: bool,
    pub good_count: i64,
    pub bad_count: i64,
    pub temperature: f64,
    pub production_rate: i64,
    pub device_error: i64,
}

#[derive(Debug)]
struct Sim {
    state: LineState,
    orders: u32,
    rng: u64,
    reachable: bool,
    connected: bool,
    /// Percent chance per step of latching a random fault.
    fault_chance: u64,
}

/// One simulated line behind a [`DevicePort`].
#[derive(Debug)]
pub struct SimulatedLine {
    base: String,
    sim: RefCell<Sim>,
}

impl SimulatedLine {
    /// A running line at full rate on its first work order.
    pub fn new(base: impl Into<String>, seed: u64) -> Self {
        let base = base.into();
        let state = LineState {
            workorder_id: workorder_name(&base, 1),
            running: true,
            good_count: 0,
            bad_count: 0,
            temperature: 60.0,
            production_rate: 100,
            device_error: 0,
        };
        Self {
            base,
            sim: RefCell::new(Sim {
                state,
                orders: 1,
                rng: seed | 1,
                reachable: true,
                connected: false,
                fault_chance: 2,
            }),
        }
    }

    /// Make `connect` fail, as if the server were down.
    pub fn unreachable(self) -> Self {
        self.sim.borrow_mut().reachable = false;
        self
    }

    /// Percent chance per step of a random fault (0 disables).
    pub fn with_fault_chance(self, percent: u64) -> Self {
        self.sim.borrow_mut().fault_chance = percent.min(100);
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn state(&self) -> LineState {
        self.sim.borrow().state.clone()
    }

    /// Latch `fault` as if the device raised it.
    pub fn raise(&self, fault: DeviceFault) {
        self.sim.borrow_mut().state.device_error |= fault.mask();
    }

    /// Restart a stopped line.
    pub fn start(&self) {
        self.sim.borrow_mut().state.running = true;
    }

    fn leaf<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.base.as_str())?.strip_prefix('/')
    }
}

impl Sim {
    /// xorshift64
    fn next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn step(&mut self, base: &str) {
        if !self.state.running {
            self.state.temperature = (self.state.temperature - 0.5).max(20.0);
            return;
        }
        let units = self.state.production_rate / 10;
        let scrap_pct = (self.next() % 15) as i64;
        let bad = units * scrap_pct / 100;
        self.state.good_count += units - bad;
        self.state.bad_count += bad;

        let drift = (self.next() % 21) as f64 / 10.0 - 1.0;
        self.state.temperature = (self.state.temperature + drift).clamp(40.0, 90.0);

        if self.fault_chance > 0 && self.next() % 100 < self.fault_chance {
            let fault = match self.next() % 3 {
                0 => DeviceFault::PowerFailure,
                1 => DeviceFault::SensorFailure,
                _ => DeviceFault::Unknown,
            };
            self.state.device_error |= fault.mask();
            debug!("sim {}: {} raised", base, fault);
        }

        if self.state.good_count + self.state.bad_count >= UNITS_PER_ORDER {
            self.orders += 1;
            self.state.workorder_id = workorder_name(base, self.orders);
            self.state.good_count = 0;
            self.state.bad_count = 0;
            info!("sim {}: next work order {}", base, self.state.workorder_id);
        }
    }
}

fn workorder_name(base: &str, n: u32) -> String {
    let tag: String = base.chars().filter(char::is_ascii_alphanumeric).collect();
    format!("WO-{tag}-{n:04}")
}

impl DevicePort for SimulatedLine {
    async fn connect(&self) -> Result<(), DeviceError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.reachable {
            return Err(DeviceError::Disconnected);
        }
        sim.connected = true;
        Ok(())
    }

    async fn read_node(&self, node: &str) -> Result<NodeValue, DeviceError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.connected {
            return Err(DeviceError::Disconnected);
        }
        let unreadable = || DeviceError::NodeUnreadable(node.to_string());
        let leaf = self.leaf(node).ok_or_else(unreadable)?;

        let value = if leaf == Node::WorkorderId.leaf() {
            sim.step(&self.base);
            NodeValue::Text(sim.state.workorder_id.clone())
        } else if leaf == Node::ProductionStatus.leaf() {
            NodeValue::Int(i64::from(sim.state.running))
        } else if leaf == Node::GoodCount.leaf() {
            NodeValue::Int(sim.state.good_count)
        } else if leaf == Node::BadCount.leaf() {
            NodeValue::Int(sim.state.bad_count)
        } else if leaf == Node::Temperature.leaf() {
            NodeValue::Float(sim.state.temperature)
        } else if leaf == Node::ProductionRate.leaf() {
            NodeValue::Int(sim.state.production_rate)
        } else if leaf == Node::DeviceError.leaf() {
            NodeValue::Int(sim.state.device_error)
        } else {
            return Err(unreadable());
        };
        Ok(value)
    }

    async fn write_node(&self, node: &str, value: NodeValue) -> Result<(), DeviceError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.connected {
            return Err(DeviceError::Disconnected);
        }
        if self.leaf(node) != Some(Node::ProductionRate.leaf()) {
            return Err(DeviceError::WriteFailed(format!("{node} is read-only")));
        }
        let rate = value
            .as_i64()
            .ok_or_else(|| DeviceError::WriteFailed(format!("{node} takes an integer")))?;
        // The device clamps to its physical range.
        sim.state.production_rate = rate.clamp(0, 100);
        Ok(())
    }

    async fn invoke(&self, object: &str, method: &str) -> Result<(), DeviceError> {
        let mut sim = self.sim.borrow_mut();
        if !sim.connected {
            return Err(DeviceError::Disconnected);
        }
        if object != self.base {
            return Err(DeviceError::InvokeFailed(format!("no object {object}")));
        }
        let procedure = self
            .leaf(method)
            .and_then(DirectMethod::from_name)
            .ok_or_else(|| DeviceError::InvokeFailed(format!("no procedure {method}")))?;
        match procedure {
            DirectMethod::EmergencyStop => {
                sim.state.running = false;
                sim.state.device_error |= DeviceFault::EmergencyStop.mask();
            }
            DirectMethod::ResetErrorStatus => sim.state.device_error = 0,
        }
        info!("sim {}: {} executed", self.base, procedure);
        Ok(())
    }
}
