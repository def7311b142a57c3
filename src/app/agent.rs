//! Device agent — runs one production line end to end.
//!
//! [`DeviceAgent`] owns the line's device port and twin client.  Every
//! cycle it reads the field values, publishes telemetry, reconciles the
//! twin, and goes back to sleep; alongside the poll loop it serves the
//! inbound remote methods for its device.
//!
//! ```text
//!  DevicePort ──▶ ┌─────────────────────────┐ ──▶ EventPublisher
//!                 │       DeviceAgent        │
//!   TwinStore ◀──▶│ telemetry · rate · error │◀── MethodInbox
//!                 └─────────────────────────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Read `WorkorderId`, `ProductionStatus`, `GoodCount`, `BadCount`,
//!    `Temperature`.  Any unreadable value abandons the cycle.
//! 2. Publish a [`TelemetryEvent`].  A failed publish abandons the cycle.
//! 3. Reconcile the production rate (desired → device → reported).
//! 4. Reconcile the device-error count (event only on change, reported
//!    every cycle).
//! 5. Report the current work order id.
//!
//! Steps 3–5 are attempted independently; each outcome lands in the
//! [`CycleReport`] and is logged at the single handling point in
//! [`DeviceAgent::run_poll_loop`].

use core::cell::Cell;
use core::fmt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_lite::FutureExt;
use log::{debug, error, info, warn};

use crate::config::{AgentConfig, LineConfig};
use crate::error::{DeviceError, Result};
use crate::events::{self, ErrorEvent, TelemetryEvent, Topic};
use crate::faults::DeviceFault;
use crate::scheduler::PollSchedule;

use super::commands::{DirectMethod, STATUS_FAILED, STATUS_NOT_FOUND, STATUS_OK};
use super::ports::{DevicePort, EventPublisher, MethodInbox, NodeValue, TwinStore};
use super::twin;

// ───────────────────────────────────────────────────────────────
// Line identity and node paths
// ───────────────────────────────────────────────────────────────

/// Fixed node leaves under a line's base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    WorkorderId,
    ProductionStatus,
    GoodCount,
    BadCount,
    Temperature,
    ProductionRate,
    DeviceError,
    EmergencyStop,
    ResetErrorStatus,
}

impl Node {
    pub const fn leaf(self) -> &'static str {
        match self {
            Self::WorkorderId => "WorkorderId",
            Self::ProductionStatus => "ProductionStatus",
            Self::GoodCount => "GoodCount",
            Self::BadCount => "BadCount",
            Self::Temperature => "Temperature",
            Self::ProductionRate => "ProductionRate",
            Self::DeviceError => "DeviceError",
            Self::EmergencyStop => "EmergencyStop",
            Self::ResetErrorStatus => "ResetErrorStatus",
        }
    }
}

impl From<DirectMethod> for Node {
    fn from(m: DirectMethod) -> Self {
        match m {
            DirectMethod::EmergencyStop => Self::EmergencyStop,
            DirectMethod::ResetErrorStatus => Self::ResetErrorStatus,
        }
    }
}

/// Static identity of a production line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionLine {
    pub name: String,
    pub device_id: String,
    /// Base node path, e.g. `ns=2;s=Device 1`.
    pub node_base: String,
}

impl ProductionLine {
    pub fn new(
        name: impl Into<String>,
        device_id: impl Into<String>,
        node_base: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            node_base: node_base.into(),
        }
    }

    /// Full path of `node` under this line's base.
    pub fn node(&self, node: Node) -> String {
        format!("{}/{}", self.node_base, node.leaf())
    }
}

impl From<&LineConfig> for ProductionLine {
    fn from(cfg: &LineConfig) -> Self {
        Self::new(&cfg.name, &cfg.device_id, &cfg.node_base)
    }
}

// ───────────────────────────────────────────────────────────────
// Cycle outcome
// ───────────────────────────────────────────────────────────────

/// What step 4 did with the device-error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSync {
    /// The count changed and an error event was published.
    Published(i64),
    /// The count equals the last published value; twin updated only.
    Unchanged(i64),
}

/// Outcome of one completed cycle (telemetry was published).
#[derive(Debug)]
pub struct CycleReport {
    pub telemetry: TelemetryEvent,
    /// Effective rate read back from the device.
    pub production_rate: Result<i64>,
    pub device_error: Result<ErrorSync>,
    pub workorder: Result<()>,
}

impl CycleReport {
    /// True when every reconcile step succeeded.
    pub fn is_clean(&self) -> bool {
        self.production_rate.is_ok() && self.device_error.is_ok() && self.workorder.is_ok()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle | wo={}", self.telemetry.workorder_id)?;
        if let Ok(rate) = &self.production_rate {
            write!(f, " | rate={rate}%")?;
        }
        match &self.device_error {
            Ok(ErrorSync::Published(n)) => write!(f, " | errors={n} (sent)"),
            Ok(ErrorSync::Unchanged(n)) => write!(f, " | errors={n}"),
            Err(_) => Ok(()),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// DeviceAgent
// ───────────────────────────────────────────────────────────────

/// One long-lived agent per production line.
pub struct DeviceAgent<D, T, B> {
    line: ProductionLine,
    device: D,
    twin: T,
    bus: B,
    poll_interval: Duration,
    default_rate: i64,
    connected: bool,
    /// Last desired production rate applied to the device.
    production_rate: Cell<Option<i64>>,
    /// Last device-error count published on the bus.
    last_error_sent: Cell<Option<i64>>,
    cycles: Cell<u64>,
}

impl<D: DevicePort, T: TwinStore, B: EventPublisher> DeviceAgent<D, T, B> {
    /// Connect the device port and build the agent.
    ///
    /// A failed connection is logged and the agent runs degraded: its
    /// cycles fail on the first read until the device comes back.
    pub async fn connect(
        line: ProductionLine,
        cfg: &AgentConfig,
        device: D,
        twin: T,
        bus: B,
    ) -> Self {
        let connected = match device.connect().await {
            Ok(()) => {
                info!("[{}] connected to device node {}", line.name, line.node_base);
                true
            }
            Err(e) => {
                error!("[{}] device connection failed: {} (running degraded)", line.name, e);
                false
            }
        };
        Self {
            line,
            device,
            twin,
            bus,
            poll_interval: cfg.poll_interval(),
            default_rate: cfg.default_production_rate,
            connected,
            production_rate: Cell::new(None),
            last_error_sent: Cell::new(None),
            cycles: Cell::new(0),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn line(&self) -> &ProductionLine {
        &self.line
    }

    /// Whether the initial device connection succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last desired production rate written to the device.
    pub fn production_rate(&self) -> Option<i64> {
        self.production_rate.get()
    }

    /// Last device-error count published on the bus.
    pub fn last_error_sent(&self) -> Option<i64> {
        self.last_error_sent.get()
    }

    /// Cycles started since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    // ── Entry points ──────────────────────────────────────────

    /// Run the poll loop and the method server together, forever.
    pub async fn run(&self, inbox: &impl MethodInbox) {
        futures_lite::future::zip(self.run_poll_loop(), self.serve_methods(inbox)).await;
    }

    /// Cycle, sleep one interval, repeat.  Never returns.
    pub async fn run_poll_loop(&self) {
        let mut schedule = PollSchedule::new(self.poll_interval);
        info!(
            "[{}] poll loop started (every {:?})",
            self.line.name,
            schedule.interval()
        );
        loop {
            match AssertUnwindSafe(self.cycle()).catch_unwind().await {
                Ok(Ok(report)) => self.log_report(&report),
                Ok(Err(e)) => warn!("[{}] cycle abandoned: {}", self.line.name, e),
                Err(_) => error!("[{}] cycle panicked, continuing", self.line.name),
            }
            schedule.arm(Instant::now());
            schedule.wait().await;
        }
    }

    /// Answer inbound method calls until the binding closes.
    pub async fn serve_methods(&self, inbox: &impl MethodInbox) {
        while let Some(call) = inbox.next_call().await {
            let status = self.handle_method(call.method()).await;
            call.respond(status);
        }
        info!("[{}] method binding closed", self.line.name);
    }

    // ── Cycle ─────────────────────────────────────────────────

    /// Run one full cycle.  `Err` means the cycle was abandoned before
    /// telemetry went out and nothing was written to the twin.
    pub async fn cycle(&self) -> Result<CycleReport> {
        self.cycles.set(self.cycles.get() + 1);

        let telemetry = self.read_telemetry().await?;
        self.bus
            .publish(Topic::Telemetry, events::encode(&telemetry)?)
            .await?;

        let production_rate = self.reconcile_production_rate().await;
        let device_error = self.reconcile_device_error(&telemetry.workorder_id).await;
        let workorder = self.report_workorder(&telemetry.workorder_id).await;

        Ok(CycleReport {
            telemetry,
            production_rate,
            device_error,
            workorder,
        })
    }

    /// Step 1: read the five telemetry values; all or nothing.
    pub async fn read_telemetry(&self) -> Result<TelemetryEvent> {
        let workorder_id = self.read_text(Node::WorkorderId).await?;
        let production_status = self.read_int(Node::ProductionStatus).await?;
        let good_count = self.read_int(Node::GoodCount).await?;
        let bad_count = self.read_int(Node::BadCount).await?;
        let temperature = self.read_float(Node::Temperature).await?;
        Ok(TelemetryEvent {
            workorder_id,
            production_status,
            good_count,
            bad_count,
            temperature,
        })
    }

    /// Step 3: desired rate → device → effective rate → reported.
    ///
    /// Idempotent: the same desired value always writes the same device
    /// value and reports the device's read-back.
    pub async fn reconcile_production_rate(&self) -> Result<i64> {
        let desired = self.twin.desired(&self.line.device_id).await?;
        let rate = twin::desired_production_rate(&desired.properties).unwrap_or(self.default_rate);

        self.device
            .write_node(&self.line.node(Node::ProductionRate), NodeValue::Int(rate))
            .await?;
        self.production_rate.set(Some(rate));

        let effective = self.read_int(Node::ProductionRate).await?;
        self.twin
            .update_reported(
                &self.line.device_id,
                twin::patch(twin::PRODUCTION_RATE, effective),
            )
            .await?;
        debug!("[{}] rate desired={} effective={}", self.line.name, rate, effective);
        Ok(effective)
    }

    /// Step 4: publish the error count when it changed; report it always.
    ///
    /// The reported write happens whatever the publish result; a failed
    /// publish is retried next cycle.
    pub async fn reconcile_device_error(&self, workorder_id: &str) -> Result<ErrorSync> {
        let count = self.read_int(Node::DeviceError).await?;

        let sync = if self.last_error_sent.get() == Some(count) {
            Ok(ErrorSync::Unchanged(count))
        } else {
            self.publish_error_count(workorder_id, count)
                .await
                .map(|()| ErrorSync::Published(count))
        };

        let reported = self
            .twin
            .update_reported(&self.line.device_id, twin::patch(twin::DEVICE_ERROR, count))
            .await;
        let sync = sync?;
        reported?;
        Ok(sync)
    }

    async fn publish_error_count(&self, workorder_id: &str, count: i64) -> Result<()> {
        let event = ErrorEvent {
            workorder_id: workorder_id.to_string(),
            device_errors: count,
            faults: DeviceFault::names(count),
        };
        self.bus
            .publish(Topic::DeviceErrors, events::encode(&event)?)
            .await?;
        self.last_error_sent.set(Some(count));
        if count != 0 {
            warn!(
                "[{}] device errors now {} {:?}",
                self.line.name, count, event.faults
            );
        }
        Ok(())
    }

    /// Step 5.
    async fn report_workorder(&self, workorder_id: &str) -> Result<()> {
        self.twin
            .update_reported(
                &self.line.device_id,
                twin::patch(twin::WORKORDER_ID, workorder_id),
            )
            .await?;
        Ok(())
    }

    // ── Inbound methods ───────────────────────────────────────

    /// Forward a remote method to the device procedure of the same name.
    ///
    /// Returns 200 on success, 500 when the device call fails and 404 for
    /// unregistered methods.  Never panics across the callback boundary.
    pub async fn handle_method(&self, name: &str) -> u16 {
        let Some(method) = DirectMethod::from_name(name) else {
            warn!("[{}] unknown method '{}'", self.line.name, name);
            return STATUS_NOT_FOUND;
        };
        info!("[{}] method {} invoked", self.line.name, method);

        let target = self.line.node(method.into());
        match self.device.invoke(&self.line.node_base, &target).await {
            Ok(()) => {
                info!("[{}] {} done", self.line.name, method);
                STATUS_OK
            }
            Err(e) => {
                error!("[{}] {} failed: {}", self.line.name, method, e);
                STATUS_FAILED
            }
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn log_report(&self, report: &CycleReport) {
        debug!("[{}] {}", self.line.name, report);
        if let Err(e) = &report.production_rate {
            warn!("[{}] production rate not reconciled: {}", self.line.name, e);
        }
        if let Err(e) = &report.device_error {
            warn!("[{}] device error not reconciled: {}", self.line.name, e);
        }
        if let Err(e) = &report.workorder {
            warn!("[{}] work order not reported: {}", self.line.name, e);
        }
    }

    async fn read_value(&self, node: Node) -> Result<(String, NodeValue)> {
        let path = self.line.node(node);
        let value = self.device.read_node(&path).await?;
        if value == NodeValue::Null {
            return Err(DeviceError::NodeUnreadable(path).into());
        }
        Ok((path, value))
    }

    async fn read_int(&self, node: Node) -> Result<i64> {
        let (path, value) = self.read_value(node).await?;
        value.as_i64().ok_or_else(|| {
            DeviceError::TypeMismatch {
                node: path,
                expected: "an integer",
            }
            .into()
        })
    }

    async fn read_float(&self, node: Node) -> Result<f64> {
        let (path, value) = self.read_value(node).await?;
        value.as_f64().ok_or_else(|| {
            DeviceError::TypeMismatch {
                node: path,
                expected: "a number",
            }
            .into()
        })
    }

    async fn read_text(&self, node: Node) -> Result<String> {
        let (path, value) = self.read_value(node).await?;
        value.as_text().ok_or_else(|| {
            DeviceError::TypeMismatch {
                node: path,
                expected: "text",
            }
            .into()
        })
    }
}
