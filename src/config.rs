//! Fleet configuration parameters
//!
//! All tunable parameters for the line agents and escalation handlers.
//! Loaded from a JSON file at startup; every field has a default.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Production lines, one agent each
    pub lines: Vec<LineConfig>,
    pub agent: AgentConfig,
    pub escalation: EscalationConfig,
    pub bus: BusConfig,
}

/// Static identity of one production line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    /// Human-readable name (e.g. "Line_1")
    pub name: String,
    /// Device identifier in the twin store and command channel
    pub device_id: String,
    /// OPC-style base node path, e.g. `ns=2;s=Device 1`
    pub node_base: String,
    /// Device server endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Connection credential for the twin store / command channel.
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Delay between the end of one cycle and the start of the next (ms)
    pub poll_interval_ms: u64,
    /// Desired production rate assumed when the twin carries none (%)
    pub default_production_rate: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Consecutive error events per work order that trigger a stop
    pub error_threshold: u32,
    /// Remote method response timeout (seconds)
    pub command_timeout_secs: u64,
    /// Desired production rate reduction per KPI alert (%)
    pub rate_decrement: i64,
    /// Idle work-order tallies older than this are evicted (seconds)
    pub tally_idle_ttl_secs: u64,
    /// KPI below this percentage raises an alert
    pub kpi_threshold_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum events per delivered batch
    pub max_batch: usize,
    /// Wait before polling an empty topic again (ms)
    pub idle_poll_ms: u64,
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840/".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        let lines = (1..=3)
            .map(|n| LineConfig {
                name: format!("Line_{n}"),
                device_id: format!("Device_{n}"),
                node_base: format!("ns=2;s=Device {n}"),
                endpoint: default_endpoint(),
                credential: None,
            })
            .collect();
        Self {
            lines,
            agent: AgentConfig::default(),
            escalation: EscalationConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000, // 0.1 Hz
            default_production_rate: 100,
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            command_timeout_secs: 30,
            rate_decrement: 10,
            tally_idle_ttl_secs: 24 * 60 * 60,
            kpi_threshold_percent: 90.0,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_batch: 32,
            idle_poll_ms: 200,
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl EscalationConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn tally_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.tally_idle_ttl_secs)
    }
}

impl BusConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl FleetConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would stall or misfire the pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lines.is_empty() {
            bail!("at least one line must be configured");
        }
        let mut seen = HashSet::new();
        for line in &self.lines {
            if line.device_id.is_empty() || line.node_base.is_empty() {
                bail!("line {} needs a device_id and node_base", line.name);
            }
            if !seen.insert(line.device_id.as_str()) {
                bail!("duplicate device_id {}", line.device_id);
            }
        }
        if self.agent.poll_interval_ms == 0 {
            bail!("agent.poll_interval_ms must be > 0");
        }
        if self.escalation.error_threshold == 0 {
            bail!("escalation.error_threshold must be > 0");
        }
        if self.escalation.command_timeout_secs == 0 {
            bail!("escalation.command_timeout_secs must be > 0");
        }
        if self.escalation.rate_decrement <= 0 {
            bail!("escalation.rate_decrement must be > 0");
        }
        let kpi = self.escalation.kpi_threshold_percent;
        if !(kpi > 0.0 && kpi <= 100.0) {
            bail!("escalation.kpi_threshold_percent must be in (0, 100]");
        }
        if self.bus.max_batch == 0 {
            bail!("bus.max_batch must be > 0");
        }
        Ok(())
    }
}
