//! Lineguard — Main Entry Point
//!
//! Runs one agent per configured production line plus the bus consumers,
//! all on a single-threaded executor.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SimulatedLine     MemoryTwinStore   MemoryBus   MethodRouter  │
//! │  (DevicePort)      (TwinStore)       (Publisher) (Commands)    │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  DeviceAgent × N          ErrorEscalation              │    │
//! │  │  KpiMonitor               KpiEscalation                │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use log::info;

use lineguard::adapters::log_sink::TelemetryLogger;
use lineguard::adapters::memory_bus::MemoryBus;
use lineguard::adapters::memory_twin::MemoryTwinStore;
use lineguard::adapters::method_router::{DeviceBinding, MethodRouter};
use lineguard::adapters::sim_device::SimulatedLine;
use lineguard::analytics::KpiMonitor;
use lineguard::app::agent::{DeviceAgent, ProductionLine};
use lineguard::app::ports::{EventPublisher, TwinStore};
use lineguard::config::{AgentConfig, FleetConfig};
use lineguard::escalation::{ErrorEscalation, KpiEscalation};

/// Executor task slots: agents and bus pumps.
const TASKS: usize = 64;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("lineguard v{}", env!("CARGO_PKG_VERSION"));

    let cfg = match parse_config_path_from_args().or_else(|| std::env::var("LINEGUARD_CONFIG").ok()) {
        Some(path) => {
            let cfg = FleetConfig::from_path(&path).context("loading config")?;
            info!("loaded config from {}", path);
            cfg
        }
        None => {
            info!("no config given, using built-in defaults");
            FleetConfig::default()
        }
    };
    anyhow::ensure!(
        cfg.lines.len() + 4 <= TASKS,
        "too many lines ({}) for {} executor slots",
        cfg.lines.len(),
        TASKS
    );

    // ── Adapters ──────────────────────────────────────────────
    let twin = MemoryTwinStore::new();
    let bus = MemoryBus::new();
    let router = MethodRouter::new();

    let devices: Vec<SimulatedLine> = cfg
        .lines
        .iter()
        .enumerate()
        .map(|(i, l)| SimulatedLine::new(l.node_base.clone(), 0x9E37_79B9 + i as u64))
        .collect();
    let bindings: Vec<DeviceBinding> = cfg
        .lines
        .iter()
        .map(|l| {
            twin.register(&l.device_id);
            router.bind(&l.device_id)
        })
        .collect();

    // ── Bus consumers ─────────────────────────────────────────
    let telemetry_log = TelemetryLogger::new();
    let kpi_monitor = KpiMonitor::new(&bus, cfg.escalation.kpi_threshold_percent);
    let error_escalation = ErrorEscalation::new(&twin, &router, &cfg.escalation);
    let kpi_escalation = KpiEscalation::new(
        &twin,
        &router,
        &cfg.escalation,
        cfg.agent.default_production_rate,
    );
    bus.subscribe_handler(&telemetry_log);
    bus.subscribe_handler(&kpi_monitor);
    bus.subscribe_handler(&error_escalation);
    bus.subscribe_handler(&kpi_escalation);

    // ── Executor ──────────────────────────────────────────────
    let executor: edge_executor::LocalExecutor<'_, TASKS> = edge_executor::LocalExecutor::new();

    for ((line, device), binding) in cfg.lines.iter().zip(&devices).zip(&bindings) {
        executor
            .spawn(run_line(ProductionLine::from(line), &cfg.agent, device, &twin, &bus, binding))
            .detach();
    }
    executor.spawn(bus.pump(&telemetry_log, &cfg.bus)).detach();
    executor.spawn(bus.pump(&kpi_monitor, &cfg.bus)).detach();
    executor.spawn(bus.pump(&error_escalation, &cfg.bus)).detach();
    executor.spawn(bus.pump(&kpi_escalation, &cfg.bus)).detach();

    info!("{} lines running", cfg.lines.len());
    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
    Ok(())
}

async fn run_line(
    line: ProductionLine,
    cfg: &AgentConfig,
    device: &SimulatedLine,
    twin: impl TwinStore,
    bus: impl EventPublisher,
    binding: &DeviceBinding,
) {
    let agent = DeviceAgent::connect(line, cfg, device, twin, bus).await;
    agent.run(binding).await;
}

fn parse_config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        if a == "--config" {
            return args.next();
        }
        if let Some(v) = a.strip_prefix("--config=") {
            return Some(v.to_string());
        }
    }
    None
}
