use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::{Builder, Env};
use log::info;

use legion_thermald::config::{Backend, Config, CONFIG_ENV};
use legion_thermald::ec::sim::SimulatedEc;
use legion_thermald::ec::{names, DevPort, EcPorts, EcTransport, RegisterMap};
use legion_thermald::http::{HttpServer, HttpState};
use legion_thermald::kernel::{self, Bus, CommandDaemon, Daemon, OptimizingDaemon, SamplingDaemon};
use legion_thermald::optimizer::Optimizer;
use legion_thermald::telemetry::ThermalHistory;
use legion_thermald::workload::{PlatformInfo, WorkloadDetector};

/// Idle readings the simulated controller starts from.
const SIM_DEFAULTS: &[(&str, u8)] = &[
    (names::CPU_PACKAGE_TEMP, 62),
    (names::GPU_TEMP, 55),
    (names::GPU_HOTSPOT_TEMP, 63),
    (names::GPU_MEMORY_TEMP, 58),
    (names::VRM_TEMP, 52),
    (names::STORAGE_TEMP, 41),
    (names::RAM_TEMP, 44),
    (names::BATTERY_TEMP, 33),
    (names::FAN1_SPEED, 32),
    (names::FAN2_SPEED, 30),
];

fn simulated(config: &Config, map: &RegisterMap) -> Result<SimulatedEc> {
    let sim = SimulatedEc::new(config.ec.ports.pair());
    for (name, value) in SIM_DEFAULTS {
        let addr = map.resolve(name)?;
        sim.set_register(addr, *value);
    }
    for (name, base) in [(names::CPU_PACKAGE_TEMP, 62), (names::GPU_TEMP, 55)] {
        sim.animate(map.resolve(name)?, base, config.simulation);
    }
    Ok(sim)
}

fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()
        .with_context(|| format!("loading configuration (set {} to override)", CONFIG_ENV))?;
    let map = config.register_map().context("building register map")?;

    let ports: Box<dyn EcPorts> = match config.ec.backend {
        Backend::DevPort => Box::new(DevPort::open().context("opening /dev/port")?),
        Backend::Simulated => Box::new(simulated(&config, &map)?),
    };
    info!(
        "EC backend {:?} on ports 0x{:02X}/0x{:02X}, {} registers",
        config.ec.backend,
        config.ec.ports.command_port,
        config.ec.ports.data_port,
        map.len()
    );

    let transport = EcTransport::spawn(ports, config.ec.ports.pair(), map.clone(), config.ec.timings)
        .context("starting EC worker")?;
    let optimizer = Arc::new(
        Optimizer::new(
            Arc::new(transport.clone()),
            &map,
            config.fan_rpm_scale,
            ThermalHistory::new(),
        )
        .context("resolving control registers")?
        // The sampling daemon owns the 1 Hz history; passes read from it.
        .reuse_samples_within(config.sample_interval() * 2),
    );
    info!(
        "worst-case pass duration {:?} over {} registers",
        transport.timings().worst_case(optimizer.registers_per_pass()),
        optimizer.registers_per_pass()
    );

    let platform = PlatformInfo::detect();
    info!(
        "host {} / {} / {} cpus",
        platform.host_name.as_deref().unwrap_or("unknown"),
        platform.cpu_brand.as_deref().unwrap_or("unknown cpu"),
        platform.cpu_count
    );

    if let Some(addr) = &config.http_addr {
        HttpServer::new(addr).start(HttpState {
            optimizer: Arc::clone(&optimizer),
            transport: transport.clone(),
            platform,
        });
    }

    let daemons: Vec<Box<dyn Daemon>> = vec![
        Box::new(SamplingDaemon::new(
            Arc::clone(&optimizer),
            config.sample_interval(),
            config.emergency_cooling,
        )),
        Box::new(OptimizingDaemon::new(
            Arc::clone(&optimizer),
            WorkloadDetector::new(),
            config.optimize_interval(),
        )),
        Box::new(CommandDaemon::new(
            kernel::spawn_stdin_reader(),
            Arc::clone(&optimizer),
            transport,
        )),
    ];
    kernel::run_loop(daemons, Bus::new());
    Ok(())
}
