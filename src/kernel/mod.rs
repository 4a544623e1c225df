//! The periodic monitor that drives the core.
//!
//! A blocking loop ticks a list of daemons every 50 ms. Daemons report
//! through the [`Bus`], which routes pulses to log levels.

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::ec::EcTransport;
use crate::optimizer::{OptimizationResult, Optimizer};
use crate::policy::WorkloadClass;
use crate::telemetry::SensorSnapshot;
use crate::workload::WorkloadDetector;

const LOOP_PERIOD: Duration = Duration::from_millis(50);

/// Categories of pulses travelling on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    Sample,
    Optimization,
    Alert,
    Command,
}

/// Numbers pulses and hands them to the logger.
#[derive(Debug, Default)]
pub struct Bus {
    next_id: u64,
    shutdown: bool,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, kind: PulseKind, source: &'static str, data: impl Into<String>) {
        self.next_id += 1;
        let data = data.into();
        match kind {
            PulseKind::Sample => debug!("pulse#{} {} => {}", self.next_id, source, data),
            PulseKind::Optimization | PulseKind::Command => {
                info!("pulse#{} {} => {}", self.next_id, source, data)
            }
            PulseKind::Alert => warn!("pulse#{} {} => {}", self.next_id, source, data),
        }
    }

    pub fn pulses(&self) -> u64 {
        self.next_id
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }
}

/// Basic interface for any long-running task on the loop.
pub trait Daemon {
    fn name(&self) -> &'static str;
    fn tick(&mut self, now: Instant, bus: &mut Bus);
}

pub fn describe_snapshot(s: &SensorSnapshot) -> String {
    format!(
        "CPU {}°C, GPU {}°C (hotspot {}°C, mem {}°C), VRM {}°C, SSD {}°C, RAM {}°C, battery {}°C, fans {}/{} rpm",
        s.cpu_package_c,
        s.gpu_c,
        s.gpu_hotspot_c,
        s.gpu_memory_c,
        s.vrm_c,
        s.storage_c,
        s.ram_c,
        s.battery_c,
        s.fan1_rpm,
        s.fan2_rpm
    )
}

pub fn describe_result(r: &OptimizationResult) -> String {
    match (&r.settings, r.throttle_risk) {
        (Some(s), Some(risk)) => format!(
            "{}: risk {:.2}, PL1 {} W, PL2 {} W, TGP {} W, fan {:?}",
            r.workload, risk, s.cpu_pl1_w, s.cpu_pl2_w, s.gpu_tgp_w, s.fan_profile
        ),
        _ => format!(
            "{}: failed ({})",
            r.workload,
            r.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Samples the sensors into the history and guards the hard limits.
pub struct SamplingDaemon {
    optimizer: Arc<Optimizer>,
    last_run: Instant,
    interval: Duration,
    emergency_cooling: bool,
    failures: u64,
}

impl SamplingDaemon {
    pub fn new(optimizer: Arc<Optimizer>, interval: Duration, emergency_cooling: bool) -> Self {
        Self {
            optimizer,
            last_run: Instant::now(),
            interval,
            emergency_cooling,
            failures: 0,
        }
    }
}

impl Daemon for SamplingDaemon {
    fn name(&self) -> &'static str {
        "sampler"
    }

    fn tick(&mut self, now: Instant, bus: &mut Bus) {
        if now.duration_since(self.last_run) < self.interval {
            return;
        }
        self.last_run = now;

        match self.optimizer.sample() {
            Ok(snapshot) => {
                bus.emit(PulseKind::Sample, self.name(), describe_snapshot(&snapshot));
                if self.emergency_cooling {
                    match self.optimizer.emergency_cooling(&snapshot) {
                        Ok(true) => bus.emit(PulseKind::Alert, self.name(), "emergency cooling engaged"),
                        Ok(false) => {}
                        Err(e) => bus.emit(
                            PulseKind::Alert,
                            self.name(),
                            format!("emergency cooling failed: {}", e),
                        ),
                    }
                }
            }
            Err(e) => {
                self.failures += 1;
                bus.emit(
                    PulseKind::Alert,
                    self.name(),
                    format!("sample #{} failed: {}", self.failures, e),
                );
            }
        }
    }
}

/// Runs an optimization pass on a fixed interval with the detected workload.
pub struct OptimizingDaemon {
    optimizer: Arc<Optimizer>,
    detector: WorkloadDetector,
    last_run: Instant,
    interval: Duration,
    passes: u64,
}

impl OptimizingDaemon {
    pub fn new(optimizer: Arc<Optimizer>, detector: WorkloadDetector, interval: Duration) -> Self {
        Self {
            optimizer,
            detector,
            last_run: Instant::now(),
            interval,
            passes: 0,
        }
    }
}

impl Daemon for OptimizingDaemon {
    fn name(&self) -> &'static str {
        "optimizer"
    }

    fn tick(&mut self, now: Instant, bus: &mut Bus) {
        if now.duration_since(self.last_run) < self.interval {
            return;
        }
        self.last_run = now;
        self.passes += 1;

        let workload = self.detector.detect();
        let result = self.optimizer.run_optimization_pass(workload);
        let kind = if result.success {
            PulseKind::Optimization
        } else {
            PulseKind::Alert
        };
        bus.emit(
            kind,
            self.name(),
            format!("pass #{} {}", self.passes, describe_result(&result)),
        );
    }
}

/// Operator commands read from stdin.
pub struct CommandDaemon {
    rx: Receiver<String>,
    optimizer: Arc<Optimizer>,
    transport: EcTransport,
}

impl CommandDaemon {
    pub fn new(rx: Receiver<String>, optimizer: Arc<Optimizer>, transport: EcTransport) -> Self {
        Self {
            rx,
            optimizer,
            transport,
        }
    }

    fn handle(&self, cmd: &str, bus: &mut Bus) {
        let mut words = cmd.split_whitespace();
        match (words.next(), words.next()) {
            (Some("help"), _) => bus.emit(
                PulseKind::Command,
                self.name(),
                "commands: help, sensors, history, stats, last, optimize <gaming|productivity|ai|balanced>, quit",
            ),
            (Some("sensors"), _) => {
                let msg = match self.optimizer.read_current_sensors() {
                    Ok(s) => describe_snapshot(&s),
                    Err(e) => format!("sensor read failed: {}", e),
                };
                bus.emit(PulseKind::Command, self.name(), msg);
            }
            (Some("history"), _) => {
                let history = self.optimizer.history();
                let msg = match history.latest() {
                    Some(latest) => format!(
                        "{} of {} samples; latest {}",
                        history.len(),
                        history.capacity(),
                        describe_snapshot(&latest)
                    ),
                    None => "history is empty".to_string(),
                };
                bus.emit(PulseKind::Command, self.name(), msg);
            }
            (Some("stats"), _) => {
                let s = self.transport.stats();
                bus.emit(
                    PulseKind::Command,
                    self.name(),
                    format!(
                        "ec reads {}, writes {}, failed attempts {}, retries {}",
                        s.reads, s.writes, s.failed_attempts, s.retries
                    ),
                );
            }
            (Some("last"), _) => {
                let msg = match self.optimizer.last_result() {
                    Some(r) => describe_result(&r),
                    None => "no optimization pass yet".to_string(),
                };
                bus.emit(PulseKind::Command, self.name(), msg);
            }
            (Some("optimize"), arg) => match arg.unwrap_or("balanced").parse::<WorkloadClass>() {
                Ok(workload) => {
                    let result = self.optimizer.run_optimization_pass(workload);
                    bus.emit(PulseKind::Command, self.name(), describe_result(&result));
                }
                Err(e) => bus.emit(PulseKind::Command, self.name(), e),
            },
            (Some("quit"), _) => {
                bus.emit(PulseKind::Command, self.name(), "shutting down");
                bus.request_shutdown();
            }
            _ => bus.emit(
                PulseKind::Command,
                self.name(),
                format!("unknown command: '{}'", cmd),
            ),
        }
    }
}

impl Daemon for CommandDaemon {
    fn name(&self) -> &'static str {
        "command"
    }

    fn tick(&mut self, _now: Instant, bus: &mut Bus) {
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => {
                    let trimmed = cmd.trim();
                    if !trimmed.is_empty() {
                        self.handle(trimmed, bus);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

/// Forwards stdin lines to a channel from a background thread.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

/// Blocking loop: ticks every daemon until one requests shutdown.
pub fn run_loop(mut daemons: Vec<Box<dyn Daemon>>, mut bus: Bus) {
    let names: Vec<&str> = daemons.iter().map(|d| d.name()).collect();
    info!("entering daemon loop with {:?}", names);

    while !bus.shutdown_requested() {
        let now = Instant::now();
        for daemon in daemons.iter_mut() {
            daemon.tick(now, &mut bus);
        }
        thread::sleep(LOOP_PERIOD);
    }
    info!("daemon loop stopped after {} pulses", bus.pulses());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::sim::SimulatedEc;
    use crate::ec::{EcTimings, PortPair, RegisterMap};
    use crate::telemetry::ThermalHistory;

    fn optimizer() -> (SimulatedEc, EcTransport, Arc<Optimizer>) {
        let sim = SimulatedEc::new(PortPair::default());
        let map = RegisterMap::legion_gen9();
        let ec = EcTransport::spawn(Box::new(sim.clone()), PortPair::default(), map.clone(), EcTimings::default())
            .unwrap();
        let opt = Optimizer::new(Arc::new(ec.clone()), &map, 100, ThermalHistory::new()).unwrap();
        (sim, ec, Arc::new(opt))
    }

    #[test]
    fn sampling_daemon_respects_interval_and_cools_hot_readings() {
        let (sim, _ec, opt) = optimizer();
        sim.set_register(0xE0, 101);
        let mut daemon = SamplingDaemon::new(Arc::clone(&opt), Duration::from_secs(1), true);
        let mut bus = Bus::new();

        let start = Instant::now();
        daemon.tick(start, &mut bus);
        assert!(opt.history().is_empty());

        daemon.tick(start + Duration::from_secs(2), &mut bus);
        assert_eq!(opt.history().len(), 1);
        assert_eq!(sim.register(0xB2), 100);
        assert_eq!(bus.pulses(), 2);
    }

    #[test]
    fn timer_passes_keep_history_at_one_sample_per_interval() {
        let sim = SimulatedEc::new(PortPair::default());
        let map = RegisterMap::legion_gen9();
        let ec = EcTransport::spawn(Box::new(sim), PortPair::default(), map.clone(), EcTimings::default())
            .unwrap();
        let opt = Arc::new(
            Optimizer::new(Arc::new(ec), &map, 100, ThermalHistory::new())
                .unwrap()
                .reuse_samples_within(Duration::from_secs(2)),
        );
        let mut sampler = SamplingDaemon::new(Arc::clone(&opt), Duration::from_secs(1), false);
        let mut passes = OptimizingDaemon::new(Arc::clone(&opt), WorkloadDetector::new(), Duration::from_secs(10));
        let mut bus = Bus::new();

        let start = Instant::now();
        for second in 1..=20 {
            let now = start + Duration::from_secs(second);
            sampler.tick(now, &mut bus);
            passes.tick(now, &mut bus);
        }
        assert_eq!(opt.history().len(), 20);
        assert!(opt.last_result().unwrap().success);
    }

    #[test]
    fn commands_run_passes_and_quit() {
        let (_sim, ec, opt) = optimizer();
        let (tx, rx) = mpsc::channel();
        let mut daemon = CommandDaemon::new(rx, Arc::clone(&opt), ec);
        let mut bus = Bus::new();

        tx.send("optimize gaming".to_string()).unwrap();
        tx.send("stats".to_string()).unwrap();
        daemon.tick(Instant::now(), &mut bus);
        assert_eq!(opt.last_result().unwrap().workload, WorkloadClass::Gaming);
        assert!(!bus.shutdown_requested());

        tx.send("quit".to_string()).unwrap();
        daemon.tick(Instant::now(), &mut bus);
        assert!(bus.shutdown_requested());
    }
}
