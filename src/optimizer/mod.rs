//! One end-to-end optimization pass: read, record, predict, decide, apply.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::ec::{ControlRegisters, EcOp, EcResult, RegisterIo, RegisterMap, SensorRegisters};
use crate::policy::{
    OptimizationPolicy, OptimizationSettings, PolicyDecision, WorkloadClass, CPU_LIMIT, CPU_PL1_RANGE,
    CPU_PL2_RANGE, GPU_LIMIT, GPU_TGP_RANGE,
};
use crate::predict::{ThermalForecast, TrendPredictor};
use crate::telemetry::{SensorReader, SensorSnapshot, ThermalHistory};

/// Fan target written by emergency cooling, in percent.
pub const EMERGENCY_FAN_TARGET: u8 = 100;

/// Registers written by one apply batch.
pub const APPLY_REGISTERS: usize = 5;

/// Outcome of one pass. A failed pass carries no settings or forecast.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub workload: WorkloadClass,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub settings: Option<OptimizationSettings>,
    pub forecast: Option<ThermalForecast>,
    pub throttle_risk: Option<f64>,
    pub recommendations: Vec<String>,
}

pub struct Optimizer {
    io: Arc<dyn RegisterIo>,
    reader: SensorReader,
    controls: ControlRegisters,
    history: ThermalHistory,
    predictor: TrendPredictor,
    policy: OptimizationPolicy,
    reuse_within: Option<Duration>,
    last: Mutex<Option<OptimizationResult>>,
}

impl Optimizer {
    /// Resolves every register the pass needs up front; an incomplete map
    /// fails here with `InvalidRegister`.
    pub fn new(
        io: Arc<dyn RegisterIo>,
        map: &RegisterMap,
        fan_rpm_scale: u32,
        history: ThermalHistory,
    ) -> EcResult<Self> {
        let sensors = SensorRegisters::resolve(map)?;
        let controls = ControlRegisters::resolve(map)?;
        Ok(Self {
            reader: SensorReader::new(Arc::clone(&io), sensors, fan_rpm_scale),
            io,
            controls,
            history,
            predictor: TrendPredictor::default(),
            policy: OptimizationPolicy,
            reuse_within: None,
            last: Mutex::new(None),
        })
    }

    /// Lets a pass reuse the newest history entry when it is younger than
    /// `window` instead of reading a fresh one. Set this when a separate
    /// sampler feeds the history, so passes do not add extra samples.
    pub fn reuse_samples_within(mut self, window: Duration) -> Self {
        self.reuse_within = Some(window);
        self
    }

    pub fn history(&self) -> &ThermalHistory {
        &self.history
    }

    /// Registers touched by a full pass: one snapshot plus the apply batch.
    pub fn registers_per_pass(&self) -> usize {
        self.reader.register_count() + APPLY_REGISTERS
    }

    /// Current readings, without recording them or running a pass.
    pub fn read_current_sensors(&self) -> EcResult<SensorSnapshot> {
        self.reader.read()
    }

    /// Reads a snapshot and appends it to the history.
    pub fn sample(&self) -> EcResult<SensorSnapshot> {
        let snapshot = self.reader.read()?;
        self.history.append(snapshot.clone());
        Ok(snapshot)
    }

    /// Never fails: hardware errors end up in the result.
    pub fn run_optimization_pass(&self, workload: WorkloadClass) -> OptimizationResult {
        let started_at = Utc::now();
        let result = match self.try_pass(workload) {
            Ok((forecast, decision)) => {
                info!(
                    "pass {}: risk {:.2}, PL1 {} W, PL2 {} W, TGP {} W, fan {:?}",
                    workload,
                    decision.throttle_risk,
                    decision.settings.cpu_pl1_w,
                    decision.settings.cpu_pl2_w,
                    decision.settings.gpu_tgp_w,
                    decision.settings.fan_profile
                );
                OptimizationResult {
                    workload,
                    started_at,
                    finished_at: Utc::now(),
                    success: true,
                    error: None,
                    recommendations: decision.settings.recommendations.clone(),
                    settings: Some(decision.settings),
                    forecast: Some(forecast),
                    throttle_risk: Some(decision.throttle_risk),
                }
            }
            Err(err) => {
                warn!("pass {} failed: {}", workload, err);
                OptimizationResult {
                    workload,
                    started_at,
                    finished_at: Utc::now(),
                    success: false,
                    error: Some(err.to_string()),
                    settings: None,
                    forecast: None,
                    throttle_risk: None,
                    recommendations: vec!["Optimization pass failed; will retry on the next tick".into()],
                }
            }
        };

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        result
    }

    /// The newest history entry, if a sampler recorded it recently enough.
    fn fresh_sample(&self) -> Option<SensorSnapshot> {
        let window = self.reuse_within?;
        self.history.latest().filter(|s| {
            // A timestamp ahead of the clock counts as fresh.
            (Utc::now() - s.captured_at)
                .to_std()
                .map_or(true, |age| age <= window)
        })
    }

    fn try_pass(&self, workload: WorkloadClass) -> EcResult<(ThermalForecast, PolicyDecision)> {
        if self.fresh_sample().is_none() {
            self.sample()?;
        }
        let forecast = self.predictor.predict(&self.history.recent(self.predictor.window()));
        let decision = self.policy.decide(workload, &forecast);
        self.apply(&decision.settings)?;
        Ok((forecast, decision))
    }

    /// Writes the settings as one batch so no other caller's writes land between them.
    fn apply(&self, settings: &OptimizationSettings) -> EcResult<()> {
        self.io.execute(self.apply_ops(settings).to_vec()).map(|_| ())
    }

    /// The apply batch. Power values are clamped to their safe ranges here
    /// as well, since settings can be built field by field.
    pub fn apply_ops(&self, settings: &OptimizationSettings) -> [EcOp; APPLY_REGISTERS] {
        let fan = settings.fan_curve_byte();
        let c = &self.controls;
        [
            EcOp::Write(c.cpu_pl1, watts_byte(CPU_PL1_RANGE.clamp(settings.cpu_pl1_w))),
            EcOp::Write(c.cpu_pl2, watts_byte(CPU_PL2_RANGE.clamp(settings.cpu_pl2_w))),
            EcOp::Write(c.gpu_tgp, watts_byte(GPU_TGP_RANGE.clamp(settings.gpu_tgp_w))),
            EcOp::Write(c.fan_curve_cpu, fan),
            EcOp::Write(c.fan_curve_gpu, fan),
        ]
    }

    /// Pins both fans to full speed when a live reading is at its hard limit.
    /// Returns whether cooling was engaged.
    pub fn emergency_cooling(&self, snapshot: &SensorSnapshot) -> EcResult<bool> {
        let cpu_hot = snapshot.cpu_package_c as f64 >= CPU_LIMIT.hard_limit_c;
        let gpu_hot = snapshot.gpu_c as f64 >= GPU_LIMIT.hard_limit_c;
        if !(cpu_hot || gpu_hot) {
            return Ok(false);
        }
        warn!(
            "emergency cooling: CPU {}°C, GPU {}°C",
            snapshot.cpu_package_c, snapshot.gpu_c
        );
        self.io.execute(vec![
            EcOp::Write(self.controls.fan1_target, EMERGENCY_FAN_TARGET),
            EcOp::Write(self.controls.fan2_target, EMERGENCY_FAN_TARGET),
        ])?;
        Ok(true)
    }

    pub fn last_result(&self) -> Option<OptimizationResult> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn watts_byte(watts: u32) -> u8 {
    watts.min(u8::MAX as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::sim::SimulatedEc;
    use crate::ec::{names, EcTimings, EcTransport, PortPair};
    use crate::policy::FanProfile;

    fn setup() -> (SimulatedEc, Optimizer) {
        let sim = SimulatedEc::new(PortPair::default());
        let map = RegisterMap::legion_gen9();
        let ec = EcTransport::spawn(Box::new(sim.clone()), PortPair::default(), map.clone(), EcTimings::default())
            .unwrap();
        let opt = Optimizer::new(Arc::new(ec), &map, 100, ThermalHistory::new()).unwrap();
        (sim, opt)
    }

    #[test]
    fn incomplete_map_fails_at_construction() {
        let sim = SimulatedEc::new(PortPair::default());
        let map = RegisterMap::new([(names::CPU_PACKAGE_TEMP, 0xE0)]);
        let ec = EcTransport::spawn(Box::new(sim), PortPair::default(), map.clone(), EcTimings::default()).unwrap();
        let err = Optimizer::new(Arc::new(ec), &map, 100, ThermalHistory::new()).err().unwrap();
        assert_eq!(err.kind(), "InvalidRegister");
    }

    #[test]
    fn successful_pass_applies_and_records() {
        let (sim, opt) = setup();
        sim.set_register(0xE0, 60);
        sim.set_register(0xE2, 55);

        let res = opt.run_optimization_pass(WorkloadClass::Productivity);
        assert!(res.success);
        assert!(res.error.is_none());
        assert_eq!(opt.history().len(), 1);
        let settings = res.settings.unwrap();
        assert_eq!(sim.register(0xC0), settings.cpu_pl1_w as u8);
        assert_eq!(sim.register(0xC4), settings.gpu_tgp_w as u8);
        assert_eq!(sim.register(0xB4), 43);
        assert!(opt.last_result().unwrap().success);
    }

    #[test]
    fn read_current_sensors_leaves_history_alone() {
        let (sim, opt) = setup();
        sim.set_register(0xE0, 77);
        assert_eq!(opt.read_current_sensors().unwrap().cpu_package_c, 77);
        assert!(opt.history().is_empty());
    }

    #[test]
    fn emergency_cooling_engages_only_at_hard_limits() {
        let (sim, opt) = setup();
        let now = Utc::now();
        assert!(!opt.emergency_cooling(&SensorSnapshot::with_temps(99, 86, now)).unwrap());
        assert!(sim.write_log().is_empty());

        assert!(opt.emergency_cooling(&SensorSnapshot::with_temps(70, 87, now)).unwrap());
        assert_eq!(sim.write_log(), vec![(0xB2, 100), (0xB3, 100)]);
    }

    #[test]
    fn hand_built_settings_are_clamped_before_writing() {
        let (sim, opt) = setup();
        let settings = OptimizationSettings {
            cpu_pl1_w: 200,
            cpu_pl2_w: 10,
            gpu_tgp_w: 250,
            fan_profile: FanProfile::Balanced,
            fan_curve_trim: 5.0,
            recommendations: Vec::new(),
        };
        opt.apply(&settings).unwrap();
        assert_eq!(
            sim.write_log(),
            vec![(0xC0, 55), (0xC1, 55), (0xC4, 140), (0xB4, 72), (0xB5, 72)]
        );
    }

    #[test]
    fn pass_reuses_a_fresh_sample_from_the_sampler() {
        let (sim, opt) = setup();
        let opt = opt.reuse_samples_within(Duration::from_secs(2));
        sim.set_register(0xE0, 64);

        opt.sample().unwrap();
        assert!(opt.run_optimization_pass(WorkloadClass::Gaming).success);
        assert_eq!(opt.history().len(), 1);

        // Stale entries are not reused.
        opt.history().append(SensorSnapshot::with_temps(64, 50, Utc::now() - chrono::Duration::seconds(10)));
        assert!(opt.run_optimization_pass(WorkloadClass::Gaming).success);
        assert_eq!(opt.history().len(), 3);
    }

    #[test]
    fn registers_per_pass_counts_snapshot_and_apply_batch() {
        let (_sim, opt) = setup();
        let settings = OptimizationSettings::new(45, 115, 80, FanProfile::Balanced);
        assert_eq!(opt.registers_per_pass(), 10 + opt.apply_ops(&settings).len());
    }

    #[test]
    fn denied_access_yields_failed_result() {
        let (sim, opt) = setup();
        sim.deny_access(true);
        let res = opt.run_optimization_pass(WorkloadClass::Balanced);
        assert!(!res.success);
        assert!(res.settings.is_none());
        assert!(res.forecast.is_none());
        assert!(res.error.unwrap().contains("HardwareAccessDenied"));
        assert!(opt.history().is_empty());
    }
}
