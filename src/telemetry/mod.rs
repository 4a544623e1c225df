//! Sensor snapshots and the rolling history they feed.
//!
//! A snapshot is assembled from one batch of register reads. The batch
//! runs under the transport's lock, so no other caller's traffic lands in
//! the middle of it, but the registers are still sampled one after another:
//! the readings can be skewed by a few register-read latencies and should
//! be treated as one best-effort instant, not an atomic capture.

mod history;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ec::{EcOp, EcResult, RegisterIo, SensorRegisters};

pub use history::{ThermalHistory, HISTORY_CAPACITY};

/// Default fan scale: the controller reports fan speed in units of 100 RPM.
pub const DEFAULT_FAN_RPM_SCALE: u32 = 100;

/// Temperatures in °C as reported by single-byte registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorSnapshot {
    pub cpu_package_c: u8,
    pub gpu_c: u8,
    pub gpu_hotspot_c: u8,
    pub gpu_memory_c: u8,
    pub vrm_c: u8,
    pub storage_c: u8,
    pub ram_c: u8,
    pub battery_c: u8,
    pub fan1_rpm: u32,
    pub fan2_rpm: u32,
    pub captured_at: DateTime<Utc>,
}

impl SensorSnapshot {
    /// A snapshot with only the CPU and GPU channels populated.
    pub fn with_temps(cpu_package_c: u8, gpu_c: u8, captured_at: DateTime<Utc>) -> Self {
        Self {
            cpu_package_c,
            gpu_c,
            gpu_hotspot_c: gpu_c,
            gpu_memory_c: 0,
            vrm_c: 0,
            storage_c: 0,
            ram_c: 0,
            battery_c: 0,
            fan1_rpm: 0,
            fan2_rpm: 0,
            captured_at,
        }
    }
}

/// Reads one snapshot per call through the register transport.
#[derive(Clone)]
pub struct SensorReader {
    io: Arc<dyn RegisterIo>,
    registers: SensorRegisters,
    fan_rpm_scale: u32,
}

impl SensorReader {
    pub fn new(io: Arc<dyn RegisterIo>, registers: SensorRegisters, fan_rpm_scale: u32) -> Self {
        Self {
            io,
            registers,
            fan_rpm_scale,
        }
    }

    /// Number of registers a snapshot touches.
    pub fn register_count(&self) -> usize {
        self.registers.in_read_order().len()
    }

    /// Any failed register read fails the whole snapshot.
    pub fn read(&self) -> EcResult<SensorSnapshot> {
        let ops = self
            .registers
            .in_read_order()
            .iter()
            .map(|&address| EcOp::Read(address))
            .collect();
        let v = self.io.execute(ops)?;
        let byte = |i: usize| v.get(i).copied().unwrap_or(0);

        Ok(SensorSnapshot {
            cpu_package_c: byte(0),
            gpu_c: byte(1),
            gpu_hotspot_c: byte(2),
            gpu_memory_c: byte(3),
            vrm_c: byte(4),
            storage_c: byte(5),
            ram_c: byte(6),
            battery_c: byte(7),
            fan1_rpm: byte(8) as u32 * self.fan_rpm_scale,
            fan2_rpm: byte(9) as u32 * self.fan_rpm_scale,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::sim::SimulatedEc;
    use crate::ec::{EcTimings, EcTransport, PortPair, RegisterMap};

    #[test]
    fn reader_assembles_scaled_snapshot() {
        let sim = SimulatedEc::new(PortPair::default());
        sim.set_register(0xE0, 72);
        sim.set_register(0xE2, 64);
        sim.set_register(0xE3, 70);
        sim.set_register(0xE9, 31);
        sim.set_register(0xB0, 42);
        sim.set_register(0xB1, 38);

        let map = RegisterMap::legion_gen9();
        let registers = SensorRegisters::resolve(&map).unwrap();
        let ec = EcTransport::spawn(Box::new(sim), PortPair::default(), map, EcTimings::default()).unwrap();
        let reader = SensorReader::new(Arc::new(ec), registers, DEFAULT_FAN_RPM_SCALE);

        let snap = reader.read().unwrap();
        assert_eq!(snap.cpu_package_c, 72);
        assert_eq!(snap.gpu_c, 64);
        assert_eq!(snap.gpu_hotspot_c, 70);
        assert_eq!(snap.battery_c, 31);
        assert_eq!(snap.fan1_rpm, 4200);
        assert_eq!(snap.fan2_rpm, 3800);
    }

    #[test]
    fn failed_read_yields_no_snapshot() {
        let sim = SimulatedEc::new(PortPair::default());
        sim.deny_access(true);
        let map = RegisterMap::legion_gen9();
        let registers = SensorRegisters::resolve(&map).unwrap();
        let timings = EcTimings {
            retries: 0,
            ..EcTimings::default()
        };
        let ec = EcTransport::spawn(Box::new(sim), PortPair::default(), map, timings).unwrap();
        let reader = SensorReader::new(Arc::new(ec), registers, DEFAULT_FAN_RPM_SCALE);

        assert_eq!(reader.read().unwrap_err().kind(), "HardwareAccessDenied");
    }
}
