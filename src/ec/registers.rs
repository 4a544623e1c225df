//! Symbolic register table.
//!
//! A `RegisterMap` is built once from configuration and never mutated.
//! Components that address the controller resolve the names they need
//! into typed register sets at construction time, so a table that omits a
//! required name fails at startup instead of on the first read.

use std::collections::{BTreeMap, BTreeSet};

use super::error::{EcError, EcResult};

/// Register names the core understands.
pub mod names {
    pub const CPU_PACKAGE_TEMP: &str = "cpu_package_temp";
    pub const GPU_TEMP: &str = "gpu_temp";
    pub const GPU_HOTSPOT_TEMP: &str = "gpu_hotspot_temp";
    pub const GPU_MEMORY_TEMP: &str = "gpu_memory_temp";
    pub const VRM_TEMP: &str = "vrm_temp";
    pub const STORAGE_TEMP: &str = "storage_temp";
    pub const RAM_TEMP: &str = "ram_temp";
    pub const BATTERY_TEMP: &str = "battery_temp";
    pub const FAN1_SPEED: &str = "fan1_speed";
    pub const FAN2_SPEED: &str = "fan2_speed";

    pub const CPU_PL1: &str = "cpu_pl1";
    pub const CPU_PL2: &str = "cpu_pl2";
    pub const GPU_TGP: &str = "gpu_tgp";
    pub const FAN_CURVE_CPU: &str = "fan_curve_cpu";
    pub const FAN_CURVE_GPU: &str = "fan_curve_gpu";
    pub const FAN1_TARGET: &str = "fan1_target";
    pub const FAN2_TARGET: &str = "fan2_target";
}

/// Immutable name → address table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    by_name: BTreeMap<String, u8>,
    addresses: BTreeSet<u8>,
}

impl RegisterMap {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        let by_name: BTreeMap<String, u8> =
            entries.into_iter().map(|(name, addr)| (name.into(), addr)).collect();
        let addresses = by_name.values().copied().collect();
        Self { by_name, addresses }
    }

    /// Register table of the Legion Gen 9 (16IRX9) controller.
    pub fn legion_gen9() -> Self {
        use names::*;
        Self::new([
            (FAN1_SPEED, 0xB0),
            (FAN2_SPEED, 0xB1),
            (FAN1_TARGET, 0xB2),
            (FAN2_TARGET, 0xB3),
            (FAN_CURVE_CPU, 0xB4),
            (FAN_CURVE_GPU, 0xB5),
            (CPU_PL1, 0xC0),
            (CPU_PL2, 0xC1),
            (GPU_TGP, 0xC4),
            (CPU_PACKAGE_TEMP, 0xE0),
            (GPU_TEMP, 0xE2),
            (GPU_HOTSPOT_TEMP, 0xE3),
            (GPU_MEMORY_TEMP, 0xE4),
            (VRM_TEMP, 0xE5),
            (STORAGE_TEMP, 0xE7),
            (RAM_TEMP, 0xE8),
            (BATTERY_TEMP, 0xE9),
        ])
    }

    pub fn resolve(&self, name: &str) -> EcResult<u8> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EcError::InvalidRegister(format!("'{}' is not in the register map", name)))
    }

    pub fn contains_address(&self, address: u8) -> bool {
        self.addresses.contains(&address)
    }

    pub fn name_of(&self, address: u8) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, a)| **a == address)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.by_name.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

/// Addresses read to assemble one sensor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorRegisters {
    pub cpu_package_temp: u8,
    pub gpu_temp: u8,
    pub gpu_hotspot_temp: u8,
    pub gpu_memory_temp: u8,
    pub vrm_temp: u8,
    pub storage_temp: u8,
    pub ram_temp: u8,
    pub battery_temp: u8,
    pub fan1_speed: u8,
    pub fan2_speed: u8,
}

impl SensorRegisters {
    pub fn resolve(map: &RegisterMap) -> EcResult<Self> {
        use names::*;
        Ok(Self {
            cpu_package_temp: map.resolve(CPU_PACKAGE_TEMP)?,
            gpu_temp: map.resolve(GPU_TEMP)?,
            gpu_hotspot_temp: map.resolve(GPU_HOTSPOT_TEMP)?,
            gpu_memory_temp: map.resolve(GPU_MEMORY_TEMP)?,
            vrm_temp: map.resolve(VRM_TEMP)?,
            storage_temp: map.resolve(STORAGE_TEMP)?,
            ram_temp: map.resolve(RAM_TEMP)?,
            battery_temp: map.resolve(BATTERY_TEMP)?,
            fan1_speed: map.resolve(FAN1_SPEED)?,
            fan2_speed: map.resolve(FAN2_SPEED)?,
        })
    }

    /// Read order used by the snapshot reader.
    pub fn in_read_order(&self) -> [u8; 10] {
        [
            self.cpu_package_temp,
            self.gpu_temp,
            self.gpu_hotspot_temp,
            self.gpu_memory_temp,
            self.vrm_temp,
            self.storage_temp,
            self.ram_temp,
            self.battery_temp,
            self.fan1_speed,
            self.fan2_speed,
        ]
    }
}

/// Addresses written when applying settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegisters {
    pub cpu_pl1: u8,
    pub cpu_pl2: u8,
    pub gpu_tgp: u8,
    pub fan_curve_cpu: u8,
    pub fan_curve_gpu: u8,
    pub fan1_target: u8,
    pub fan2_target: u8,
}

impl ControlRegisters {
    pub fn resolve(map: &RegisterMap) -> EcResult<Self> {
        use names::*;
        Ok(Self {
            cpu_pl1: map.resolve(CPU_PL1)?,
            cpu_pl2: map.resolve(CPU_PL2)?,
            gpu_tgp: map.resolve(GPU_TGP)?,
            fan_curve_cpu: map.resolve(FAN_CURVE_CPU)?,
            fan_curve_gpu: map.resolve(FAN_CURVE_GPU)?,
            fan1_target: map.resolve(FAN1_TARGET)?,
            fan2_target: map.resolve(FAN2_TARGET)?,
        })
    }
}
