//! Daemon configuration, loaded once from JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ec::sim::SimLevel;
use crate::ec::{ControlRegisters, EcTimings, PortPair, RegisterMap, SensorRegisters};
use crate::telemetry::DEFAULT_FAN_RPM_SCALE;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "LEGION_THERMALD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("register '{name}': invalid address '{value}'")]
    BadAddress { name: String, value: String },
    #[error("register table incomplete: {0}")]
    MissingRegister(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    Simulated,
    DevPort,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EcConfig {
    pub backend: Backend,
    #[serde(flatten)]
    pub ports: PortSettings,
    pub timings: EcTimings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub command_port: u16,
    pub data_port: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        let pair = PortPair::default();
        Self {
            command_port: pair.command,
            data_port: pair.data,
        }
    }
}

impl PortSettings {
    pub fn pair(&self) -> PortPair {
        PortPair {
            command: self.command_port,
            data: self.data_port,
        }
    }
}

/// A register address written as a JSON number or a `"0xE0"` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAddress {
    Number(u8),
    Text(String),
}

impl RawAddress {
    fn parse(&self) -> Option<u8> {
        match self {
            RawAddress::Number(n) => Some(*n),
            RawAddress::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u8::from_str_radix(hex, 16).ok(),
                    None => s.parse().ok(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ec: EcConfig,
    /// Name → address. Empty means the built-in Legion Gen 9 table.
    pub registers: BTreeMap<String, RawAddress>,
    pub fan_rpm_scale: u32,
    pub sample_interval_ms: u64,
    pub optimize_interval_ms: u64,
    pub http_addr: Option<String>,
    pub simulation: SimLevel,
    pub emergency_cooling: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ec: EcConfig::default(),
            registers: BTreeMap::new(),
            fan_rpm_scale: DEFAULT_FAN_RPM_SCALE,
            sample_interval_ms: 1000,
            optimize_interval_ms: 10_000,
            http_addr: Some("127.0.0.1:8787".into()),
            simulation: SimLevel::default(),
            emergency_cooling: true,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Loads the file named by `LEGION_THERMALD_CONFIG`, or the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Builds the validated register map. Every name the core reads or
    /// writes must be present.
    pub fn register_map(&self) -> Result<RegisterMap, ConfigError> {
        let map = if self.registers.is_empty() {
            RegisterMap::legion_gen9()
        } else {
            let mut entries = Vec::with_capacity(self.registers.len());
            for (name, raw) in &self.registers {
                let addr = raw.parse().ok_or_else(|| ConfigError::BadAddress {
                    name: name.clone(),
                    value: match raw {
                        RawAddress::Number(n) => n.to_string(),
                        RawAddress::Text(s) => s.clone(),
                    },
                })?;
                entries.push((name.clone(), addr));
            }
            RegisterMap::new(entries)
        };

        SensorRegisters::resolve(&map)
            .and(ControlRegisters::resolve(&map))
            .map_err(|e| ConfigError::MissingRegister(e.to_string()))?;
        Ok(map)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn optimize_interval(&self) -> Duration {
        Duration::from_millis(self.optimize_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::names;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.ec.backend, Backend::Simulated);
        assert_eq!(cfg.ec.ports.pair(), PortPair::default());
        assert_eq!(cfg.ec.timings, EcTimings::default());
        assert_eq!(cfg.fan_rpm_scale, 100);
        assert_eq!(cfg.register_map().unwrap(), RegisterMap::legion_gen9());
    }

    #[test]
    fn parses_backend_timings_and_hex_addresses() {
        let mut table = String::new();
        for (name, addr) in RegisterMap::legion_gen9().iter() {
            if name == names::CPU_PACKAGE_TEMP {
                table.push_str(&format!("\"{}\": \"0x{:02X}\",", name, 0xF0));
            } else {
                table.push_str(&format!("\"{}\": {},", name, addr));
            }
        }
        table.pop();
        let json = format!(
            r#"{{"ec": {{"backend": "dev-port", "command_port": 102, "timings": {{"timeout_ms": 250}}}},
                "registers": {{{}}}, "simulation": "high"}}"#,
            table
        );
        let cfg = Config::from_json(&json).unwrap();
        assert_eq!(cfg.ec.backend, Backend::DevPort);
        assert_eq!(cfg.ec.ports.command_port, 102);
        assert_eq!(cfg.ec.timings.timeout_ms, 250);
        assert_eq!(cfg.ec.timings.retries, 2);
        assert_eq!(cfg.simulation, SimLevel::High);
        assert_eq!(cfg.register_map().unwrap().resolve(names::CPU_PACKAGE_TEMP).unwrap(), 0xF0);
    }

    #[test]
    fn incomplete_table_is_rejected() {
        let cfg = Config::from_json(r#"{"registers": {"cpu_package_temp": "0xE0"}}"#).unwrap();
        assert!(matches!(cfg.register_map(), Err(ConfigError::MissingRegister(_))));
    }

    #[test]
    fn bad_address_literal_is_rejected() {
        let cfg = Config::from_json(r#"{"registers": {"cpu_package_temp": "0xZZ"}}"#).unwrap();
        assert!(matches!(cfg.register_map(), Err(ConfigError::BadAddress { .. })));
    }
}
