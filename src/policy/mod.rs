//! Workload-keyed power and fan policy.
//!
//! Gaming, Productivity and AI workloads get fixed profiles tuned for
//! their duty cycle. Balanced is the only forecast-adaptive class: it
//! steps power down or up according to the throttle risk of the forecast.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::predict::ThermalForecast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadClass {
    Gaming,
    Productivity,
    AiWorkload,
    Balanced,
}

impl WorkloadClass {
    pub const ALL: [WorkloadClass; 4] = [
        WorkloadClass::Gaming,
        WorkloadClass::Productivity,
        WorkloadClass::AiWorkload,
        WorkloadClass::Balanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadClass::Gaming => "gaming",
            WorkloadClass::Productivity => "productivity",
            WorkloadClass::AiWorkload => "ai_workload",
            WorkloadClass::Balanced => "balanced",
        }
    }
}

impl fmt::Display for WorkloadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaming" => Ok(WorkloadClass::Gaming),
            "productivity" => Ok(WorkloadClass::Productivity),
            "ai" | "ai_workload" | "aiworkload" => Ok(WorkloadClass::AiWorkload),
            "balanced" => Ok(WorkloadClass::Balanced),
            other => Err(format!("unknown workload class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanProfile {
    Quiet,
    Balanced,
    Aggressive,
}

impl FanProfile {
    /// Fan-curve selector byte understood by the controller.
    pub fn curve_byte(&self) -> u8 {
        match self {
            FanProfile::Quiet => 0x20,
            FanProfile::Balanced => 0x30,
            FanProfile::Aggressive => 0x40,
        }
    }
}

/// Scales a fan-curve byte, rounding to the nearest integer and saturating at the byte range.
pub fn scale_fan_curve(byte: u8, factor: f64) -> u8 {
    (byte as f64 * factor).round().clamp(0.0, 255.0) as u8
}

/// Inclusive range of watts the platform firmware accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeRange {
    pub min_w: u32,
    pub max_w: u32,
}

impl SafeRange {
    pub fn clamp(&self, watts: u32) -> u32 {
        watts.clamp(self.min_w, self.max_w)
    }
}

pub const CPU_PL1_RANGE: SafeRange = SafeRange { min_w: 15, max_w: 55 };
pub const CPU_PL2_RANGE: SafeRange = SafeRange { min_w: 55, max_w: 140 };
pub const GPU_TGP_RANGE: SafeRange = SafeRange { min_w: 60, max_w: 140 };

/// Bounds on the fan-curve multiplier.
pub const FAN_TRIM_MIN: f64 = 0.5;
pub const FAN_TRIM_MAX: f64 = 1.5;

/// Non-finite trims fall back to 1.0.
fn bounded_trim(trim: f64) -> f64 {
    if trim.is_finite() {
        trim.clamp(FAN_TRIM_MIN, FAN_TRIM_MAX)
    } else {
        1.0
    }
}

/// Hardware configuration handed to the apply step. Power values are
/// always inside their safe range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationSettings {
    pub cpu_pl1_w: u32,
    pub cpu_pl2_w: u32,
    pub gpu_tgp_w: u32,
    pub fan_profile: FanProfile,
    /// Multiplier applied to the fan-curve byte; 1.0 leaves it untouched.
    pub fan_curve_trim: f64,
    pub recommendations: Vec<String>,
}

impl OptimizationSettings {
    /// Out-of-range requests are clamped silently, as the firmware does.
    pub fn new(cpu_pl1_w: u32, cpu_pl2_w: u32, gpu_tgp_w: u32, fan_profile: FanProfile) -> Self {
        Self {
            cpu_pl1_w: CPU_PL1_RANGE.clamp(cpu_pl1_w),
            cpu_pl2_w: CPU_PL2_RANGE.clamp(cpu_pl2_w),
            gpu_tgp_w: GPU_TGP_RANGE.clamp(gpu_tgp_w),
            fan_profile,
            fan_curve_trim: 1.0,
            recommendations: Vec::new(),
        }
    }

    pub fn with_fan_trim(mut self, trim: f64) -> Self {
        self.fan_curve_trim = bounded_trim(trim);
        self
    }

    pub fn fan_curve_byte(&self) -> u8 {
        scale_fan_curve(self.fan_profile.curve_byte(), bounded_trim(self.fan_curve_trim))
    }
}

/// Warning threshold and hard limit for one temperature channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLimit {
    pub warning_c: f64,
    pub hard_limit_c: f64,
}

impl ChannelLimit {
    /// 0 below the warning threshold, 1 at or above the hard limit, linear between.
    pub fn risk(&self, temp_c: f64) -> f64 {
        if temp_c >= self.hard_limit_c {
            1.0
        } else if temp_c <= self.warning_c {
            0.0
        } else {
            (temp_c - self.warning_c) / (self.hard_limit_c - self.warning_c)
        }
    }
}

pub const CPU_LIMIT: ChannelLimit = ChannelLimit {
    warning_c: 95.0,
    hard_limit_c: 100.0,
};
pub const GPU_LIMIT: ChannelLimit = ChannelLimit {
    warning_c: 82.0,
    hard_limit_c: 87.0,
};

/// The worst channel governs: one channel at its limit is full risk.
pub fn throttle_risk(forecast: &ThermalForecast) -> f64 {
    CPU_LIMIT.risk(forecast.cpu_c).max(GPU_LIMIT.risk(forecast.gpu_c))
}

pub const HIGH_RISK: f64 = 0.7;
pub const LOW_RISK: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub settings: OptimizationSettings,
    pub throttle_risk: f64,
}

/// Maps a workload class and forecast to settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizationPolicy;

impl OptimizationPolicy {
    pub fn decide(&self, workload: WorkloadClass, forecast: &ThermalForecast) -> PolicyDecision {
        let risk = throttle_risk(forecast);
        let mut settings = match workload {
            WorkloadClass::Gaming => {
                let mut s = OptimizationSettings::new(55, 140, 140, FanProfile::Aggressive);
                s.recommendations
                    .push("Gaming profile: full GPU budget with aggressive cooling".into());
                s
            }
            WorkloadClass::Productivity => {
                let mut s = OptimizationSettings::new(45, 115, 80, FanProfile::Balanced).with_fan_trim(0.9);
                s.recommendations
                    .push("Productivity profile: CPU-weighted power, fan curve trimmed for acoustics".into());
                s
            }
            WorkloadClass::AiWorkload => {
                let mut s = OptimizationSettings::new(55, 115, 140, FanProfile::Aggressive);
                s.recommendations
                    .push("AI workload profile: sustained GPU budget for long compute runs".into());
                s
            }
            WorkloadClass::Balanced => balanced(risk),
        };

        settings.recommendations.extend(forecast_notes(forecast, risk));
        PolicyDecision {
            settings,
            throttle_risk: risk,
        }
    }
}

fn balanced(risk: f64) -> OptimizationSettings {
    if risk >= HIGH_RISK {
        let mut s = OptimizationSettings::new(35, 90, 80, FanProfile::Aggressive);
        s.recommendations.push(format!(
            "Throttle risk {:.2}: reducing power limits and raising fan speed",
            risk
        ));
        s
    } else if risk <= LOW_RISK {
        let mut s = OptimizationSettings::new(55, 135, 125, FanProfile::Balanced);
        s.recommendations.push(format!(
            "Throttle risk {:.2}: thermal headroom available, raising power limits",
            risk
        ));
        s
    } else {
        let mut s = OptimizationSettings::new(45, 115, 115, FanProfile::Balanced);
        s.recommendations.push(format!(
            "Throttle risk {:.2}: holding mid-range power limits",
            risk
        ));
        s
    }
}

fn forecast_notes(forecast: &ThermalForecast, risk: f64) -> Vec<String> {
    let mut notes = Vec::new();
    if forecast.is_default() {
        notes.push("Not enough sensor history for a trend; using the default forecast".into());
    } else if forecast.confidence < 0.5 {
        notes.push(format!(
            "Forecast confidence {:.2} is low; readings are noisy",
            forecast.confidence
        ));
    }
    if forecast.cpu_c >= CPU_LIMIT.warning_c {
        notes.push(format!(
            "CPU forecast {:.0}°C is past its {:.0}°C warning threshold",
            forecast.cpu_c, CPU_LIMIT.warning_c
        ));
    }
    if forecast.gpu_c >= GPU_LIMIT.warning_c {
        notes.push(format!(
            "GPU forecast {:.0}°C is past its {:.0}°C warning threshold",
            forecast.gpu_c, GPU_LIMIT.warning_c
        ));
    }
    if risk >= 1.0 {
        notes.push("Throttling expected within the forecast horizon".into());
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(cpu: f64, gpu: f64) -> ThermalForecast {
        ThermalForecast {
            cpu_c: cpu,
            gpu_c: gpu,
            gpu_hotspot_c: gpu + 8.0,
            vrm_c: 60.0,
            confidence: 0.9,
            horizon_secs: 60.0,
        }
    }

    #[test]
    fn risk_is_zero_below_warnings_and_one_at_limits() {
        assert_eq!(throttle_risk(&forecast(94.9, 81.9)), 0.0);
        assert_eq!(throttle_risk(&forecast(40.0, 40.0)), 0.0);
        assert_eq!(throttle_risk(&forecast(100.0, 40.0)), 1.0);
        assert_eq!(throttle_risk(&forecast(40.0, 87.0)), 1.0);
        assert_eq!(throttle_risk(&forecast(130.0, 99.0)), 1.0);
        assert!((throttle_risk(&forecast(97.5, 40.0)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn worst_channel_governs() {
        // A cool CPU does not dilute a GPU at its limit.
        assert_eq!(throttle_risk(&forecast(30.0, 90.0)), 1.0);
        let r = throttle_risk(&forecast(96.0, 86.0));
        assert!((r - 0.8).abs() < 1e-9);
    }

    #[test]
    fn risk_is_monotone_in_each_channel() {
        for gpu in [40.0, 83.0, 86.5, 95.0] {
            let mut prev = 0.0;
            let mut cpu = 80.0;
            while cpu <= 110.0 {
                let r = throttle_risk(&forecast(cpu, gpu));
                assert!(r >= prev, "cpu={} gpu={}", cpu, gpu);
                prev = r;
                cpu += 0.25;
            }
        }
        for cpu in [40.0, 96.0, 99.9] {
            let mut prev = 0.0;
            let mut gpu = 70.0;
            while gpu <= 95.0 {
                let r = throttle_risk(&forecast(cpu, gpu));
                assert!(r >= prev, "cpu={} gpu={}", cpu, gpu);
                prev = r;
                gpu += 0.25;
            }
        }
    }

    #[test]
    fn out_of_range_requests_are_clamped() {
        let s = OptimizationSettings::new(200, 10, 500, FanProfile::Balanced);
        assert_eq!(s.cpu_pl1_w, 55);
        assert_eq!(s.cpu_pl2_w, 55);
        assert_eq!(s.gpu_tgp_w, 140);
        let s = OptimizationSettings::new(0, 0, 0, FanProfile::Quiet);
        assert_eq!((s.cpu_pl1_w, s.cpu_pl2_w, s.gpu_tgp_w), (15, 55, 60));
    }

    #[test]
    fn fixed_profiles_ignore_the_forecast() {
        let p = OptimizationPolicy;
        for w in [WorkloadClass::Gaming, WorkloadClass::Productivity, WorkloadClass::AiWorkload] {
            let cool = p.decide(w, &forecast(50.0, 50.0)).settings;
            let hot = p.decide(w, &forecast(110.0, 95.0)).settings;
            assert_eq!(
                (cool.cpu_pl1_w, cool.cpu_pl2_w, cool.gpu_tgp_w, cool.fan_profile),
                (hot.cpu_pl1_w, hot.cpu_pl2_w, hot.gpu_tgp_w, hot.fan_profile),
            );
        }
    }

    #[test]
    fn balanced_steps_with_risk() {
        let p = OptimizationPolicy;
        let hot = p.decide(WorkloadClass::Balanced, &forecast(99.0, 60.0));
        let mid = p.decide(WorkloadClass::Balanced, &forecast(97.5, 60.0));
        let cool = p.decide(WorkloadClass::Balanced, &forecast(70.0, 60.0));

        assert!(hot.throttle_risk >= HIGH_RISK);
        assert_eq!(hot.settings.fan_profile, FanProfile::Aggressive);
        assert!(hot.settings.cpu_pl1_w < mid.settings.cpu_pl1_w);
        assert!(hot.settings.gpu_tgp_w < mid.settings.gpu_tgp_w);
        assert!(mid.settings.cpu_pl2_w < cool.settings.cpu_pl2_w);
        assert_eq!(cool.settings.fan_profile, FanProfile::Balanced);
    }

    #[test]
    fn fan_curve_scaling_rounds_to_nearest() {
        assert_eq!(scale_fan_curve(0x40, 0.9), 58);
        assert_eq!(scale_fan_curve(0x30, 0.9), 43);
        assert_eq!(scale_fan_curve(0xF0, 2.0), 255);
        let s = OptimizationPolicy
            .decide(WorkloadClass::Productivity, &ThermalForecast::DEFAULT)
            .settings;
        assert_eq!(s.fan_curve_byte(), 43);
    }

    #[test]
    fn fan_trim_is_bounded() {
        let wild = OptimizationSettings::new(45, 115, 80, FanProfile::Aggressive).with_fan_trim(3.0);
        assert_eq!(wild.fan_curve_trim, FAN_TRIM_MAX);
        assert_eq!(wild.fan_curve_byte(), 96);

        let mut raw = OptimizationSettings::new(45, 115, 80, FanProfile::Balanced);
        raw.fan_curve_trim = f64::NAN;
        assert_eq!(raw.fan_curve_byte(), 0x30);
        raw.fan_curve_trim = 0.0;
        assert_eq!(raw.fan_curve_byte(), 24);
    }

    #[test]
    fn workload_names_parse() {
        assert_eq!("Gaming".parse::<WorkloadClass>().unwrap(), WorkloadClass::Gaming);
        assert_eq!("ai".parse::<WorkloadClass>().unwrap(), WorkloadClass::AiWorkload);
        for w in WorkloadClass::ALL {
            assert_eq!(w.as_str().parse::<WorkloadClass>().unwrap(), w);
        }
        assert!("idle".parse::<WorkloadClass>().is_err());
    }
}
