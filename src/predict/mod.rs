//! Short-horizon temperature forecasts by linear trend extrapolation.

use serde::Serialize;

use crate::telemetry::SensorSnapshot;

/// Samples the regression looks at.
pub const TREND_WINDOW: usize = 30;
/// Seconds ahead the forecast reaches (one sample per second).
pub const HORIZON_SECS: f64 = 60.0;
/// Below this many samples the predictor falls back to the default forecast.
pub const MIN_SAMPLES: usize = 5;
/// Below this many samples confidence is pinned low.
pub const CONFIDENT_SAMPLES: usize = 10;

const HOTSPOT_SLOPE_FACTOR: f64 = 1.2;
const VRM_SLOPE_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThermalForecast {
    pub cpu_c: f64,
    pub gpu_c: f64,
    pub gpu_hotspot_c: f64,
    pub vrm_c: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub horizon_secs: f64,
}

impl ThermalForecast {
    /// Used when the history is too short to fit a trend.
    pub const DEFAULT: ThermalForecast = ThermalForecast {
        cpu_c: 70.0,
        gpu_c: 65.0,
        gpu_hotspot_c: 75.0,
        vrm_c: 65.0,
        confidence: 0.5,
        horizon_secs: HORIZON_SECS,
    };

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPredictor {
    window: usize,
    horizon_secs: f64,
}

impl Default for TrendPredictor {
    fn default() -> Self {
        Self {
            window: TREND_WINDOW,
            horizon_secs: HORIZON_SECS,
        }
    }
}

impl TrendPredictor {
    pub fn window(&self) -> usize {
        self.window
    }

    /// `history` is oldest first; only its last `window` entries are used.
    pub fn predict(&self, history: &[SensorSnapshot]) -> ThermalForecast {
        if history.len() < MIN_SAMPLES {
            return ThermalForecast::DEFAULT;
        }
        let recent = &history[history.len().saturating_sub(self.window)..];

        let cpu: Vec<f64> = recent.iter().map(|s| s.cpu_package_c as f64).collect();
        let gpu: Vec<f64> = recent.iter().map(|s| s.gpu_c as f64).collect();
        let hotspot_last = recent.last().map_or(0.0, |s| s.gpu_hotspot_c as f64);
        let vrm_last = recent.last().map_or(0.0, |s| s.vrm_c as f64);

        let cpu_slope = ols_slope(&cpu);
        let gpu_slope = ols_slope(&gpu);
        let vrm_slope = (cpu_slope + gpu_slope) / 2.0 * VRM_SLOPE_FACTOR;

        let ahead = |last: f64, slope: f64| (last + slope * self.horizon_secs).max(0.0);
        let last = |v: &[f64]| v.last().copied().unwrap_or(0.0);

        ThermalForecast {
            cpu_c: ahead(last(&cpu), cpu_slope),
            gpu_c: ahead(last(&gpu), gpu_slope),
            gpu_hotspot_c: ahead(hotspot_last, gpu_slope * HOTSPOT_SLOPE_FACTOR),
            vrm_c: ahead(vrm_last, vrm_slope),
            confidence: confidence(&cpu, &gpu),
            horizon_secs: self.horizon_secs,
        }
    }
}

/// Least-squares slope of `ys` against sample index.
fn ols_slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    if ys.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    if sxx == 0.0 {
        0.0
    } else {
        sxy / sxx
    }
}

fn variance(ys: &[f64]) -> f64 {
    if ys.is_empty() {
        return 0.0;
    }
    let n = ys.len() as f64;
    let mean = ys.iter().sum::<f64>() / n;
    ys.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n
}

/// High variance means a straight line is a poor local fit.
fn confidence(cpu: &[f64], gpu: &[f64]) -> f64 {
    if cpu.len() < CONFIDENT_SAMPLES {
        return 0.3;
    }
    let avg_var = (variance(cpu) + variance(gpu)) / 2.0;
    (1.0 - avg_var / 100.0).clamp(0.1, 1.0)
}
