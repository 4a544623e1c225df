//! Workload classification from the running process list, plus the
//! platform facts gathered once at startup.

use std::collections::VecDeque;

use serde::Serialize;
use sysinfo::System;

use crate::policy::WorkloadClass;

/// Detections kept for the majority vote.
const VOTE_WINDOW: usize = 5;

const GAMING: &[&str] = &[
    "steam", "origin", "uplay", "epicgameslauncher", "gog", "battle.net", "lutris", "heroic",
    "gamescope", "dota2", "csgo", "cs2", "valorant", "leagueoflegends", "overwatch",
    "cyberpunk2077", "witcher3", "gta5", "wine64-preloader",
];
const PRODUCTIVITY: &[&str] = &[
    "chrome", "firefox", "code", "pycharm", "intellij", "eclipse", "libreoffice", "gimp",
    "blender", "kdenlive", "obs", "gcc", "make", "cmake", "rustc", "cargo", "node", "npm",
];
const AI: &[&str] = &[
    "python", "jupyter", "tensorboard", "pytorch", "tensorflow", "ollama", "llama-server",
    "nvtop",
];

/// Scores a process list against the pattern tables. No match is Balanced.
pub fn classify<'a, I>(process_names: I) -> WorkloadClass
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scores = [0usize; 3];
    for name in process_names {
        let name = name.to_ascii_lowercase();
        for (score, patterns) in scores.iter_mut().zip([GAMING, PRODUCTIVITY, AI]) {
            *score += patterns.iter().filter(|p| name.contains(*p)).count();
        }
    }

    // Ties go to the heavier workload: gaming, then AI, then productivity.
    let [gaming, productivity, ai] = scores;
    let best = gaming.max(productivity).max(ai);
    if best == 0 {
        WorkloadClass::Balanced
    } else if gaming == best {
        WorkloadClass::Gaming
    } else if ai == best {
        WorkloadClass::AiWorkload
    } else {
        WorkloadClass::Productivity
    }
}

/// Stabilizes raw classifications with a majority vote over recent detections.
pub struct WorkloadDetector {
    sys: System,
    recent: VecDeque<WorkloadClass>,
}

impl Default for WorkloadDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkloadDetector {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            recent: VecDeque::with_capacity(VOTE_WINDOW),
        }
    }

    /// Refreshes the process table and returns the voted class.
    pub fn detect(&mut self) -> WorkloadClass {
        self.sys.refresh_processes();
        let raw = classify(self.sys.processes().values().map(|p| p.name()));
        self.record(raw)
    }

    /// Adds one raw detection and returns the current majority.
    pub fn record(&mut self, raw: WorkloadClass) -> WorkloadClass {
        self.recent.push_back(raw);
        while self.recent.len() > VOTE_WINDOW {
            self.recent.pop_front();
        }
        if self.recent.len() < VOTE_WINDOW {
            return raw;
        }
        // Most frequent class; ties go to the most recent of the tied classes.
        let mut best = raw;
        let mut best_count = 0;
        for candidate in self.recent.iter().rev() {
            let count = self.recent.iter().filter(|c| *c == candidate).count();
            if count > best_count {
                best = *candidate;
                best_count = count;
            }
        }
        best
    }
}

/// Host facts collected once and passed to whoever reports them.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    pub host_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub cpu_brand: Option<String>,
    pub cpu_count: usize,
}

impl PlatformInfo {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        let cpu_brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty());
        Self {
            host_name: System::host_name(),
            os_version: System::long_os_version(),
            kernel_version: System::kernel_version(),
            cpu_brand,
            cpu_count: sys.cpus().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_dominant_pattern_set() {
        assert_eq!(classify(["bash", "sshd"]), WorkloadClass::Balanced);
        assert_eq!(classify(["steam", "steamwebhelper", "code"]), WorkloadClass::Gaming);
        assert_eq!(classify(["python3", "jupyter-lab", "firefox"]), WorkloadClass::AiWorkload);
        assert_eq!(classify(["cargo", "rustc", "Firefox"]), WorkloadClass::Productivity);
    }

    #[test]
    fn vote_smooths_single_outliers() {
        let mut d = WorkloadDetector::new();
        for _ in 0..4 {
            d.record(WorkloadClass::Gaming);
        }
        assert_eq!(d.record(WorkloadClass::Productivity), WorkloadClass::Gaming);
        assert_eq!(d.record(WorkloadClass::Productivity), WorkloadClass::Gaming);
        assert_eq!(d.record(WorkloadClass::Productivity), WorkloadClass::Productivity);
    }

    #[test]
    fn short_history_passes_raw_detection_through() {
        let mut d = WorkloadDetector::new();
        assert_eq!(d.record(WorkloadClass::AiWorkload), WorkloadClass::AiWorkload);
        assert_eq!(d.record(WorkloadClass::Balanced), WorkloadClass::Balanced);
    }
}
