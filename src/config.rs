use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub health: HealthConfig,
    pub advisor: AdvisorConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Interval between live metric polls in `watch` mode.
    pub poll_interval_ms: u64,
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            poll_interval_ms: 5000,
            log_format: "text".to_string(),
        }
    }
}

/// A monotonic curve given as `(metric, score)` breakpoints sorted by
/// metric. Scores are linearly interpolated between breakpoints and held
/// flat beyond the ends.
pub type Curve = Vec<(f64, f64)>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub good_threshold: u32,
    pub weights: HealthWeights,
    pub memory_curve: Curve,
    pub cpu_curve: Curve,
    pub disk_curve: Curve,
    pub startup_curve: Curve,
    pub uptime_curve: Curve,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            good_threshold: 80,
            weights: HealthWeights::default(),
            memory_curve: vec![
                (50.0, 100.0),
                (70.0, 85.0),
                (85.0, 60.0),
                (95.0, 15.0),
                (100.0, 0.0),
            ],
            cpu_curve: vec![
                (30.0, 100.0),
                (50.0, 85.0),
                (70.0, 60.0),
                (90.0, 25.0),
                (100.0, 10.0),
            ],
            disk_curve: vec![
                (60.0, 100.0),
                (75.0, 80.0),
                (85.0, 60.0),
                (95.0, 25.0),
                (100.0, 5.0),
            ],
            startup_curve: vec![(100.0, 100.0), (200.0, 80.0), (300.0, 60.0), (500.0, 30.0)],
            uptime_curve: vec![(3.0, 100.0), (7.0, 80.0), (14.0, 55.0), (30.0, 25.0)],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub memory: f64,
    pub cpu: f64,
    pub disk: f64,
    pub startup: f64,
    pub uptime: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        HealthWeights {
            memory: 0.30,
            cpu: 0.25,
            disk: 0.20,
            startup: 0.15,
            uptime: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub bloated_mb: f64,
    pub idle_cpu_percent: f32,
    pub idle_floor_mb: f64,
    pub duplicate_baseline: usize,
    /// Per-executable overrides of `duplicate_baseline`, keyed by
    /// lowercase name without extension.
    pub expected_instances: HashMap<String, usize>,
    /// Excess instances at or below this size are not worth a suggestion.
    pub duplicate_floor_mb: f64,
    pub background_floor_mb: f64,
    pub savings: SavingsFractions,
    /// Extra process names that must never be suggested or trimmed.
    pub protected: Vec<String>,
    pub max_suggestions: usize,
    pub trim_timeout_ms: u64,
    pub settle_ms: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        let expected_instances = [("chrome", 12), ("msedge", 12), ("firefox", 8), ("code", 8)]
            .into_iter()
            .map(|(name, n)| (name.to_string(), n))
            .collect();
        AdvisorConfig {
            bloated_mb: 500.0,
            idle_cpu_percent: 1.0,
            idle_floor_mb: 150.0,
            duplicate_baseline: 3,
            expected_instances,
            duplicate_floor_mb: 20.0,
            background_floor_mb: 30.0,
            savings: SavingsFractions::default(),
            protected: Vec::new(),
            max_suggestions: 50,
            trim_timeout_ms: 2000,
            settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SavingsFractions {
    pub bloated: f64,
    pub idle_hog: f64,
    pub duplicate: f64,
    pub background: f64,
}

impl Default for SavingsFractions {
    fn default() -> Self {
        SavingsFractions {
            bloated: 0.30,
            idle_hog: 0.25,
            duplicate: 0.20,
            background: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub selective_trim_mb: f64,
    pub selective_trim_cpu_percent: f32,
    pub idle_priority_cpu_percent: f32,
    pub leak_scan_mb: f64,
    /// Additional directories emptied by `disk_temp_files`.
    pub extra_temp_dirs: Vec<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            selective_trim_mb: 100.0,
            selective_trim_cpu_percent: 5.0,
            idle_priority_cpu_percent: 1.0,
            leak_scan_mb: 500.0,
            extra_temp_dirs: Vec::new(),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("trimtop").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "invalid config, using defaults");
            Config::default()
        }),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "unreadable config, using defaults");
            Config::default()
        }
    }
}
