//! Composite health score.
//!
//! Each category maps one metric through a piecewise-linear curve from
//! [`HealthConfig`]; the overall score is the weighted mean of whichever
//! categories could be measured. Nothing here touches the OS.

use std::fmt;

use serde::Serialize;

use crate::config::{Curve, HealthConfig};
use crate::format::MIB;
use crate::system::snapshot::SystemSnapshot;

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    Memory,
    Cpu,
    Disk,
    Startup,
    Uptime,
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthCategory::Memory => "Memory",
            HealthCategory::Cpu => "CPU",
            HealthCategory::Disk => "Disk",
            HealthCategory::Startup => "Startup",
            HealthCategory::Uptime => "Uptime",
        };
        f.write_str(s)
    }
}

/// The raw metrics the scorer reads. `None` marks a metric the platform
/// did not report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthInputs {
    pub memory_percent: Option<f64>,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub cpu_percent: Option<f64>,
    pub worst_disk_percent: Option<f64>,
    pub process_count: Option<usize>,
    pub uptime_days: Option<f64>,
}

impl HealthInputs {
    pub fn from_snapshot(snapshot: &SystemSnapshot) -> Self {
        let cpu_percent = if snapshot.cpu_per_core.is_empty() {
            None
        } else {
            let sum: f64 = snapshot.cpu_per_core.iter().map(|c| f64::from(*c)).sum();
            Some(sum / snapshot.cpu_per_core.len() as f64)
        };

        let worst_disk_percent = snapshot
            .mounts
            .iter()
            .filter_map(|m| m.used_percent())
            .fold(None, |worst: Option<f64>, pct| {
                Some(worst.map_or(pct, |w| w.max(pct)))
            });

        let process_count = snapshot.process_count();

        HealthInputs {
            memory_percent: snapshot.memory_percent(),
            memory_used_mb: snapshot.memory_used / MIB,
            memory_total_mb: snapshot.memory_total / MIB,
            cpu_percent,
            worst_disk_percent,
            process_count: (process_count > 0).then_some(process_count),
            uptime_days: (snapshot.uptime_secs > 0)
                .then(|| snapshot.uptime_secs as f64 / SECS_PER_DAY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthDetail {
    pub category: HealthCategory,
    pub score: u32,
    pub label: String,
    /// Present only when the score is below the good threshold.
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub overall: u32,
    pub memory_score: Option<u32>,
    pub cpu_score: Option<u32>,
    pub disk_score: Option<u32>,
    pub startup_score: Option<u32>,
    pub uptime_score: Option<u32>,
    pub details: Vec<HealthDetail>,
}

/// Linear interpolation over `curve`, flat beyond both ends, clamped to
/// 0..=100. An empty curve scores everything 100.
pub fn interpolate(curve: &[(f64, f64)], x: f64) -> f64 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return 100.0;
    };
    let y = if x <= first.0 {
        first.1
    } else if x >= last.0 {
        last.1
    } else {
        curve
            .windows(2)
            .find(|w| x >= w[0].0 && x <= w[1].0)
            .map(|w| {
                let (x0, y0) = w[0];
                let (x1, y1) = w[1];
                if x1 == x0 {
                    y1
                } else {
                    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
                }
            })
            .unwrap_or(last.1)
    };
    y.clamp(0.0, 100.0)
}

fn subscore(curve: &Curve, metric: Option<f64>) -> Option<u32> {
    let metric = metric.filter(|m| m.is_finite())?;
    Some(interpolate(curve, metric).round() as u32)
}

fn suggestion(category: HealthCategory) -> &'static str {
    match category {
        HealthCategory::Memory => "Run memory optimization to free RAM",
        HealthCategory::Cpu => "Consider lowering idle process priorities",
        HealthCategory::Disk => "Run disk cleanup to free space",
        HealthCategory::Startup => "Review startup programs to reduce bloat",
        HealthCategory::Uptime => "Consider rebooting to clear stale state",
    }
}

fn label(category: HealthCategory, inputs: &HealthInputs) -> String {
    match category {
        HealthCategory::Memory => format!(
            "{:.0}% used ({} MB / {} MB)",
            inputs.memory_percent.unwrap_or(0.0),
            inputs.memory_used_mb,
            inputs.memory_total_mb
        ),
        HealthCategory::Cpu => {
            format!("{:.0}% average utilization", inputs.cpu_percent.unwrap_or(0.0))
        }
        HealthCategory::Disk => format!(
            "Most-used disk at {:.0}%",
            inputs.worst_disk_percent.unwrap_or(0.0)
        ),
        HealthCategory::Startup => {
            format!("{} running processes", inputs.process_count.unwrap_or(0))
        }
        HealthCategory::Uptime => format!(
            "{:.0} days since last reboot",
            inputs.uptime_days.unwrap_or(0.0).floor()
        ),
    }
}

pub fn score(inputs: &HealthInputs, config: &HealthConfig) -> HealthScore {
    let weights = &config.weights;
    let parts = [
        (
            HealthCategory::Memory,
            subscore(&config.memory_curve, inputs.memory_percent),
            weights.memory,
        ),
        (
            HealthCategory::Cpu,
            subscore(&config.cpu_curve, inputs.cpu_percent),
            weights.cpu,
        ),
        (
            HealthCategory::Disk,
            subscore(&config.disk_curve, inputs.worst_disk_percent),
            weights.disk,
        ),
        (
            HealthCategory::Startup,
            subscore(&config.startup_curve, inputs.process_count.map(|n| n as f64)),
            weights.startup,
        ),
        (
            HealthCategory::Uptime,
            subscore(&config.uptime_curve, inputs.uptime_days),
            weights.uptime,
        ),
    ];

    let available: Vec<(u32, f64)> = parts
        .iter()
        .filter_map(|(_, s, w)| s.map(|s| (s, w.max(0.0))))
        .collect();

    let overall = if available.is_empty() {
        100
    } else {
        let weight_sum: f64 = available.iter().map(|(_, w)| w).sum();
        let mean = if weight_sum > 0.0 {
            available.iter().map(|(s, w)| f64::from(*s) * w).sum::<f64>() / weight_sum
        } else {
            available.iter().map(|(s, _)| f64::from(*s)).sum::<f64>() / available.len() as f64
        };
        mean.round().clamp(0.0, 100.0) as u32
    };

    let details = parts
        .iter()
        .filter_map(|(category, s, _)| {
            s.map(|s| HealthDetail {
                category: *category,
                score: s,
                label: label(*category, inputs),
                suggestion: (s < config.good_threshold).then(|| suggestion(*category).to_string()),
            })
        })
        .collect();

    HealthScore {
        overall,
        memory_score: parts[0].1,
        cpu_score: parts[1].1,
        disk_score: parts[2].1,
        startup_score: parts[3].1,
        uptime_score: parts[4].1,
        details,
    }
}
