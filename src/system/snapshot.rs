use serde::Serialize;

use super::process::ProcessTable;
use crate::format::MIB;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempReading {
    pub label: String,
    pub temp_c: f32,
    pub critical: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MountUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MountUsage {
    pub fn used_percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        Some(used as f64 / self.total_bytes as f64 * 100.0)
    }
}

/// Byte counts accumulated since the previous poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct IoDelta {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f32,
    pub cpu_per_core: Vec<f32>,
    pub memory_total: u64,
    pub memory_used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub disk_io: IoDelta,
    /// `read_bytes` is received, `write_bytes` transmitted.
    pub net_io: IoDelta,
    pub uptime_secs: u64,
    pub temperatures: Vec<TempReading>,
    pub mounts: Vec<MountUsage>,
    pub process_table: ProcessTable,
}

impl SystemSnapshot {
    pub fn memory_percent(&self) -> Option<f64> {
        if self.memory_total == 0 {
            None
        } else {
            Some(self.memory_used as f64 / self.memory_total as f64 * 100.0)
        }
    }

    pub fn process_count(&self) -> usize {
        self.process_table.len()
    }
}

/// Serializable view of a snapshot returned by `get_live_metrics`.
#[derive(Clone, Debug, Serialize)]
pub struct LiveMetrics {
    pub cpu_usage: f32,
    pub cpu_per_core: Vec<f32>,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_percent: f64,
    pub swap_used_mb: u64,
    pub swap_total_mb: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub process_count: usize,
    pub uptime_seconds: u64,
    pub temperatures: Vec<TempReading>,
}

impl From<&SystemSnapshot> for LiveMetrics {
    fn from(s: &SystemSnapshot) -> Self {
        LiveMetrics {
            cpu_usage: s.cpu_usage_percent,
            cpu_per_core: s.cpu_per_core.clone(),
            memory_used_mb: s.memory_used / MIB,
            memory_total_mb: s.memory_total / MIB,
            memory_percent: s.memory_percent().unwrap_or(0.0),
            swap_used_mb: s.swap_used / MIB,
            swap_total_mb: s.swap_total / MIB,
            disk_read_bytes: s.disk_io.read_bytes,
            disk_write_bytes: s.disk_io.write_bytes,
            net_rx_bytes: s.net_io.read_bytes,
            net_tx_bytes: s.net_io.write_bytes,
            process_count: s.process_count(),
            uptime_seconds: s.uptime_secs,
            temperatures: s.temperatures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_usage_percent() {
        let m = MountUsage {
            mount_point: "/".into(),
            total_bytes: 200,
            available_bytes: 50,
        };
        assert_eq!(m.used_percent(), Some(75.0));
        let empty = MountUsage {
            mount_point: "/proc".into(),
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_percent(), None);
    }

    #[test]
    fn live_metrics_projection() {
        let snapshot = SystemSnapshot {
            memory_total: 8 * 1024 * MIB,
            memory_used: 2 * 1024 * MIB,
            net_io: IoDelta {
                read_bytes: 10,
                write_bytes: 20,
            },
            ..Default::default()
        };
        let live = LiveMetrics::from(&snapshot);
        assert_eq!(live.memory_total_mb, 8192);
        assert!((live.memory_percent - 25.0).abs() < 1e-9);
        assert_eq!(live.net_rx_bytes, 10);
        assert_eq!(live.net_tx_bytes, 20);
        assert_eq!(live.process_count, 0);
    }
}
