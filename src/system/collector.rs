use std::time::Instant;

use sysinfo::{Components, Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System};

use super::process::{ProcessInfo, build_process_table_from_flat};
use super::snapshot::{IoDelta, MountUsage, SystemSnapshot, TempReading};

/// Anything that can produce a point-in-time reading of the machine.
pub trait SnapshotSource: Send {
    fn sample(&mut self) -> SystemSnapshot;
}

/// Cumulative counters from the previous poll, kept only to turn the
/// next poll's totals into deltas.
#[derive(Debug, Default, Clone, Copy)]
struct IoTotals {
    disk_read: u64,
    disk_write: u64,
    net_rx: u64,
    net_tx: u64,
}

impl IoTotals {
    fn delta_since(&self, prev: Option<IoTotals>) -> (IoDelta, IoDelta) {
        let Some(prev) = prev else {
            return (IoDelta::default(), IoDelta::default());
        };
        (
            IoDelta {
                read_bytes: self.disk_read.saturating_sub(prev.disk_read),
                write_bytes: self.disk_write.saturating_sub(prev.disk_write),
            },
            IoDelta {
                read_bytes: self.net_rx.saturating_sub(prev.net_rx),
                write_bytes: self.net_tx.saturating_sub(prev.net_tx),
            },
        )
    }
}

pub struct Collector {
    sys: System,
    networks: Networks,
    components: Components,
    disks: Disks,
    prev_totals: Option<IoTotals>,
    last_cpu_refresh: Instant,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
        Collector {
            sys,
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            prev_totals: None,
            last_cpu_refresh: Instant::now(),
        }
    }

    pub fn refresh(&mut self) -> SystemSnapshot {
        let _refresh_span = tracing::debug_span!("collector.refresh").entered();

        self.sys.refresh_memory();
        // CPU usage is a delta between two refreshes; a shorter gap reads as zero.
        let since = self.last_cpu_refresh.elapsed();
        if since < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL - since);
        }
        self.sys.refresh_cpu_all();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cpu()
                .with_disk_usage(),
        );
        self.last_cpu_refresh = Instant::now();
        self.networks.refresh(true);
        self.components.refresh(true);
        self.disks.refresh(true);
        self.build_snapshot()
    }

    fn build_snapshot(&mut self) -> SystemSnapshot {
        let mut totals = IoTotals::default();
        let mut flat_processes = Vec::with_capacity(self.sys.processes().len());

        for (pid, process) in self.sys.processes() {
            let usage = process.disk_usage();
            totals.disk_read = totals.disk_read.saturating_add(usage.total_read_bytes);
            totals.disk_write = totals.disk_write.saturating_add(usage.total_written_bytes);

            flat_processes.push(ProcessInfo::from_sysinfo(*pid, process));
        }

        for data in self.networks.list().values() {
            totals.net_rx = totals.net_rx.saturating_add(data.total_received());
            totals.net_tx = totals.net_tx.saturating_add(data.total_transmitted());
        }

        let (disk_io, net_io) = totals.delta_since(self.prev_totals);
        self.prev_totals = Some(totals);

        let temperatures = self
            .components
            .list()
            .iter()
            .filter_map(|c| {
                c.temperature().map(|temp_c| TempReading {
                    label: c.label().to_string(),
                    temp_c,
                    critical: c.critical(),
                })
            })
            .collect();

        let mounts = self
            .disks
            .list()
            .iter()
            .map(|d| MountUsage {
                mount_point: d.mount_point().to_string_lossy().to_string(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .collect();

        SystemSnapshot {
            cpu_usage_percent: self.sys.global_cpu_usage(),
            cpu_per_core: self.sys.cpus().iter().map(|c| c.cpu_usage()).collect(),
            memory_total: self.sys.total_memory(),
            memory_used: self.sys.used_memory(),
            swap_total: self.sys.total_swap(),
            swap_used: self.sys.used_swap(),
            disk_io,
            net_io,
            uptime_secs: System::uptime(),
            temperatures,
            mounts,
            process_table: build_process_table_from_flat(flat_processes),
        }
    }
}

impl SnapshotSource for Collector {
    fn sample(&mut self) -> SystemSnapshot {
        self.refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_has_zero_deltas() {
        let totals = IoTotals {
            disk_read: 100,
            disk_write: 100,
            net_rx: 100,
            net_tx: 100,
        };
        let (disk, net) = totals.delta_since(None);
        assert_eq!(disk, IoDelta::default());
        assert_eq!(net, IoDelta::default());
    }

    #[test]
    fn deltas_saturate_when_counters_shrink() {
        let prev = IoTotals {
            disk_read: 500,
            disk_write: 10,
            net_rx: 40,
            net_tx: 40,
        };
        let now = IoTotals {
            disk_read: 200,
            disk_write: 30,
            net_rx: 100,
            net_tx: 40,
        };
        let (disk, net) = now.delta_since(Some(prev));
        assert_eq!(disk.read_bytes, 0);
        assert_eq!(disk.write_bytes, 20);
        assert_eq!(net.read_bytes, 60);
        assert_eq!(net.write_bytes, 0);
    }

    #[test]
    fn live_collector_sees_current_process() {
        let mut collector = Collector::new();
        let snapshot = collector.refresh();
        assert!(snapshot.memory_total > 0);
        assert!(snapshot.process_table.get(std::process::id()).is_some());
    }

    #[test]
    fn back_to_back_refreshes_wait_out_the_cpu_interval() {
        let mut collector = Collector::new();
        let started = Instant::now();
        collector.refresh();
        collector.refresh();
        assert!(started.elapsed() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }

    #[tokio::test]
    async fn first_poll_reports_cpu_of_a_busy_process() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        use crate::system::telemetry::Telemetry;

        let stop = Arc::new(AtomicBool::new(false));
        let spinner = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut n = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    n = std::hint::black_box(n.wrapping_add(1));
                }
            })
        };

        let telemetry = Telemetry::new(Box::new(Collector::new()));
        let me = std::process::id();
        let initial_cpu = telemetry
            .latest()
            .process_table
            .get(me)
            .map(|p| p.cpu_percent)
            .unwrap_or_default();
        let outcome = telemetry.poll().await;
        let polled_cpu = outcome
            .snapshot()
            .process_table
            .get(me)
            .map(|p| p.cpu_percent)
            .unwrap_or_default();

        stop.store(true, Ordering::Relaxed);
        spinner.join().unwrap();

        assert!(initial_cpu > 1.0, "initial sample read {initial_cpu}% cpu");
        assert!(polled_cpu > 1.0, "first poll read {polled_cpu}% cpu");
    }
}
