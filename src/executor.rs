//! Runs a caller-selected set of catalog entries.
//!
//! Every requested id yields exactly one [`OptimizationResult`]; a failing
//! item is recorded and the batch moves on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::catalog::{ActionKind, Catalog, CatalogEntry};
use crate::config::ExecutorConfig;
use crate::error::{ActionError, OsError};
use crate::format::{MIB, bytes_to_mb, freed_mb};
use crate::system::cleanup;
use crate::system::ops::{PriorityClass, ServiceStop, SystemOps};
use crate::system::process::ProcessInfo;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// The id exactly as requested, so unknown ids echo back.
    pub id: String,
    pub name: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub memory_freed_mb: Option<f64>,
    pub disk_freed_mb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub total_duration_ms: u64,
    pub total_memory_freed_mb: f64,
    pub total_disk_freed_mb: f64,
    pub items_attempted: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    pub results: Vec<OptimizationResult>,
    pub memory_before_mb: u64,
    pub memory_after_mb: u64,
}

impl OptimizationReport {
    /// A report where every distinct id failed with `message`, used when
    /// the batch itself could not run.
    pub fn aborted(ids: &[String], message: &str) -> Self {
        let mut seen = HashSet::new();
        let results: Vec<OptimizationResult> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .map(|id| OptimizationResult {
                id: id.to_string(),
                name: id.to_string(),
                success: false,
                message: message.to_string(),
                duration_ms: 0,
                memory_freed_mb: None,
                disk_freed_mb: None,
            })
            .collect();
        OptimizationReport {
            total_duration_ms: 0,
            total_memory_freed_mb: 0.0,
            total_disk_freed_mb: 0.0,
            items_attempted: results.len(),
            items_succeeded: 0,
            items_failed: results.len(),
            results,
            memory_before_mb: 0,
            memory_after_mb: 0,
        }
    }
}

/// What a successful action reports back.
#[derive(Debug, Default)]
struct Outcome {
    message: String,
    memory_freed_mb: Option<f64>,
    disk_freed_mb: Option<f64>,
}

impl Outcome {
    fn message(message: impl Into<String>) -> Self {
        Outcome {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Per-pid tally for actions that touch many processes.
struct Sweep {
    done: usize,
    failed: usize,
    first_error: Option<OsError>,
}

impl Sweep {
    fn run(pids: impl IntoIterator<Item = u32>, mut f: impl FnMut(u32) -> Result<(), OsError>) -> Self {
        let mut sweep = Sweep {
            done: 0,
            failed: 0,
            first_error: None,
        };
        for pid in pids {
            match f(pid) {
                Ok(()) => sweep.done += 1,
                Err(err) => {
                    tracing::trace!(pid, %err, "per-process call failed");
                    sweep.failed += 1;
                    sweep.first_error.get_or_insert(err);
                }
            }
        }
        sweep
    }

    /// Fails only when every attempt failed.
    fn into_result(self) -> Result<(usize, usize), OsError> {
        match self.first_error {
            Some(err) if self.done == 0 => Err(err),
            _ => Ok((self.done, self.failed)),
        }
    }
}

fn is_system_pid(pid: u32) -> bool {
    pid == 0 || pid == std::process::id()
}

/// Large and idle enough for the selective trim.
pub(crate) fn is_selective_candidate(p: &ProcessInfo, config: &ExecutorConfig) -> bool {
    let min_bytes = (config.selective_trim_mb * MIB as f64) as u64;
    !is_system_pid(p.pid)
        && p.memory_bytes >= min_bytes
        && p.cpu_percent <= config.selective_trim_cpu_percent
}

#[derive(Clone)]
pub struct Executor {
    catalog: Catalog,
    ops: Arc<dyn SystemOps>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(catalog: Catalog, ops: Arc<dyn SystemOps>, config: ExecutorConfig) -> Self {
        Executor {
            catalog,
            ops,
            config,
        }
    }

    /// Blocking; callers on an async runtime move this onto a blocking worker.
    pub fn run(&self, ids: &[String]) -> OptimizationReport {
        let _span = tracing::info_span!("executor.run", requested = ids.len()).entered();
        let started = Instant::now();
        let elevated = self.ops.is_elevated();
        let memory_before = self.ops.memory_used();

        let mut seen = HashSet::new();
        let results: Vec<OptimizationResult> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .map(|id| self.run_one(id, elevated))
            .collect();

        let memory_after = self.ops.memory_used();
        let items_succeeded = results.iter().filter(|r| r.success).count();
        let total_memory_freed_mb: f64 = results.iter().filter_map(|r| r.memory_freed_mb).sum();
        let total_disk_freed_mb: f64 = results.iter().filter_map(|r| r.disk_freed_mb).sum();

        let report = OptimizationReport {
            total_duration_ms: started.elapsed().as_millis() as u64,
            total_memory_freed_mb,
            total_disk_freed_mb,
            items_attempted: results.len(),
            items_succeeded,
            items_failed: results.len() - items_succeeded,
            results,
            memory_before_mb: memory_before / MIB,
            memory_after_mb: memory_after / MIB,
        };
        tracing::info!(
            attempted = report.items_attempted,
            succeeded = report.items_succeeded,
            failed = report.items_failed,
            freed_mb = report.total_memory_freed_mb,
            "optimization batch finished"
        );
        report
    }

    fn run_one(&self, requested: &str, elevated: bool) -> OptimizationResult {
        let started = Instant::now();
        let (name, outcome) = match self.catalog.lookup(requested) {
            Some(entry) => (entry.name.to_string(), self.execute(entry, elevated)),
            None => (
                "Unknown".to_string(),
                Err(ActionError::InvalidSelection(requested.to_string())),
            ),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                tracing::debug!(id = requested, duration_ms, "optimization succeeded");
                OptimizationResult {
                    id: requested.to_string(),
                    name,
                    success: true,
                    message: outcome.message,
                    duration_ms,
                    memory_freed_mb: outcome.memory_freed_mb.map(|mb| mb.max(0.0)),
                    disk_freed_mb: outcome.disk_freed_mb.map(|mb| mb.max(0.0)),
                }
            }
            Err(err) => {
                tracing::warn!(id = requested, %err, "optimization failed");
                OptimizationResult {
                    id: requested.to_string(),
                    name,
                    success: false,
                    message: err.to_string(),
                    duration_ms,
                    memory_freed_mb: None,
                    disk_freed_mb: None,
                }
            }
        }
    }

    fn execute(&self, entry: &CatalogEntry, elevated: bool) -> Result<Outcome, ActionError> {
        if !entry.is_available(self.ops.as_ref()) {
            return Err(ActionError::Unavailable(entry.name.to_string()));
        }
        if entry.requires_elevation && !elevated {
            return Err(ActionError::ElevationRequired(entry.name.to_string()));
        }
        self.dispatch(entry)
            .map_err(|err| ActionError::from_os(entry.name, err, elevated))
    }

    fn dispatch(&self, entry: &CatalogEntry) -> Result<Outcome, OsError> {
        let ops = self.ops.as_ref();
        match entry.action {
            ActionKind::TrimAll => {
                let pids: Vec<u32> = ops
                    .processes()
                    .into_iter()
                    .map(|p| p.pid)
                    .filter(|pid| *pid != 0)
                    .collect();
                self.measured(|| {
                    let (trimmed, _) =
                        Sweep::run(pids, |pid| ops.trim_working_set(pid)).into_result()?;
                    Ok(format!("Trimmed working set of {trimmed} processes"))
                })
            }
            ActionKind::TrimSelective => {
                let pids: Vec<u32> = ops
                    .processes()
                    .into_iter()
                    .filter(|p| is_selective_candidate(p, &self.config))
                    .map(|p| p.pid)
                    .collect();
                self.measured(|| {
                    let (trimmed, _) =
                        Sweep::run(pids, |pid| ops.trim_working_set(pid)).into_result()?;
                    Ok(format!(
                        "Selectively trimmed {trimmed} high-memory idle processes"
                    ))
                })
            }
            ActionKind::PurgeList(list) => self.measured(|| {
                ops.purge_memory_list(list)?;
                Ok(format!("{} purged", entry.name))
            }),
            ActionKind::LowerIdlePriority => {
                let foreground = ops.foreground_pid();
                let pids: Vec<u32> = ops
                    .processes()
                    .into_iter()
                    .filter(|p| !is_system_pid(p.pid) && p.pid != 1)
                    .filter(|p| Some(p.pid) != foreground)
                    .filter(|p| p.cpu_percent < self.config.idle_priority_cpu_percent)
                    .map(|p| p.pid)
                    .collect();
                let (lowered, skipped) =
                    Sweep::run(pids, |pid| ops.set_priority(pid, PriorityClass::BelowNormal))
                        .into_result()?;
                Ok(Outcome::message(format!(
                    "Lowered priority of {lowered} idle processes ({skipped} skipped)"
                )))
            }
            ActionKind::BoostForeground => {
                let pid = ops
                    .foreground_pid()
                    .ok_or_else(|| OsError::NotFound("foreground window".to_string()))?;
                ops.set_priority(pid, PriorityClass::AboveNormal)?;
                Ok(Outcome::message(format!(
                    "Foreground process {pid} boosted to above-normal priority"
                )))
            }
            ActionKind::LeakScan => Ok(Outcome::message(self.leak_scan(ops.processes()))),
            ActionKind::Tweak(tweak) => {
                ops.apply_tweak(tweak)?;
                Ok(Outcome::message(format!("{} applied", entry.name)))
            }
            ActionKind::StopServices(group) => {
                let names = ops.service_names(group);
                if names.is_empty() {
                    return Err(OsError::NotFound(format!("{group:?} services")));
                }
                let mut messages = Vec::new();
                let mut first_error = None;
                let mut handled = 0;
                for name in &names {
                    match ops.stop_service(name) {
                        Ok(ServiceStop::Stopped) => {
                            handled += 1;
                            messages.push(format!("Stopped {name}"));
                        }
                        Ok(ServiceStop::AlreadyStopped) => {
                            handled += 1;
                            messages.push(format!("{name} already stopped"));
                        }
                        Err(err) => {
                            messages.push(format!("{name}: {err}"));
                            first_error.get_or_insert(err);
                        }
                    }
                }
                match first_error {
                    Some(err) if handled == 0 => Err(err),
                    _ => Ok(Outcome::message(messages.join("; "))),
                }
            }
            ActionKind::FlushNetwork(cache) => {
                ops.flush_network_cache(cache)?;
                Ok(Outcome::message(format!("{} completed", entry.name)))
            }
            ActionKind::Cleanup(target) => {
                let dirs = ops.cleanup_dirs(target);
                let stats = cleanup::clean_dirs(&dirs);
                let freed = bytes_to_mb(stats.deleted_bytes);
                let mut message = format!(
                    "Deleted {} items, freed {freed:.1} MB",
                    stats.deleted_files
                );
                if stats.failed_files > 0 {
                    message.push_str(&format!(", {} in use", stats.failed_files));
                }
                if stats.skipped_entries > 0 {
                    message.push_str(&format!(", {} special files kept", stats.skipped_entries));
                }
                Ok(Outcome {
                    message,
                    memory_freed_mb: None,
                    disk_freed_mb: Some(freed),
                })
            }
        }
    }

    /// Run `f` and attribute the drop in used memory around it.
    fn measured(&self, f: impl FnOnce() -> Result<String, OsError>) -> Result<Outcome, OsError> {
        let before = self.ops.memory_used();
        let message = f()?;
        let after = self.ops.memory_used();
        Ok(Outcome {
            message,
            memory_freed_mb: Some(freed_mb(before, after)),
            disk_freed_mb: None,
        })
    }

    fn leak_scan(&self, processes: Vec<ProcessInfo>) -> String {
        let threshold = (self.config.leak_scan_mb * MIB as f64) as u64;
        let mut suspects: Vec<ProcessInfo> = processes
            .into_iter()
            .filter(|p| p.memory_bytes > threshold)
            .collect();
        if suspects.is_empty() {
            return "No suspicious processes detected".to_string();
        }
        suspects.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes).then(a.pid.cmp(&b.pid)));
        let listed: Vec<String> = suspects
            .iter()
            .map(|p| format!("{} (PID {}) {:.0} MB", p.name, p.pid, bytes_to_mb(p.memory_bytes)))
            .collect();
        format!(
            "Found {} high-memory processes: {}",
            suspects.len(),
            listed.join(", ")
        )
    }
}
