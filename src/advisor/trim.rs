//! Trims the working sets of caller-accepted pids.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::Instrument;

use super::DenyList;
use crate::config::AdvisorConfig;
use crate::error::{ActionError, OsError};
use crate::format::{MIB, bytes_to_mb};
use crate::system::ops::SystemOps;
use crate::system::process::ProcessInfo;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOptResult {
    pub pid: u32,
    pub name: String,
    pub memory_before_mb: f64,
    pub memory_after_mb: f64,
    pub freed_mb: f64,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOptReport {
    pub results: Vec<ProcessOptResult>,
    pub processes_attempted: usize,
    pub processes_trimmed: usize,
    pub processes_failed: usize,
    pub total_freed_mb: f64,
    pub total_duration_ms: u64,
}

impl ProcessOptResult {
    fn failed(pid: u32, name: String, before: u64, message: String, started: Instant) -> Self {
        let before_mb = bytes_to_mb(before);
        ProcessOptResult {
            pid,
            name,
            memory_before_mb: before_mb,
            memory_after_mb: before_mb,
            freed_mb: 0.0,
            success: false,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, OsError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| OsError::Io(std::io::Error::other(err)))
}

/// Look `pid` up on a blocking worker, giving up after `timeout`.
async fn lookup(
    ops: Arc<dyn SystemOps>,
    pid: u32,
    timeout: Duration,
) -> Result<Option<ProcessInfo>, OsError> {
    match tokio::time::timeout(timeout, blocking(move || ops.process(pid))).await {
        Ok(found) => found,
        Err(_) => Err(OsError::TimedOut(timeout.as_millis() as u64)),
    }
}

/// Trim each pid in order. Pids are re-resolved immediately before the
/// trim, so one that has exited since it was suggested fails on its own
/// without affecting the rest.
pub async fn trim_processes(
    ops: Arc<dyn SystemOps>,
    pids: &[u32],
    deny: &DenyList,
    config: &AdvisorConfig,
) -> ProcessOptReport {
    let started = Instant::now();
    let timeout = Duration::from_millis(config.trim_timeout_ms);
    let elevated = {
        let ops = ops.clone();
        blocking(move || ops.is_elevated()).await.unwrap_or(false)
    };

    let mut seen = HashSet::new();
    let mut results = Vec::new();
    // (index into results, bytes before) for trims awaiting re-measurement.
    let mut trimmed: Vec<(usize, u64)> = Vec::new();

    for &pid in pids.iter().filter(|pid| seen.insert(**pid)) {
        let span = tracing::info_span!("trim.process", pid);
        let outcome = trim_one(ops.clone(), pid, deny, timeout, elevated)
            .instrument(span)
            .await;
        match outcome {
            Ok((name, before, pid_started)) => {
                trimmed.push((results.len(), before));
                results.push(ProcessOptResult {
                    pid,
                    name,
                    memory_before_mb: bytes_to_mb(before),
                    memory_after_mb: bytes_to_mb(before),
                    freed_mb: 0.0,
                    success: true,
                    message: "Working set trimmed".to_string(),
                    duration_ms: pid_started.elapsed().as_millis() as u64,
                });
            }
            Err(result) => results.push(result),
        }
    }

    if !trimmed.is_empty() {
        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
        for (index, before) in trimmed {
            let pid = results[index].pid;
            let result = &mut results[index];
            match lookup(ops.clone(), pid, timeout).await {
                Ok(found) => {
                    // A process that exited after trimming is measured as unchanged.
                    let after = found.map(|p| p.memory_bytes).unwrap_or(before);
                    result.memory_after_mb = bytes_to_mb(after);
                    result.freed_mb = bytes_to_mb(before.saturating_sub(after));
                    result.message = format!("Freed {:.1} MB", result.freed_mb);
                }
                Err(err) => {
                    tracing::warn!(pid, %err, "could not re-measure trimmed process");
                    result.message = "Working set trimmed, memory not re-measured".to_string();
                }
            }
        }
    }

    let processes_trimmed = results.iter().filter(|r| r.success).count();
    let total_freed_mb = results.iter().map(|r| r.freed_mb).sum::<f64>();
    tracing::info!(
        attempted = results.len(),
        trimmed = processes_trimmed,
        freed_mb = total_freed_mb,
        "process trim finished"
    );
    ProcessOptReport {
        processes_attempted: results.len(),
        processes_trimmed,
        processes_failed: results.len() - processes_trimmed,
        total_freed_mb,
        total_duration_ms: started.elapsed().as_millis() as u64,
        results,
    }
}

async fn trim_one(
    ops: Arc<dyn SystemOps>,
    pid: u32,
    deny: &DenyList,
    timeout: Duration,
    elevated: bool,
) -> Result<(String, u64, Instant), ProcessOptResult> {
    let started = Instant::now();
    let resolved = match lookup(ops.clone(), pid, timeout).await {
        Ok(resolved) => resolved,
        Err(err) => {
            let name = format!("PID {pid}");
            let err = ActionError::from_os(&name, err, elevated);
            tracing::warn!(%err, "could not resolve process");
            return Err(ProcessOptResult::failed(pid, name, 0, err.to_string(), started));
        }
    };
    let Some(process) = resolved else {
        tracing::debug!("process has exited");
        return Err(ProcessOptResult::failed(
            pid,
            format!("PID {pid}"),
            0,
            format!("process {pid} is no longer running"),
            started,
        ));
    };
    let before = process.memory_bytes;

    if deny.is_denied(&process) {
        tracing::warn!(name = %process.name, "refusing to trim protected process");
        return Err(ProcessOptResult::failed(
            pid,
            process.name,
            before,
            "protected process, not trimmed".to_string(),
            started,
        ));
    }

    let call = blocking(move || ops.trim_working_set(pid));
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) | Ok(Err(err)) => Err(err),
        Err(_) => Err(OsError::TimedOut(timeout.as_millis() as u64)),
    };

    match outcome {
        Ok(()) => {
            tracing::debug!(before_mb = before / MIB, "trimmed");
            Ok((process.name, before, started))
        }
        Err(err) => {
            let err = ActionError::from_os(&process.name, err, elevated);
            tracing::warn!(%err, "trim failed");
            Err(ProcessOptResult::failed(
                pid,
                process.name,
                before,
                err.to_string(),
                started,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::ops::{
        Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
        ServiceStop, Tweak,
    };
    use crate::system::process::ProcessState;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Processes whose memory halves on trim; pid 13 hangs. `slow_lookup`
    /// makes the nth lookup of one pid hang too.
    struct TrimOps {
        procs: Mutex<HashMap<u32, ProcessInfo>>,
        elevated: bool,
        denied_trim: bool,
        slow_lookup: Option<(u32, usize)>,
        lookups: AtomicUsize,
    }

    impl TrimOps {
        fn new(list: &[(u32, &str, u64)]) -> Self {
            let procs = list
                .iter()
                .map(|&(pid, name, mb)| {
                    (
                        pid,
                        ProcessInfo {
                            pid,
                            ppid: 1,
                            name: name.to_string(),
                            memory_bytes: mb * MIB,
                            cpu_percent: 0.0,
                            state: ProcessState::Sleeping,
                            children: Vec::new(),
                        },
                    )
                })
                .collect();
            TrimOps {
                procs: Mutex::new(procs),
                elevated: true,
                denied_trim: false,
                slow_lookup: None,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl SystemOps for TrimOps {
        fn is_elevated(&self) -> bool {
            self.elevated
        }
        fn supports(&self, _capability: Capability) -> bool {
            true
        }
        fn memory_used(&self) -> u64 {
            0
        }
        fn processes(&self) -> Vec<ProcessInfo> {
            self.procs.lock().unwrap().values().cloned().collect()
        }
        fn process(&self, pid: u32) -> Option<ProcessInfo> {
            let slow = self
                .slow_lookup
                .is_some_and(|(slow_pid, nth)| {
                    slow_pid == pid && self.lookups.fetch_add(1, Ordering::SeqCst) == nth
                });
            if slow {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.procs.lock().unwrap().get(&pid).cloned()
        }
        fn trim_working_set(&self, pid: u32) -> Result<(), OsError> {
            if pid == 13 {
                std::thread::sleep(Duration::from_millis(300));
            }
            if self.denied_trim {
                return Err(OsError::PermissionDenied(format!("process {pid}")));
            }
            if let Some(p) = self.procs.lock().unwrap().get_mut(&pid) {
                p.memory_bytes /= 2;
            }
            Ok(())
        }
        fn purge_memory_list(&self, _list: MemoryList) -> Result<(), OsError> {
            Ok(())
        }
        fn set_priority(&self, _pid: u32, _class: PriorityClass) -> Result<(), OsError> {
            Ok(())
        }
        fn foreground_pid(&self) -> Option<u32> {
            None
        }
        fn apply_tweak(&self, _tweak: Tweak) -> Result<(), OsError> {
            Ok(())
        }
        fn service_names(&self, _group: ServiceGroup) -> Vec<String> {
            Vec::new()
        }
        fn stop_service(&self, _name: &str) -> Result<ServiceStop, OsError> {
            Ok(ServiceStop::Stopped)
        }
        fn flush_network_cache(&self, _cache: NetCache) -> Result<(), OsError> {
            Ok(())
        }
        fn cleanup_dirs(&self, _target: CleanupTarget) -> Vec<CleanupDir> {
            Vec::new()
        }
    }

    fn fast_config() -> AdvisorConfig {
        AdvisorConfig {
            trim_timeout_ms: 100,
            settle_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exited_pid_fails_alone() {
        let ops = Arc::new(TrimOps::new(&[(10, "editor", 400), (11, "chat", 200)]));
        let report = trim_processes(ops, &[10, 999, 11], &DenyList::new(&[]), &fast_config()).await;

        assert_eq!(report.processes_attempted, 3);
        assert_eq!(report.processes_trimmed, 2);
        assert_eq!(report.processes_failed, 1);
        assert!(!report.results[1].success);
        assert!(report.results[1].message.contains("no longer running"));
        assert_eq!(report.results[0].freed_mb, 200.0);
        assert_eq!(report.results[2].freed_mb, 100.0);
        assert_eq!(report.total_freed_mb, 300.0);
    }

    #[tokio::test]
    async fn duplicate_pids_are_trimmed_once() {
        let ops = Arc::new(TrimOps::new(&[(10, "editor", 400)]));
        let report = trim_processes(ops, &[10, 10, 10], &DenyList::new(&[]), &fast_config()).await;
        assert_eq!(report.processes_attempted, 1);
        assert_eq!(report.results[0].freed_mb, 200.0);
    }

    #[tokio::test]
    async fn protected_pids_are_refused() {
        let ops = Arc::new(TrimOps::new(&[(10, "lsass.exe", 400)]));
        let report = trim_processes(ops.clone(), &[10], &DenyList::new(&[]), &fast_config()).await;
        assert!(!report.results[0].success);
        assert!(report.results[0].message.contains("protected"));
        assert_eq!(ops.process(10).unwrap().memory_bytes, 400 * MIB);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_trim_times_out() {
        let ops = Arc::new(TrimOps::new(&[(13, "stuck", 400), (14, "fine", 100)]));
        let report = trim_processes(ops, &[13, 14], &DenyList::new(&[]), &fast_config()).await;
        assert!(!report.results[0].success);
        assert!(report.results[0].message.contains("timed out"));
        assert!(report.results[1].success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_lookup_before_trim_times_out() {
        let mut ops = TrimOps::new(&[(15, "frozen", 400), (16, "fine", 100)]);
        ops.slow_lookup = Some((15, 0));
        let ops = Arc::new(ops);
        let started = Instant::now();
        let report =
            trim_processes(ops.clone(), &[15, 16], &DenyList::new(&[]), &fast_config()).await;

        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(!report.results[0].success);
        assert!(report.results[0].message.contains("timed out"));
        assert!(report.results[1].success);
        assert_eq!(ops.procs.lock().unwrap()[&15].memory_bytes, 400 * MIB);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hung_re_measure_keeps_the_trim() {
        let mut ops = TrimOps::new(&[(15, "frozen", 400)]);
        ops.slow_lookup = Some((15, 1));
        let report =
            trim_processes(Arc::new(ops), &[15], &DenyList::new(&[]), &fast_config()).await;

        assert!(report.results[0].success);
        assert_eq!(report.results[0].freed_mb, 0.0);
        assert_eq!(report.results[0].memory_after_mb, 400.0);
        assert!(report.results[0].message.contains("not re-measured"));
    }

    #[tokio::test]
    async fn permission_failure_asks_for_elevation() {
        let mut ops = TrimOps::new(&[(10, "editor", 400)]);
        ops.elevated = false;
        ops.denied_trim = true;
        let report =
            trim_processes(Arc::new(ops), &[10], &DenyList::new(&[]), &fast_config()).await;
        assert!(report.results[0].message.contains("administrator"));
        assert_eq!(report.total_freed_mb, 0.0);
    }

    #[tokio::test]
    async fn empty_request_is_empty_report() {
        let ops = Arc::new(TrimOps::new(&[]));
        let report = trim_processes(ops, &[], &DenyList::new(&[]), &fast_config()).await;
        assert_eq!(report.processes_attempted, 0);
        assert!(report.results.is_empty());
    }
}
