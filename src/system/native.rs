use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::ops::{
    Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
    ServiceStop, SystemOps, Tweak,
};
use super::platform;
use super::process::ProcessInfo;
use crate::error::OsError;

struct SysState {
    sys: System,
    last_process_refresh: Instant,
}

/// [`SystemOps`] backed by `sysinfo` for reads and the platform module
/// for every mutating call.
pub struct NativeOps {
    state: Mutex<SysState>,
    extra_temp_dirs: Vec<std::path::PathBuf>,
}

fn process_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_memory().with_cpu()
}

impl NativeOps {
    pub fn new(extra_temp_dirs: Vec<std::path::PathBuf>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, process_kind());
        NativeOps {
            state: Mutex::new(SysState {
                sys,
                last_process_refresh: Instant::now(),
            }),
            extra_temp_dirs,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SysState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl Default for NativeOps {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SystemOps for NativeOps {
    fn is_elevated(&self) -> bool {
        platform::is_elevated()
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Cleanup(target) => !self.cleanup_dirs(target).is_empty(),
            other => platform::supports(other),
        }
    }

    fn memory_used(&self) -> u64 {
        self.with_state(|state| {
            state.sys.refresh_memory();
            state.sys.used_memory()
        })
    }

    fn processes(&self) -> Vec<ProcessInfo> {
        self.with_state(|state| {
            // CPU usage is a delta between refreshes; too short a gap reads as zero.
            let since = state.last_process_refresh.elapsed();
            if since < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL - since);
            }
            state
                .sys
                .refresh_processes_specifics(ProcessesToUpdate::All, true, process_kind());
            state.last_process_refresh = Instant::now();
            state
                .sys
                .processes()
                .iter()
                .map(|(pid, p)| ProcessInfo::from_sysinfo(*pid, p))
                .collect()
        })
    }

    fn process(&self, pid: u32) -> Option<ProcessInfo> {
        self.with_state(|state| {
            let target = Pid::from_u32(pid);
            state.sys.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[target]),
                true,
                process_kind(),
            );
            state
                .sys
                .process(target)
                .map(|p| ProcessInfo::from_sysinfo(target, p))
        })
    }

    fn trim_working_set(&self, pid: u32) -> Result<(), OsError> {
        platform::trim_working_set(pid)
    }

    fn purge_memory_list(&self, list: MemoryList) -> Result<(), OsError> {
        platform::purge_memory_list(list)
    }

    fn memory_list_bytes(&self, list: MemoryList) -> Option<u64> {
        platform::memory_list_bytes(list)
    }

    fn set_priority(&self, pid: u32, class: PriorityClass) -> Result<(), OsError> {
        platform::set_priority(pid, class)
    }

    fn foreground_pid(&self) -> Option<u32> {
        platform::foreground_pid()
    }

    fn apply_tweak(&self, tweak: Tweak) -> Result<(), OsError> {
        platform::apply_tweak(tweak)
    }

    fn service_names(&self, group: ServiceGroup) -> Vec<String> {
        platform::service_names(group)
    }

    fn stop_service(&self, name: &str) -> Result<ServiceStop, OsError> {
        platform::stop_service(name)
    }

    fn flush_network_cache(&self, cache: NetCache) -> Result<(), OsError> {
        platform::flush_network_cache(cache)
    }

    fn cleanup_dirs(&self, target: CleanupTarget) -> Vec<CleanupDir> {
        let mut dirs = platform::cleanup_dirs(target);
        if target == CleanupTarget::TempFiles {
            dirs.extend(
                self.extra_temp_dirs
                    .iter()
                    .filter(|path| path.is_dir())
                    .map(|path| CleanupDir::all(path.clone())),
            );
        }
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_own_process() {
        let ops = NativeOps::default();
        let me = ops.process(std::process::id()).unwrap();
        assert_eq!(me.pid, std::process::id());
        assert!(ops.memory_used() > 0);
    }

    #[test]
    fn exited_pid_resolves_to_none() {
        let ops = NativeOps::default();
        assert!(ops.process(u32::MAX - 1).is_none());
    }

    #[test]
    fn extra_temp_dirs_are_cleanup_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let ops = NativeOps::new(vec![tmp.path().to_path_buf()]);
        let dirs = ops.cleanup_dirs(CleanupTarget::TempFiles);
        assert!(dirs.iter().any(|d| d.path == tmp.path()));
        assert!(ops.supports(Capability::Cleanup(CleanupTarget::TempFiles)));
    }
}
