//! The OS collaborator seam. The executor and the trim path only talk to
//! the machine through [`SystemOps`], so tests can substitute a fake.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::process::ProcessInfo;
use crate::error::OsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryList {
    FileCache,
    Standby,
    Modified,
    Combined,
    RegistryCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    BelowNormal,
    AboveNormal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tweak {
    HighPerformancePower,
    TimerResolution,
    GameCaptureOff,
    TipsOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceGroup {
    Telemetry,
    Gaming,
    SearchIndexer,
    Prefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetCache {
    Dns,
    Arp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupTarget {
    TempFiles,
    Thumbnails,
    ShaderCache,
    ErrorReports,
}

/// Something an optimization needs from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    WorkingSetTrim,
    MemoryList(MemoryList),
    PriorityControl,
    ForegroundWindow,
    Tweak(Tweak),
    Service(ServiceGroup),
    NetworkFlush(NetCache),
    Cleanup(CleanupTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStop {
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    Any,
    Affixes {
        prefix: &'static str,
        suffix: &'static str,
    },
}

impl FileFilter {
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            FileFilter::Any => true,
            FileFilter::Affixes { prefix, suffix } => {
                file_name.starts_with(prefix) && file_name.ends_with(suffix)
            }
        }
    }
}

/// A directory whose matching contents a cleanup action may delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupDir {
    pub path: PathBuf,
    pub filter: FileFilter,
    /// Files modified more recently than this are left alone.
    pub min_age: Option<Duration>,
}

impl CleanupDir {
    pub fn all(path: impl Into<PathBuf>) -> Self {
        CleanupDir {
            path: path.into(),
            filter: FileFilter::Any,
            min_age: None,
        }
    }

    pub fn with_min_age(mut self, age: Duration) -> Self {
        self.min_age = Some(age);
        self
    }
}

pub trait SystemOps: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// Availability probe evaluated when the catalog is fetched.
    fn supports(&self, capability: Capability) -> bool;

    /// Used physical memory in bytes.
    fn memory_used(&self) -> u64;

    /// Fresh process listing with current memory and CPU usage.
    fn processes(&self) -> Vec<ProcessInfo>;

    /// Re-resolve a single pid; `None` once the process has exited.
    fn process(&self, pid: u32) -> Option<ProcessInfo>;

    fn trim_working_set(&self, pid: u32) -> Result<(), OsError>;

    fn purge_memory_list(&self, list: MemoryList) -> Result<(), OsError>;

    /// Bytes currently held by `list`, when the platform exposes it.
    fn memory_list_bytes(&self, _list: MemoryList) -> Option<u64> {
        None
    }

    fn set_priority(&self, pid: u32, class: PriorityClass) -> Result<(), OsError>;

    fn foreground_pid(&self) -> Option<u32>;

    fn apply_tweak(&self, tweak: Tweak) -> Result<(), OsError>;

    /// Installed service names belonging to `group`.
    fn service_names(&self, group: ServiceGroup) -> Vec<String>;

    fn stop_service(&self, name: &str) -> Result<ServiceStop, OsError>;

    fn flush_network_cache(&self, cache: NetCache) -> Result<(), OsError>;

    fn cleanup_dirs(&self, target: CleanupTarget) -> Vec<CleanupDir>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affix_filter() {
        let filter = FileFilter::Affixes {
            prefix: "thumbcache_",
            suffix: ".db",
        };
        assert!(filter.matches("thumbcache_256.db"));
        assert!(!filter.matches("iconcache_256.db"));
        assert!(FileFilter::Any.matches("anything"));
    }
}
