use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use super::{PlatformExtensions, command_available, run_command};
use crate::error::OsError;
use crate::system::ops::{
    Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
    ServiceStop, Tweak,
};

pub struct Platform;

const TEMP_MIN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

fn home() -> Option<PathBuf> {
    dirs::home_dir()
}

impl PlatformExtensions for Platform {
    fn is_elevated() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn supports(capability: Capability) -> bool {
        match capability {
            // purge(8) flushes the unified buffer cache; there is no finer split.
            Capability::MemoryList(MemoryList::FileCache | MemoryList::Standby) => {
                command_available("purge")
            }
            Capability::MemoryList(MemoryList::Modified) => true,
            Capability::MemoryList(_) => false,
            Capability::PriorityControl => true,
            Capability::WorkingSetTrim | Capability::ForegroundWindow => false,
            Capability::Tweak(_) => false,
            Capability::Service(_) => command_available("launchctl"),
            Capability::NetworkFlush(NetCache::Dns) => command_available("dscacheutil"),
            Capability::NetworkFlush(NetCache::Arp) => command_available("arp"),
            Capability::Cleanup(target) => !Self::cleanup_dirs(target).is_empty(),
        }
    }

    fn trim_working_set(_pid: u32) -> Result<(), OsError> {
        Err(OsError::unsupported("working set trimming on macOS"))
    }

    fn purge_memory_list(list: MemoryList) -> Result<(), OsError> {
        match list {
            MemoryList::Modified => {
                unsafe { libc::sync() };
                Ok(())
            }
            MemoryList::FileCache | MemoryList::Standby => run_command("purge", &[]).map(|_| ()),
            other => Err(OsError::unsupported(format!("{other:?} purge on macOS"))),
        }
    }

    fn set_priority(pid: u32, class: PriorityClass) -> Result<(), OsError> {
        let nice = match class {
            PriorityClass::BelowNormal => 10,
            PriorityClass::AboveNormal => -5,
        };
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(OsError::NotFound(format!("process {pid}"))),
            Some(libc::EPERM) | Some(libc::EACCES) => {
                Err(OsError::PermissionDenied(format!("renice {pid}")))
            }
            _ if err.kind() == ErrorKind::PermissionDenied => {
                Err(OsError::PermissionDenied(format!("renice {pid}")))
            }
            _ => Err(OsError::Io(err)),
        }
    }

    fn foreground_pid() -> Option<u32> {
        None
    }

    fn apply_tweak(tweak: Tweak) -> Result<(), OsError> {
        Err(OsError::unsupported(format!("{tweak:?} on macOS")))
    }

    fn service_candidates(group: ServiceGroup) -> &'static [&'static str] {
        match group {
            ServiceGroup::Telemetry => &["com.apple.analyticsd", "com.apple.SubmitDiagInfo"],
            ServiceGroup::Gaming => &["com.apple.gamed"],
            ServiceGroup::SearchIndexer => &["com.apple.metadata.mds"],
            ServiceGroup::Prefetch => &[],
        }
    }

    fn service_installed(name: &str) -> bool {
        ["/System/Library/LaunchDaemons", "/System/Library/LaunchAgents"]
            .iter()
            .any(|dir| PathBuf::from(dir).join(format!("{name}.plist")).exists())
    }

    fn stop_service(name: &str) -> Result<ServiceStop, OsError> {
        let target = format!("system/{name}");
        if run_command("launchctl", &["print", &target]).is_err() {
            return Ok(ServiceStop::AlreadyStopped);
        }
        run_command("launchctl", &["kill", "TERM", &target]).map(|_| ServiceStop::Stopped)
    }

    fn flush_network_cache(cache: NetCache) -> Result<(), OsError> {
        match cache {
            NetCache::Dns => run_command("dscacheutil", &["-flushcache"]).map(|_| ()),
            NetCache::Arp => run_command("arp", &["-a", "-d"]).map(|_| ()),
        }
    }

    fn cleanup_dirs(target: CleanupTarget) -> Vec<CleanupDir> {
        let mut out = Vec::new();
        match target {
            CleanupTarget::TempFiles => {
                out.push(CleanupDir::all(std::env::temp_dir()).with_min_age(TEMP_MIN_AGE));
            }
            CleanupTarget::Thumbnails => {
                if let Some(cache) = dirs::cache_dir() {
                    out.push(CleanupDir::all(cache.join("com.apple.QuickLook.thumbnailcache")));
                }
            }
            CleanupTarget::ShaderCache => {
                if let Some(cache) = dirs::cache_dir() {
                    out.push(CleanupDir::all(cache.join("com.apple.metal")));
                }
            }
            CleanupTarget::ErrorReports => {
                if let Some(home) = home() {
                    out.push(CleanupDir::all(
                        home.join("Library").join("Logs").join("DiagnosticReports"),
                    ));
                }
            }
        }
        out.retain(|dir| dir.path.is_dir());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_is_unsupported() {
        assert!(matches!(
            Platform::trim_working_set(std::process::id()),
            Err(OsError::Unsupported(_))
        ));
    }

    #[test]
    fn tweaks_are_unsupported() {
        assert!(Platform::apply_tweak(Tweak::TipsOff).is_err());
    }
}
