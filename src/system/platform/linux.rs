use std::io::ErrorKind;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::Duration;

use super::{PlatformExtensions, command_available, run_command};
use crate::error::OsError;
use crate::system::ops::{
    Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
    ServiceStop, Tweak,
};

pub struct Platform;

const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";
const COMPACT_MEMORY: &str = "/proc/sys/vm/compact_memory";
const UNIT_DIRS: [&str; 3] = ["/etc/systemd/system", "/lib/systemd/system", "/usr/lib/systemd/system"];
const TEMP_MIN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Pseudo mappings the kernel refuses to page out.
const SPECIAL_MAPPINGS: [&str; 4] = ["[vsyscall]", "[vvar]", "[vvar_vclock]", "[vdso]"];

/// Address ranges in a `/proc/<pid>/maps` listing that are worth paging
/// out: readable, private to the process and backed by real pages.
/// Shared mappings are skipped so other processes are never affected.
fn pageout_ranges(maps: &str) -> Vec<(usize, usize)> {
    maps.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let range = fields.next()?;
            let perms = fields.next()?.as_bytes();
            let path = fields.nth(3).unwrap_or("");
            if perms.len() < 4 || perms[0] != b'r' || perms[3] != b'p' {
                return None;
            }
            if SPECIAL_MAPPINGS.contains(&path) {
                return None;
            }
            let (start, end) = range.split_once('-')?;
            let start = usize::from_str_radix(start, 16).ok()?;
            let end = usize::from_str_radix(end, 16).ok()?;
            (end > start).then_some((start, end))
        })
        .collect()
}

/// Value of `key` in a `/proc/meminfo` listing, in bytes.
fn meminfo_bytes(meminfo: &str, key: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name != key {
            return None;
        }
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// Which `/proc/meminfo` counter approximates what purging `list` frees.
fn meminfo_key(list: MemoryList) -> Option<&'static str> {
    match list {
        MemoryList::FileCache => Some("Cached"),
        MemoryList::Standby => Some("Inactive(file)"),
        MemoryList::Modified => Some("Dirty"),
        MemoryList::RegistryCache => Some("SReclaimable"),
        MemoryList::Combined => None,
    }
}

fn errno_error(errno: i32, pid: u32) -> OsError {
    match errno {
        libc::ESRCH => OsError::NotFound(format!("process {pid}")),
        libc::EPERM | libc::EACCES => OsError::PermissionDenied(format!("page out {pid}")),
        libc::ENOSYS | libc::EINVAL => OsError::unsupported("process_madvise(MADV_PAGEOUT)"),
        _ => OsError::Io(std::io::Error::from_raw_os_error(errno)),
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

fn pidfd_open(pid: u32) -> Result<OwnedFd, i32> {
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0) };
    if fd < 0 {
        return Err(last_errno());
    }
    // The kernel handed us a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// Ask the kernel to page out `ranges` of the process behind `pidfd`.
fn process_madvise(pidfd: &OwnedFd, ranges: &[libc::iovec]) -> Result<(), i32> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_process_madvise,
            pidfd.as_raw_fd(),
            ranges.as_ptr(),
            ranges.len(),
            libc::MADV_PAGEOUT,
            0u32,
        )
    };
    if rc < 0 { Err(last_errno()) } else { Ok(()) }
}

fn write_proc(path: &str, value: &str) -> Result<(), OsError> {
    std::fs::write(path, value).map_err(|err| match err.kind() {
        ErrorKind::PermissionDenied => OsError::PermissionDenied(path.to_string()),
        ErrorKind::NotFound => OsError::unsupported(path.to_string()),
        _ => OsError::Io(err),
    })
}

fn unit_name(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

impl PlatformExtensions for Platform {
    fn is_elevated() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn supports(capability: Capability) -> bool {
        match capability {
            // An empty vector still validates the syscall and the advice.
            Capability::WorkingSetTrim => match pidfd_open(std::process::id()) {
                Ok(pidfd) => match process_madvise(&pidfd, &[]) {
                    Ok(()) => true,
                    Err(errno) => errno != libc::ENOSYS && errno != libc::EINVAL,
                },
                Err(_) => false,
            },
            Capability::MemoryList(MemoryList::Combined) => Path::new(COMPACT_MEMORY).exists(),
            Capability::MemoryList(MemoryList::Modified) => true,
            Capability::MemoryList(_) => Path::new(DROP_CACHES).exists(),
            Capability::PriorityControl => true,
            Capability::ForegroundWindow => false,
            Capability::Tweak(Tweak::HighPerformancePower) => command_available("powerprofilesctl"),
            Capability::Tweak(_) => false,
            Capability::Service(_) => command_available("systemctl"),
            Capability::NetworkFlush(NetCache::Dns) => command_available("resolvectl"),
            Capability::NetworkFlush(NetCache::Arp) => command_available("ip"),
            Capability::Cleanup(target) => !Self::cleanup_dirs(target).is_empty(),
        }
    }

    fn trim_working_set(pid: u32) -> Result<(), OsError> {
        // Page out the private memory of this one process. Each range is
        // advised on its own so one locked or special mapping only costs
        // that range.
        let pidfd = pidfd_open(pid).map_err(|errno| match errno {
            libc::EINVAL => OsError::NotFound(format!("process {pid}")),
            other => errno_error(other, pid),
        })?;
        let maps = std::fs::read_to_string(format!("/proc/{pid}/maps")).map_err(|err| {
            match err.kind() {
                ErrorKind::NotFound => OsError::NotFound(format!("process {pid}")),
                ErrorKind::PermissionDenied => {
                    OsError::PermissionDenied(format!("/proc/{pid}/maps"))
                }
                _ => OsError::Io(err),
            }
        })?;
        let ranges = pageout_ranges(&maps);

        let mut advised = 0usize;
        let mut last_err = None;
        for (start, end) in &ranges {
            let iov = libc::iovec {
                iov_base: *start as *mut libc::c_void,
                iov_len: end - start,
            };
            match process_madvise(&pidfd, &[iov]) {
                Ok(()) => advised += 1,
                // Every range would fail the same way.
                Err(errno @ (libc::ESRCH | libc::EPERM | libc::ENOSYS)) => {
                    return Err(errno_error(errno, pid));
                }
                Err(errno) => last_err = Some(errno),
            }
        }
        tracing::trace!(pid, ranges = ranges.len(), advised, "paged out");
        match last_err {
            Some(errno) if advised == 0 => Err(errno_error(errno, pid)),
            _ => Ok(()),
        }
    }

    fn purge_memory_list(list: MemoryList) -> Result<(), OsError> {
        match list {
            MemoryList::Modified => {
                unsafe { libc::sync() };
                Ok(())
            }
            MemoryList::Combined => write_proc(COMPACT_MEMORY, "1"),
            MemoryList::FileCache => {
                unsafe { libc::sync() };
                write_proc(DROP_CACHES, "1")
            }
            MemoryList::RegistryCache => write_proc(DROP_CACHES, "2"),
            MemoryList::Standby => {
                unsafe { libc::sync() };
                write_proc(DROP_CACHES, "3")
            }
        }
    }

    fn memory_list_bytes(list: MemoryList) -> Option<u64> {
        let key = meminfo_key(list)?;
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        meminfo_bytes(&meminfo, key)
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
        match err.kind() {
            ErrorKind::PermissionDenied => Err(OsError::PermissionDenied(format!("renice {pid}"))),
            ErrorKind::NotFound => Err(OsError::NotFound(format!("process {pid}"))),
            _ if err.raw_os_error() == Some(libc::ESRCH) => {
                Err(OsError::NotFound(format!("process {pid}")))
            }
            _ if err.raw_os_error() == Some(libc::EPERM) => {
                Err(OsError::PermissionDenied(format!("renice {pid}")))
            }
            _ => Err(OsError::Io(err)),
        }
    }

    fn foreground_pid() -> Option<u32> {
        None
    }

    fn apply_tweak(tweak: Tweak) -> Result<(), OsError> {
        match tweak {
            Tweak::HighPerformancePower => {
                run_command("powerprofilesctl", &["set", "performance"]).map(|_| ())
            }
            other => Err(OsError::unsupported(format!("{other:?}"))),
        }
    }

    fn service_candidates(group: ServiceGroup) -> &'static [&'static str] {
        match group {
            ServiceGroup::Telemetry => &["whoopsie", "apport", "kerneloops"],
            ServiceGroup::Gaming => &["gamemoded"],
            ServiceGroup::SearchIndexer => &["plocate-updatedb.timer", "mlocate.timer"],
            ServiceGroup::Prefetch => &["preload"],
        }
    }

    fn service_installed(name: &str) -> bool {
        let unit = unit_name(name);
        UNIT_DIRS
            .iter()
            .any(|dir| Path::new(dir).join(&unit).exists())
    }

    fn stop_service(name: &str) -> Result<ServiceStop, OsError> {
        let unit = unit_name(name);
        // `is-active` exits non-zero for anything but an active unit.
        if run_command("systemctl", &["is-active", "--quiet", &unit]).is_err() {
            return Ok(ServiceStop::AlreadyStopped);
        }
        run_command("systemctl", &["stop", &unit]).map(|_| ServiceStop::Stopped)
    }

    fn flush_network_cache(cache: NetCache) -> Result<(), OsError> {
        match cache {
            NetCache::Dns => run_command("resolvectl", &["flush-caches"]).map(|_| ()),
            NetCache::Arp => run_command("ip", &["neigh", "flush", "all"]).map(|_| ()),
        }
    }

    fn cleanup_dirs(target: CleanupTarget) -> Vec<CleanupDir> {
        let cache = dirs::cache_dir();
        let mut out = Vec::new();
        match target {
            CleanupTarget::TempFiles => {
                out.push(CleanupDir::all(std::env::temp_dir()).with_min_age(TEMP_MIN_AGE));
                out.push(CleanupDir::all("/var/tmp").with_min_age(TEMP_MIN_AGE));
            }
            CleanupTarget::Thumbnails => {
                if let Some(cache) = cache {
                    out.push(CleanupDir::all(cache.join("thumbnails")));
                }
            }
            CleanupTarget::ShaderCache => {
                if let Some(cache) = cache {
                    out.push(CleanupDir::all(cache.join("mesa_shader_cache")));
                    out.push(CleanupDir::all(cache.join("nvidia").join("GLCache")));
                }
            }
            CleanupTarget::ErrorReports => out.push(CleanupDir::all("/var/crash")),
        }
        out.retain(|dir| dir.path.is_dir());
        out.dedup_by(|a, b| a.path == b.path);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c2a00000-55d0c2a21000 r--p 00000000 fd:01 1311 /usr/bin/cat
55d0c2a21000-55d0c2a3a000 r-xp 00021000 fd:01 1311 /usr/bin/cat
55d0c4000000-55d0c4021000 rw-p 00000000 00:00 0 [heap]
7f1e00000000-7f1e00200000 rw-s 00000000 00:01 4242 /dev/shm/pulse-shm-1
7f1e00400000-7f1e00401000 ---p 00000000 00:00 0
7f1e00600000-7f1e00800000 rw-p 00000000 00:00 0
7ffd1a000000-7ffd1a021000 rw-p 00000000 00:00 0 [stack]
7ffd1a1f0000-7ffd1a1f4000 r--p 00000000 00:00 0 [vvar]
7ffd1a1f4000-7ffd1a1f6000 r-xp 00000000 00:00 0 [vdso]
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0 [vsyscall]
";

    #[test]
    fn only_private_readable_mappings_are_paged_out() {
        let ranges = pageout_ranges(MAPS);
        assert_eq!(
            ranges,
            vec![
                (0x55d0c2a00000, 0x55d0c2a21000),
                (0x55d0c2a21000, 0x55d0c2a3a000),
                (0x55d0c4000000, 0x55d0c4021000),
                (0x7f1e00600000, 0x7f1e00800000),
                (0x7ffd1a000000, 0x7ffd1a021000),
            ]
        );
    }

    #[test]
    fn malformed_maps_lines_are_ignored() {
        assert!(pageout_ranges("garbage\nzz-10 rw-p\n").is_empty());
        assert!(pageout_ranges("").is_empty());
    }

    #[test]
    fn own_maps_have_pageable_ranges() {
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        assert!(!pageout_ranges(&maps).is_empty());
    }

    #[test]
    fn trimming_self_pages_out_or_reports_why_not() {
        // Older kernels and seccomp sandboxes refuse; they must say so.
        match Platform::trim_working_set(std::process::id()) {
            Ok(()) => {}
            Err(OsError::Unsupported(_)) | Err(OsError::PermissionDenied(_)) => {}
            Err(other) => panic!("unexpected trim error: {other}"),
        }
    }

    #[test]
    fn trimming_a_missing_pid_is_not_found() {
        let err = Platform::trim_working_set(u32::MAX - 1).unwrap_err();
        assert!(matches!(err, OsError::NotFound(_) | OsError::Unsupported(_)));
    }

    #[test]
    fn meminfo_counters_are_read_in_bytes() {
        let meminfo = "MemTotal:       16315084 kB\nCached:          4021316 kB\nInactive(file):  1500000 kB\nDirty:               292 kB\n";
        assert_eq!(meminfo_bytes(meminfo, "Cached"), Some(4_021_316 * 1024));
        assert_eq!(meminfo_bytes(meminfo, "Dirty"), Some(292 * 1024));
        assert_eq!(meminfo_bytes(meminfo, "SwapCached"), None);
        assert!(Platform::memory_list_bytes(MemoryList::FileCache).is_some());
        assert_eq!(Platform::memory_list_bytes(MemoryList::Combined), None);
    }

    #[test]
    fn unit_names_default_to_service() {
        assert_eq!(unit_name("preload"), "preload.service");
        assert_eq!(unit_name("mlocate.timer"), "mlocate.timer");
    }
}
