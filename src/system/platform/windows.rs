use std::ffi::c_void;
use std::path::PathBuf;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW,
    SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_ELEVATION, TOKEN_PRIVILEGES, TOKEN_QUERY,
    TokenElevation,
};
use windows_sys::Win32::System::Memory::SetSystemFileCacheSize;
use windows_sys::Win32::System::ProcessStatus::K32EmptyWorkingSet;
use windows_sys::Win32::System::Registry::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, RegFlushKey};
use windows_sys::Win32::System::Threading::{
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, GetCurrentProcess, OpenProcess,
    OpenProcessToken, PROCESS_QUERY_INFORMATION, PROCESS_SET_INFORMATION, PROCESS_SET_QUOTA,
    SetPriorityClass,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

use super::{PlatformExtensions, command_available, run_command};
use crate::error::OsError;
use crate::system::ops::{
    Capability, CleanupDir, CleanupTarget, FileFilter, MemoryList, NetCache, PriorityClass,
    ServiceGroup, ServiceStop, Tweak,
};

pub struct Platform;

#[link(name = "ntdll")]
unsafe extern "system" {
    fn NtSetSystemInformation(class: i32, info: *const c_void, length: u32) -> i32;
    fn NtSetTimerResolution(desired: u32, set: u8, current: *mut u32) -> i32;
}

const SYSTEM_MEMORY_LIST_INFORMATION: i32 = 80;
const SYSTEM_COMBINE_PHYSICAL_MEMORY_INFORMATION: i32 = 130;
const MEMORY_FLUSH_MODIFIED_LIST: u32 = 3;
const MEMORY_PURGE_STANDBY_LIST: u32 = 4;
const STATUS_PRIVILEGE_NOT_HELD: i32 = 0xC000_0061_u32 as i32;
const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_INVALID_PARAMETER: i32 = 87;
const HIGH_PERFORMANCE_SCHEME: &str = "8c5e7fda-e8bf-4a96-9a85-a6e23a8c635c";
/// 15.625 ms in 100 ns units.
const DEFAULT_TIMER_RESOLUTION: u32 = 156_250;

#[repr(C)]
struct MemoryCombineInformationEx {
    handle: HANDLE,
    pages_combined: usize,
    flags: u32,
}

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

fn last_error(what: String) -> OsError {
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(ERROR_ACCESS_DENIED) => OsError::PermissionDenied(what),
        Some(ERROR_INVALID_PARAMETER) => OsError::NotFound(what),
        _ => OsError::Io(err),
    }
}

fn open_process(pid: u32, access: u32) -> Result<OwnedHandle, OsError> {
    let handle = unsafe { OpenProcess(access, 0, pid) };
    if handle.is_null() {
        return Err(last_error(format!("process {pid}")));
    }
    Ok(OwnedHandle(handle))
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Enable a named privilege on our own token; memory-list calls need
/// SeProfileSingleProcessPrivilege even when elevated.
fn enable_privilege(name: &str) -> Result<(), OsError> {
    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES, &mut token) == 0 {
            return Err(last_error(format!("token for {name}")));
        }
        let token = OwnedHandle(token);

        let mut privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: std::mem::zeroed(),
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        let wide_name = wide(name);
        if LookupPrivilegeValueW(
            std::ptr::null(),
            wide_name.as_ptr(),
            &mut privileges.Privileges[0].Luid,
        ) == 0
        {
            return Err(last_error(name.to_string()));
        }
        if AdjustTokenPrivileges(
            token.0,
            0,
            &privileges,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        ) == 0
        {
            return Err(last_error(name.to_string()));
        }
    }
    Ok(())
}

fn nt_status(status: i32, what: &str) -> Result<(), OsError> {
    match status {
        0 => Ok(()),
        STATUS_PRIVILEGE_NOT_HELD | STATUS_ACCESS_DENIED => {
            Err(OsError::PermissionDenied(what.to_string()))
        }
        other => Err(OsError::command(
            "ntdll",
            format!("{what} failed with NTSTATUS {other:#010x}"),
        )),
    }
}

fn memory_list_command(command: u32) -> Result<(), OsError> {
    enable_privilege("SeProfileSingleProcessPrivilege")?;
    let status = unsafe {
        NtSetSystemInformation(
            SYSTEM_MEMORY_LIST_INFORMATION,
            (&command as *const u32).cast(),
            std::mem::size_of::<u32>() as u32,
        )
    };
    nt_status(status, "memory list command")
}

fn reg_dword(key: &str, value: &str, data: &str) -> Result<(), OsError> {
    run_command(
        "reg",
        &["add", key, "/v", value, "/t", "REG_DWORD", "/d", data, "/f"],
    )
    .map(|_| ())
}

fn local_app_data() -> Option<PathBuf> {
    dirs::data_local_dir()
}

impl PlatformExtensions for Platform {
    fn is_elevated() -> bool {
        unsafe {
            let mut token: HANDLE = std::ptr::null_mut();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
                return false;
            }
            let token = OwnedHandle(token);
            let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
            let mut returned = 0u32;
            let ok = GetTokenInformation(
                token.0,
                TokenElevation,
                (&mut elevation as *mut TOKEN_ELEVATION).cast(),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            );
            ok != 0 && elevation.TokenIsElevated != 0
        }
    }

    fn supports(capability: Capability) -> bool {
        match capability {
            Capability::WorkingSetTrim
            | Capability::MemoryList(_)
            | Capability::PriorityControl
            | Capability::ForegroundWindow => true,
            Capability::Tweak(Tweak::HighPerformancePower) => command_available("powercfg"),
            Capability::Tweak(Tweak::TimerResolution) => true,
            Capability::Tweak(_) => command_available("reg"),
            Capability::Service(_) => command_available("sc"),
            Capability::NetworkFlush(NetCache::Dns) => command_available("ipconfig"),
            Capability::NetworkFlush(NetCache::Arp) => command_available("netsh"),
            Capability::Cleanup(target) => !Self::cleanup_dirs(target).is_empty(),
        }
    }

    fn trim_working_set(pid: u32) -> Result<(), OsError> {
        let handle = open_process(pid, PROCESS_SET_QUOTA | PROCESS_QUERY_INFORMATION)?;
        if unsafe { K32EmptyWorkingSet(handle.0) } == 0 {
            return Err(last_error(format!("trim {pid}")));
        }
        Ok(())
    }

    fn purge_memory_list(list: MemoryList) -> Result<(), OsError> {
        match list {
            MemoryList::Standby => memory_list_command(MEMORY_PURGE_STANDBY_LIST),
            MemoryList::Modified => memory_list_command(MEMORY_FLUSH_MODIFIED_LIST),
            MemoryList::Combined => {
                enable_privilege("SeProfileSingleProcessPrivilege")?;
                let info = MemoryCombineInformationEx {
                    handle: std::ptr::null_mut(),
                    pages_combined: 0,
                    flags: 0,
                };
                let status = unsafe {
                    NtSetSystemInformation(
                        SYSTEM_COMBINE_PHYSICAL_MEMORY_INFORMATION,
                        (&info as *const MemoryCombineInformationEx).cast(),
                        std::mem::size_of::<MemoryCombineInformationEx>() as u32,
                    )
                };
                nt_status(status, "page combining")
            }
            MemoryList::FileCache => {
                enable_privilege("SeIncreaseQuotaPrivilege")?;
                if unsafe { SetSystemFileCacheSize(usize::MAX, usize::MAX, 0) } == 0 {
                    return Err(last_error("system file cache".to_string()));
                }
                Ok(())
            }
            MemoryList::RegistryCache => {
                for (root, label) in [(HKEY_LOCAL_MACHINE, "HKLM"), (HKEY_CURRENT_USER, "HKCU")] {
                    let rc = unsafe { RegFlushKey(root) };
                    if rc as i32 == ERROR_ACCESS_DENIED {
                        return Err(OsError::PermissionDenied(label.to_string()));
                    }
                    if rc != 0 {
                        return Err(OsError::command("RegFlushKey", format!("{label}: {rc}")));
                    }
                }
                Ok(())
            }
        }
    }

    fn set_priority(pid: u32, class: PriorityClass) -> Result<(), OsError> {
        let handle = open_process(pid, PROCESS_SET_INFORMATION)?;
        let value = match class {
            PriorityClass::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
            PriorityClass::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
        };
        if unsafe { SetPriorityClass(handle.0, value) } == 0 {
            return Err(last_error(format!("priority {pid}")));
        }
        Ok(())
    }

    fn foreground_pid() -> Option<u32> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.is_null() {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, &mut pid);
            (pid != 0).then_some(pid)
        }
    }

    fn apply_tweak(tweak: Tweak) -> Result<(), OsError> {
        match tweak {
            Tweak::HighPerformancePower => {
                run_command("powercfg", &["/setactive", HIGH_PERFORMANCE_SCHEME]).map(|_| ())
            }
            Tweak::TimerResolution => {
                let mut current = 0u32;
                let status =
                    unsafe { NtSetTimerResolution(DEFAULT_TIMER_RESOLUTION, 0, &mut current) };
                nt_status(status, "timer resolution")
            }
            Tweak::GameCaptureOff => {
                reg_dword(
                    r"HKCU\SOFTWARE\Microsoft\Windows\CurrentVersion\GameDVR",
                    "AppCaptureEnabled",
                    "0",
                )?;
                reg_dword(r"HKCU\System\GameConfigStore", "GameDVR_Enabled", "0")
            }
            Tweak::TipsOff => {
                let key = r"HKCU\SOFTWARE\Microsoft\Windows\CurrentVersion\ContentDeliveryManager";
                for value in [
                    "SoftLandingEnabled",
                    "SubscribedContent-338388Enabled",
                    "SubscribedContent-310093Enabled",
                ] {
                    reg_dword(key, value, "0")?;
                }
                Ok(())
            }
        }
    }

    fn service_candidates(group: ServiceGroup) -> &'static [&'static str] {
        match group {
            ServiceGroup::Telemetry => &["DiagTrack", "dmwappushservice"],
            ServiceGroup::Gaming => &["XblAuthManager", "XblGameSave", "XboxNetApiSvc", "XboxGipSvc"],
            ServiceGroup::SearchIndexer => &["WSearch"],
            ServiceGroup::Prefetch => &["SysMain"],
        }
    }

    fn service_installed(name: &str) -> bool {
        run_command("sc", &["query", name]).is_ok()
    }

    fn stop_service(name: &str) -> Result<ServiceStop, OsError> {
        let state = run_command("sc", &["query", name])?;
        if state.contains("STOPPED") {
            return Ok(ServiceStop::AlreadyStopped);
        }
        match run_command("sc", &["stop", name]) {
            Ok(_) => Ok(ServiceStop::Stopped),
            // 1062: the service has not been started.
            Err(OsError::Command { detail, .. }) if detail.contains("1062") => {
                Ok(ServiceStop::AlreadyStopped)
            }
            Err(err) => Err(err),
        }
    }

    fn flush_network_cache(cache: NetCache) -> Result<(), OsError> {
        match cache {
            NetCache::Dns => run_command("ipconfig", &["/flushdns"]).map(|_| ()),
            NetCache::Arp => {
                run_command("netsh", &["interface", "ip", "delete", "arpcache"]).map(|_| ())
            }
        }
    }

    fn cleanup_dirs(target: CleanupTarget) -> Vec<CleanupDir> {
        let local = local_app_data();
        let mut out = Vec::new();
        match target {
            CleanupTarget::TempFiles => {
                out.push(CleanupDir::all(std::env::temp_dir()));
                out.push(CleanupDir::all(r"C:\Windows\Temp"));
            }
            CleanupTarget::Thumbnails => {
                if let Some(local) = &local {
                    out.push(CleanupDir {
                        path: local.join(r"Microsoft\Windows\Explorer"),
                        filter: FileFilter::Affixes {
                            prefix: "thumbcache_",
                            suffix: ".db",
                        },
                        min_age: None,
                    });
                }
            }
            CleanupTarget::ShaderCache => {
                if let Some(local) = &local {
                    out.push(CleanupDir::all(local.join("D3DSCache")));
                }
            }
            CleanupTarget::ErrorReports => {
                if let Some(local) = &local {
                    out.push(CleanupDir::all(local.join("CrashDumps")));
                    out.push(CleanupDir::all(local.join(r"Microsoft\Windows\WER")));
                }
                out.push(CleanupDir::all(r"C:\ProgramData\Microsoft\Windows\WER\ReportQueue"));
                out.push(CleanupDir::all(r"C:\ProgramData\Microsoft\Windows\WER\ReportArchive"));
            }
        }
        out.retain(|dir| dir.path.is_dir());
        out
    }
}
