use std::process::Command;

use super::ops::{
    Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
    ServiceStop, Tweak,
};
use crate::error::OsError;

pub trait PlatformExtensions {
    fn is_elevated() -> bool;
    fn supports(capability: Capability) -> bool;
    fn trim_working_set(pid: u32) -> Result<(), OsError>;
    fn purge_memory_list(list: MemoryList) -> Result<(), OsError>;
    fn memory_list_bytes(_list: MemoryList) -> Option<u64> {
        None
    }
    fn set_priority(pid: u32, class: PriorityClass) -> Result<(), OsError>;
    fn foreground_pid() -> Option<u32>;
    fn apply_tweak(tweak: Tweak) -> Result<(), OsError>;
    fn service_candidates(group: ServiceGroup) -> &'static [&'static str];
    fn service_installed(name: &str) -> bool;
    fn stop_service(name: &str) -> Result<ServiceStop, OsError>;
    fn flush_network_cache(cache: NetCache) -> Result<(), OsError>;
    fn cleanup_dirs(target: CleanupTarget) -> Vec<CleanupDir>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

type Platform = platform_impl::Platform;

pub fn is_elevated() -> bool {
    Platform::is_elevated()
}

pub fn supports(capability: Capability) -> bool {
    match capability {
        Capability::Service(group) => !service_names(group).is_empty(),
        other => Platform::supports(other),
    }
}

pub fn trim_working_set(pid: u32) -> Result<(), OsError> {
    Platform::trim_working_set(pid)
}

pub fn purge_memory_list(list: MemoryList) -> Result<(), OsError> {
    Platform::purge_memory_list(list)
}

pub fn memory_list_bytes(list: MemoryList) -> Option<u64> {
    Platform::memory_list_bytes(list)
}

pub fn set_priority(pid: u32, class: PriorityClass) -> Result<(), OsError> {
    Platform::set_priority(pid, class)
}

pub fn foreground_pid() -> Option<u32> {
    Platform::foreground_pid()
}

pub fn apply_tweak(tweak: Tweak) -> Result<(), OsError> {
    Platform::apply_tweak(tweak)
}

pub fn service_names(group: ServiceGroup) -> Vec<String> {
    Platform::service_candidates(group)
        .iter()
        .filter(|name| Platform::service_installed(name))
        .map(|name| name.to_string())
        .collect()
}

pub fn stop_service(name: &str) -> Result<ServiceStop, OsError> {
    Platform::stop_service(name)
}

pub fn flush_network_cache(cache: NetCache) -> Result<(), OsError> {
    Platform::flush_network_cache(cache)
}

pub fn cleanup_dirs(target: CleanupTarget) -> Vec<CleanupDir> {
    Platform::cleanup_dirs(target)
        .into_iter()
        .filter(|dir| dir.path.is_dir())
        .collect()
}

pub(crate) fn command_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run a helper program to completion and return its stdout.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String, OsError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => OsError::unsupported(format!("`{program}` is not installed")),
            _ => OsError::Io(err),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let detail = if stderr.is_empty() { stdout } else { stderr };
    let lower = detail.to_lowercase();
    if lower.contains("access is denied")
        || lower.contains("permission denied")
        || lower.contains("not permitted")
        || lower.contains("authentication is required")
    {
        return Err(OsError::PermissionDenied(format!("{program}: {detail}")));
    }
    Err(OsError::command(program, detail))
}
