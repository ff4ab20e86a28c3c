use std::collections::HashSet;

use crate::system::process::{ProcessInfo, ProcessTable, name_key};

/// Processes that are never suggested and never trimmed, matched by
/// `name_key`.
const CRITICAL_NAMES: &[&str] = &[
    // Windows
    "system",
    "system idle process",
    "secure system",
    "registry",
    "memory compression",
    "smss",
    "csrss",
    "wininit",
    "services",
    "lsass",
    "svchost",
    "winlogon",
    "dwm",
    "explorer",
    "taskhostw",
    "runtimebroker",
    "ntoskrnl",
    // Linux
    "init",
    "systemd",
    "systemd-journald",
    "systemd-logind",
    "systemd-udevd",
    "kthreadd",
    "dbus-daemon",
    "xorg",
    "xwayland",
    "gnome-shell",
    "kwin_wayland",
    "pipewire",
    "sshd",
    // macOS
    "launchd",
    "kernel_task",
    "windowserver",
    "loginwindow",
];

/// Linux parents every kernel thread under the process with this name.
const KERNEL_THREAD_PARENT: &str = "kthreadd";

#[derive(Debug, Clone, Default)]
pub struct DenyList {
    names: HashSet<String>,
    pids: HashSet<u32>,
    /// Pids of `kthreadd` seen in the table; their children are kernel threads.
    kernel_thread_parents: HashSet<u32>,
}

impl DenyList {
    /// Built-in critical names plus `extra` user-configured ones.
    pub fn new(extra: &[String]) -> Self {
        let names = CRITICAL_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(extra.iter().map(|n| name_key(n)))
            .collect();
        DenyList {
            names,
            pids: HashSet::new(),
            kernel_thread_parents: HashSet::new(),
        }
    }

    /// Protect the children of every `kthreadd` in `table`.
    pub fn with_kernel_threads(mut self, table: &ProcessTable) -> Self {
        self.kernel_thread_parents.extend(
            table
                .processes
                .values()
                .filter(|p| p.name_key() == KERNEL_THREAD_PARENT)
                .map(|p| p.pid),
        );
        self
    }

    /// Also protect `pid` and every ancestor of it found in `table`, so
    /// the toolkit never trims itself or the shell that launched it.
    pub fn with_lineage(mut self, table: &ProcessTable, pid: u32) -> Self {
        self.pids.extend(table.lineage(pid));
        self
    }

    pub fn for_current_process(table: &ProcessTable, extra: &[String]) -> Self {
        DenyList::new(extra)
            .with_kernel_threads(table)
            .with_lineage(table, std::process::id())
    }

    pub fn is_denied(&self, process: &ProcessInfo) -> bool {
        process.pid <= 1
            || self.kernel_thread_parents.contains(&process.ppid)
            || self.pids.contains(&process.pid)
            || self.names.contains(&process.name_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::process::{ProcessState, build_process_table_from_flat};

    fn proc(pid: u32, ppid: u32, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            name: name.to_string(),
            memory_bytes: 0,
            cpu_percent: 0.0,
            state: ProcessState::Sleeping,
            children: Vec::new(),
        }
    }

    #[test]
    fn critical_names_match_case_and_extension_insensitively() {
        let deny = DenyList::new(&[]);
        assert!(deny.is_denied(&proc(500, 4, "SvcHost.exe")));
        assert!(deny.is_denied(&proc(501, 1, "systemd")));
        assert!(!deny.is_denied(&proc(502, 1, "firefox")));
    }

    #[test]
    fn low_pids_and_kernel_threads_are_denied() {
        let table = build_process_table_from_flat(vec![
            proc(1, 0, "systemd"),
            proc(2, 0, "kthreadd"),
            proc(77, 2, "kworker/0:1"),
        ]);
        let deny = DenyList::new(&[]).with_kernel_threads(&table);
        assert!(deny.is_denied(&proc(0, 0, "anything")));
        assert!(deny.is_denied(&proc(1, 0, "anything")));
        assert!(deny.is_denied(&proc(2, 0, "kthreadd")));
        assert!(deny.is_denied(&proc(77, 2, "kworker/0:1")));
    }

    #[test]
    fn pid_two_is_only_special_when_it_is_kthreadd() {
        // No kthreadd on macOS or Windows, or in a pid namespace.
        let table = build_process_table_from_flat(vec![
            proc(1, 0, "init"),
            proc(2, 1, "someapp"),
            proc(40, 2, "someapp-helper"),
        ]);
        let deny = DenyList::new(&[]).with_kernel_threads(&table);
        assert!(!deny.is_denied(&proc(2, 1, "someapp")));
        assert!(!deny.is_denied(&proc(40, 2, "someapp-helper")));
    }

    #[test]
    fn configured_names_are_normalized() {
        let deny = DenyList::new(&["MyAgent.EXE".to_string()]);
        assert!(deny.is_denied(&proc(900, 1, "myagent")));
    }

    #[test]
    fn own_lineage_is_denied() {
        let table = build_process_table_from_flat(vec![
            proc(10, 1, "terminal"),
            proc(20, 10, "bash"),
            proc(30, 20, "trimtop"),
            proc(31, 20, "vim"),
        ]);
        let deny = DenyList::new(&[]).with_lineage(&table, 30);
        assert!(deny.is_denied(&proc(30, 20, "trimtop")));
        assert!(deny.is_denied(&proc(20, 10, "bash")));
        assert!(deny.is_denied(&proc(10, 1, "terminal")));
        assert!(!deny.is_denied(&proc(31, 20, "vim")));
    }
}
