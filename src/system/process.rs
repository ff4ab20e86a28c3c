use std::collections::{HashMap, HashSet};

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Sleeping,
    Idle,
    Stopped,
    Zombie,
    Other,
}

impl From<sysinfo::ProcessStatus> for ProcessState {
    fn from(status: sysinfo::ProcessStatus) -> Self {
        use sysinfo::ProcessStatus;
        match status {
            ProcessStatus::Run => ProcessState::Running,
            ProcessStatus::Sleep => ProcessState::Sleeping,
            ProcessStatus::Idle => ProcessState::Idle,
            ProcessStatus::Stop => ProcessState::Stopped,
            ProcessStatus::Zombie | ProcessStatus::Dead => ProcessState::Zombie,
            _ => ProcessState::Other,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub state: ProcessState,
    pub children: Vec<u32>,
}

impl ProcessInfo {
    pub fn from_sysinfo(pid: sysinfo::Pid, process: &sysinfo::Process) -> Self {
        ProcessInfo {
            pid: pid.as_u32(),
            ppid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
            name: process.name().to_string_lossy().to_string(),
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
            state: process.status().into(),
            children: Vec::new(),
        }
    }

    /// Lowercase executable name without a trailing `.exe`, used for
    /// instance counting and deny-list matching.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

pub fn name_key(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProcessTable {
    pub processes: HashMap<u32, ProcessInfo>,
}

pub fn build_process_table_from_flat(processes: Vec<ProcessInfo>) -> ProcessTable {
    let mut by_pid = HashMap::with_capacity(processes.len());
    for mut process in processes {
        // Build parent-child links from pid/ppid only.
        process.children.clear();
        by_pid.insert(process.pid, process);
    }

    let pids: Vec<u32> = by_pid.keys().copied().collect();
    for pid in pids {
        let ppid = by_pid.get(&pid).map(|p| p.ppid).unwrap_or(0);
        if ppid != pid
            && let Some(parent) = by_pid.get_mut(&ppid)
        {
            parent.children.push(pid);
        }
    }

    for process in by_pid.values_mut() {
        process.children.sort_unstable();
    }

    ProcessTable { processes: by_pid }
}

impl ProcessTable {
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessInfo> {
        self.processes.get(&pid)
    }

    /// `pid` followed by its parent chain up to the root. Stops on a
    /// missing parent or a cycle.
    pub fn lineage(&self, pid: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = pid;
        while seen.insert(current) {
            chain.push(current);
            match self.processes.get(&current) {
                Some(p) if p.ppid != 0 && self.processes.contains_key(&p.ppid) => {
                    current = p.ppid;
                }
                _ => break,
            }
        }
        chain
    }

    /// Number of running instances per `name_key`.
    pub fn instance_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for p in self.processes.values() {
            *counts.entry(p.name_key()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn build_table() -> ProcessTable {
        build_process_table_from_flat(vec![
            proc(1, 0, "init"),
            proc(20, 1, "sshd"),
            proc(30, 20, "bash"),
            proc(40, 30, "trimtop"),
            proc(41, 30, "Chrome.exe"),
            proc(42, 30, "chrome"),
        ])
    }

    #[test]
    fn links_children() {
        let table = build_table();
        assert_eq!(table.get(30).unwrap().children, vec![40, 41, 42]);
        assert_eq!(table.get(1).unwrap().children, vec![20]);
    }

    #[test]
    fn lineage_walks_to_root() {
        let table = build_table();
        assert_eq!(table.lineage(40), vec![40, 30, 20, 1]);
        assert_eq!(table.lineage(9999), vec![9999]);
    }

    #[test]
    fn lineage_survives_cycles() {
        let table = build_process_table_from_flat(vec![proc(5, 6, "a"), proc(6, 5, "b")]);
        assert_eq!(table.lineage(5), vec![5, 6]);
    }

    #[test]
    fn instance_counts_normalize_names() {
        let table = build_table();
        assert_eq!(table.instance_counts().get("chrome"), Some(&2));
        assert_eq!(name_key(" Svchost.EXE "), "svchost");
    }
}
