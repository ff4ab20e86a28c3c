use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trimtop::Engine;
use trimtop::advisor::SuggestionCategory;
use trimtop::catalog::OptimizationItem;
use trimtop::config::Config;
use trimtop::error::OsError;
use trimtop::system::collector::SnapshotSource;
use trimtop::system::ops::{
    Capability, CleanupDir, CleanupTarget, MemoryList, NetCache, PriorityClass, ServiceGroup,
    ServiceStop, SystemOps, Tweak,
};
use trimtop::system::process::{ProcessInfo, ProcessState, build_process_table_from_flat};
use trimtop::system::snapshot::{MountUsage, SystemSnapshot};

const MB: u64 = 1024 * 1024;

fn proc(pid: u32, ppid: u32, name: &str, mb: u64, cpu: f32) -> ProcessInfo {
    ProcessInfo {
        pid,
        ppid,
        name: name.to_string(),
        memory_bytes: mb * MB,
        cpu_percent: cpu,
        state: ProcessState::Sleeping,
        children: Vec::new(),
    }
}

fn machine() -> Vec<ProcessInfo> {
    vec![
        proc(1, 0, "systemd", 40, 0.0),
        proc(4001, 1, "chrome", 900, 0.5),
        proc(4002, 1, "slack", 200, 0.1),
        proc(4003, 1, "sshd", 10, 0.0),
    ]
}

struct FakeSource {
    processes: Vec<ProcessInfo>,
}

impl SnapshotSource for FakeSource {
    fn sample(&mut self) -> SystemSnapshot {
        SystemSnapshot {
            cpu_usage_percent: 20.0,
            cpu_per_core: vec![10.0, 30.0],
            memory_total: 16 * 1024 * MB,
            memory_used: 8 * 1024 * MB,
            uptime_secs: 3 * 86_400,
            mounts: vec![MountUsage {
                mount_point: "/".into(),
                total_bytes: 100 * 1024 * MB,
                available_bytes: 40 * 1024 * MB,
            }],
            process_table: build_process_table_from_flat(self.processes.clone()),
            ..Default::default()
        }
    }
}

/// Trimming halves a process's memory. Every trim holds the thread for
/// `trim_delay` and records how many trims overlapped.
struct FakeOps {
    processes: Mutex<HashMap<u32, ProcessInfo>>,
    trim_delay: Duration,
    unsupported: Vec<Capability>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeOps {
    fn new(processes: Vec<ProcessInfo>) -> Self {
        FakeOps {
            processes: Mutex::new(processes.into_iter().map(|p| (p.pid, p)).collect()),
            trim_delay: Duration::ZERO,
            unsupported: Vec::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn with_trim_delay(mut self, delay: Duration) -> Self {
        self.trim_delay = delay;
        self
    }

    fn without(mut self, capability: Capability) -> Self {
        self.unsupported.push(capability);
        self
    }
}

impl SystemOps for FakeOps {
    fn is_elevated(&self) -> bool {
        true
    }
    fn supports(&self, capability: Capability) -> bool {
        !self.unsupported.contains(&capability)
    }
    fn memory_used(&self) -> u64 {
        self.processes
            .lock()
            .unwrap()
            .values()
            .map(|p| p.memory_bytes)
            .sum()
    }
    fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.lock().unwrap().values().cloned().collect()
    }
    fn process(&self, pid: u32) -> Option<ProcessInfo> {
        self.processes.lock().unwrap().get(&pid).cloned()
    }
    fn trim_working_set(&self, pid: u32) -> Result<(), OsError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.trim_delay);
        let result = match self.processes.lock().unwrap().get_mut(&pid) {
            Some(p) => {
                p.memory_bytes /= 2;
                Ok(())
            }
            None => Err(OsError::NotFound(format!("process {pid}"))),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
    fn purge_memory_list(&self, _list: MemoryList) -> Result<(), OsError> {
        Ok(())
    }
    fn memory_list_bytes(&self, list: MemoryList) -> Option<u64> {
        (list != MemoryList::Combined).then_some(512 * MB)
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
    fn service_names(&self, group: ServiceGroup) -> Vec<String> {
        match group {
            ServiceGroup::Gaming => vec!["Slack.service".to_string()],
            _ => Vec::new(),
        }
    }
    fn stop_service(&self, _name: &str) -> Result<ServiceStop, OsError> {
        Ok(ServiceStop::AlreadyStopped)
    }
    fn flush_network_cache(&self, _cache: NetCache) -> Result<(), OsError> {
        Ok(())
    }
    fn cleanup_dirs(&self, _target: CleanupTarget) -> Vec<CleanupDir> {
        Vec::new()
    }
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.advisor.settle_ms = 0;
    config
}

fn engine_with(ops: Arc<FakeOps>) -> Engine {
    let source = FakeSource {
        processes: machine(),
    };
    Engine::new(quick_config(), Box::new(source), ops)
}

fn engine() -> (Engine, Arc<FakeOps>) {
    let ops = Arc::new(FakeOps::new(machine()));
    (engine_with(ops.clone()), ops)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn health_score_covers_every_category() {
    let (engine, _) = engine();
    let score = engine.get_health_score().await;

    assert!(score.overall <= 100);
    assert_eq!(score.details.len(), 5);
    assert!(score.memory_score.is_some());
    assert!(score.disk_score.is_some());
}

#[tokio::test]
async fn live_metrics_mirror_the_snapshot() {
    let (engine, _) = engine();
    let metrics = engine.get_live_metrics().await;

    assert_eq!(metrics.memory_total_mb, 16 * 1024);
    assert_eq!(metrics.memory_used_mb, 8 * 1024);
    assert!((metrics.memory_percent - 50.0).abs() < 1e-9);
    assert_eq!(metrics.process_count, 4);
    assert_eq!(metrics.cpu_per_core.len(), 2);
}

#[tokio::test]
async fn catalog_lists_every_optimization() {
    let (engine, _) = engine();
    let items = engine.get_catalog().await;

    assert_eq!(items.len(), 24);
    assert!(items.iter().all(|item| item.available));
    let defaults = engine.default_selection().await;
    assert!(defaults.contains(&"mem_working_set".to_string()));
}

fn savings(items: &[OptimizationItem], id: &str) -> Option<f64> {
    items
        .iter()
        .find(|item| item.id.as_str() == id)
        .and_then(|item| item.estimated_savings_mb)
}

#[tokio::test]
async fn catalog_estimates_savings_from_live_state() {
    let ops = Arc::new(FakeOps::new(machine()).without(Capability::MemoryList(MemoryList::Modified)));
    let engine = engine_with(ops);
    let items = engine.get_catalog().await;

    // A quarter of everything resident: (40 + 900 + 200 + 10) / 4.
    let all = savings(&items, "mem_working_set").unwrap();
    assert!((all - 287.5).abs() < 1e-6);
    // A third of chrome and slack, the large idle ones.
    let selective = savings(&items, "proc_selective_trim").unwrap();
    assert!((selective - 1100.0 / 3.0).abs() < 1e-6);
    assert_eq!(savings(&items, "mem_standby_list"), Some(512.0));
    assert_eq!(savings(&items, "svc_xbox"), Some(200.0));

    // Unavailable, unmeasurable and empty actions carry no estimate.
    assert_eq!(savings(&items, "mem_modified_page"), None);
    assert_eq!(savings(&items, "mem_combined_page"), None);
    assert_eq!(savings(&items, "net_dns_flush"), None);
    assert_eq!(savings(&items, "svc_telemetry"), None);
    assert_eq!(savings(&items, "disk_temp_files"), None);
    assert!(items.iter().all(|item| !item.tooltip.is_empty()));
}

#[tokio::test]
async fn empty_selection_returns_an_empty_report() {
    let (engine, ops) = engine();
    let report = engine.optimize(&[]).await;

    assert_eq!(report.items_attempted, 0);
    assert!(report.results.is_empty());
    assert_eq!(ops.max_active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_id_fails_without_stopping_the_batch() {
    let (engine, _) = engine();
    let report = engine
        .optimize(&ids(&["mem_working_set", "defragment_everything"]))
        .await;

    assert_eq!(report.items_attempted, 2);
    assert_eq!(report.items_succeeded, 1);
    assert_eq!(report.items_failed, 1);
    assert!(!report.results[1].success);
    assert!(report.results[0].memory_freed_mb.unwrap_or(0.0) > 0.0);
}

#[tokio::test]
async fn suggestions_skip_protected_processes() {
    let (engine, _) = engine();
    let suggestions = engine.get_process_suggestions().await;

    assert!(suggestions.iter().all(|s| s.pid != 1));
    assert!(suggestions.iter().all(|s| s.safe_to_optimize));
    let top = suggestions.first().expect("chrome should be suggested");
    assert_eq!(top.pid, 4001);
    assert_eq!(top.category, SuggestionCategory::Bloated);
}

#[tokio::test]
async fn exited_pid_fails_alone() {
    let (engine, _) = engine();
    let report = engine.optimize_processes(&[4001, 9999]).await;

    assert_eq!(report.processes_attempted, 2);
    assert_eq!(report.processes_trimmed, 1);
    assert!(report.results[0].success);
    assert!((report.results[0].freed_mb - 450.0).abs() < 1e-6);
    assert!(report.results[1].message.contains("no longer running"));
}

#[tokio::test]
async fn protected_pid_is_refused() {
    let (engine, ops) = engine();
    let report = engine.optimize_processes(&[1]).await;

    assert_eq!(report.processes_failed, 1);
    assert_eq!(ops.process(1).unwrap().memory_bytes, 40 * MB);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutating_operations_queue_behind_one_gate() {
    let ops = Arc::new(FakeOps::new(machine()).with_trim_delay(Duration::from_millis(30)));
    let engine = engine_with(ops.clone());

    let batch = ids(&["mem_working_set"]);
    let (report, trims) = tokio::join!(
        engine.optimize(&batch),
        engine.optimize_processes(&[4001, 4002])
    );

    assert_eq!(report.items_succeeded, 1);
    assert_eq!(trims.processes_trimmed, 2);
    assert_eq!(ops.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_do_not_wait_for_the_gate() {
    let ops = Arc::new(FakeOps::new(machine()).with_trim_delay(Duration::from_millis(200)));
    let engine = engine_with(ops);

    let worker = engine.clone();
    let trim = tokio::spawn(async move { worker.optimize_processes(&[4001]).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let score = tokio::time::timeout(Duration::from_millis(150), engine.get_health_score())
        .await
        .expect("health score should not queue behind a trim");
    assert!(score.overall <= 100);
    trim.await.unwrap();
}
