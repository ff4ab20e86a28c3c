//! The static optimization catalog.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::config::ExecutorConfig;
use crate::executor::is_selective_candidate;
use crate::format::bytes_to_mb;
use crate::system::cleanup;
use crate::system::ops::{
    Capability, CleanupTarget, MemoryList, NetCache, ServiceGroup, SystemOps, Tweak,
};
use crate::system::process::{ProcessInfo, name_key};

/// Share of resident memory a trim typically gives back.
const TRIM_ALL_FRACTION: f64 = 0.25;
const TRIM_SELECTIVE_FRACTION: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationId {
    MemWorkingSet,
    MemSystemCache,
    MemStandbyList,
    MemModifiedPage,
    MemCombinedPage,
    MemRegistryCache,
    ProcLowerIdle,
    ProcBoostForeground,
    ProcSelectiveTrim,
    ProcHandleDetect,
    CpuPowerHigh,
    CpuTimerReset,
    SvcTelemetry,
    SvcXbox,
    SvcSearch,
    SvcSysmain,
    NetDnsFlush,
    NetArpFlush,
    DiskTempFiles,
    DiskThumbnails,
    DiskShaderCache,
    DiskErrorReports,
    VisGameDvr,
    VisTips,
}

impl OptimizationId {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationId::MemWorkingSet => "mem_working_set",
            OptimizationId::MemSystemCache => "mem_system_cache",
            OptimizationId::MemStandbyList => "mem_standby_list",
            OptimizationId::MemModifiedPage => "mem_modified_page",
            OptimizationId::MemCombinedPage => "mem_combined_page",
            OptimizationId::MemRegistryCache => "mem_registry_cache",
            OptimizationId::ProcLowerIdle => "proc_lower_idle",
            OptimizationId::ProcBoostForeground => "proc_boost_foreground",
            OptimizationId::ProcSelectiveTrim => "proc_selective_trim",
            OptimizationId::ProcHandleDetect => "proc_handle_detect",
            OptimizationId::CpuPowerHigh => "cpu_power_high",
            OptimizationId::CpuTimerReset => "cpu_timer_reset",
            OptimizationId::SvcTelemetry => "svc_telemetry",
            OptimizationId::SvcXbox => "svc_xbox",
            OptimizationId::SvcSearch => "svc_search",
            OptimizationId::SvcSysmain => "svc_sysmain",
            OptimizationId::NetDnsFlush => "net_dns_flush",
            OptimizationId::NetArpFlush => "net_arp_flush",
            OptimizationId::DiskTempFiles => "disk_temp_files",
            OptimizationId::DiskThumbnails => "disk_thumbnails",
            OptimizationId::DiskShaderCache => "disk_shader_cache",
            OptimizationId::DiskErrorReports => "disk_error_reports",
            OptimizationId::VisGameDvr => "vis_game_dvr",
            OptimizationId::VisTips => "vis_tips",
        }
    }
}

impl fmt::Display for OptimizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ENTRIES
            .iter()
            .map(|e| e.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Memory,
    Process,
    CpuPower,
    Services,
    Network,
    Disk,
    Tweaks,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Memory => "Memory",
            Category::Process => "Process",
            Category::CpuPower => "CPU & Power",
            Category::Services => "Services",
            Category::Network => "Network",
            Category::Disk => "Disk & Temp",
            Category::Tweaks => "Tweaks",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        };
        f.write_str(s)
    }
}

/// What running a catalog entry actually does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    TrimAll,
    TrimSelective,
    PurgeList(MemoryList),
    LowerIdlePriority,
    BoostForeground,
    LeakScan,
    Tweak(Tweak),
    StopServices(ServiceGroup),
    FlushNetwork(NetCache),
    Cleanup(CleanupTarget),
}

impl ActionKind {
    /// Capability the platform must offer; `None` means always runnable.
    pub fn capability(self) -> Option<Capability> {
        match self {
            ActionKind::TrimAll | ActionKind::TrimSelective => Some(Capability::WorkingSetTrim),
            ActionKind::PurgeList(list) => Some(Capability::MemoryList(list)),
            ActionKind::LowerIdlePriority => Some(Capability::PriorityControl),
            ActionKind::BoostForeground => Some(Capability::ForegroundWindow),
            ActionKind::LeakScan => None,
            ActionKind::Tweak(tweak) => Some(Capability::Tweak(tweak)),
            ActionKind::StopServices(group) => Some(Capability::Service(group)),
            ActionKind::FlushNetwork(cache) => Some(Capability::NetworkFlush(cache)),
            ActionKind::Cleanup(target) => Some(Capability::Cleanup(target)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub id: OptimizationId,
    pub category: Category,
    pub name: &'static str,
    pub description: &'static str,
    /// Longer explanation of what the action touches and its side effects.
    pub tooltip: &'static str,
    pub risk: Risk,
    pub enabled_by_default: bool,
    pub requires_elevation: bool,
    pub action: ActionKind,
}

impl CatalogEntry {
    pub fn is_available(&self, ops: &dyn SystemOps) -> bool {
        self.action.capability().is_none_or(|cap| ops.supports(cap))
    }
}

macro_rules! entry {
    ($id:ident, $cat:ident, $name:literal, $desc:literal, $tip:literal, $risk:ident, $default:literal, $elev:literal, $action:expr) => {
        CatalogEntry {
            id: OptimizationId::$id,
            category: Category::$cat,
            name: $name,
            description: $desc,
            tooltip: $tip,
            risk: Risk::$risk,
            enabled_by_default: $default,
            requires_elevation: $elev,
            action: $action,
        }
    };
}

pub static ENTRIES: [CatalogEntry; 24] = [
    entry!(MemWorkingSet, Memory, "Working Set Trim", "Release unused memory from all processes", "Asks the OS to page out memory each process has not touched recently. Nothing is terminated; pages come back from disk on the next access.", Low, true, false, ActionKind::TrimAll),
    entry!(MemSystemCache, Memory, "System File Cache", "Clear the file system cache", "Drops clean file pages the OS keeps cached in RAM. Reads of those files are slower until the cache warms again.", Low, true, true, ActionKind::PurgeList(MemoryList::FileCache)),
    entry!(MemStandbyList, Memory, "Standby List", "Purge cached memory pages", "Releases cached pages that no process currently maps. The memory becomes free immediately; recently used files load from disk again.", Medium, true, true, ActionKind::PurgeList(MemoryList::Standby)),
    entry!(MemModifiedPage, Memory, "Modified Page List", "Flush dirty memory pages to disk", "Writes dirty pages back to disk so the OS can reuse them. Nothing is discarded.", Medium, false, false, ActionKind::PurgeList(MemoryList::Modified)),
    entry!(MemCombinedPage, Memory, "Combined Page List", "Compact and combine identical pages", "Merges identical pages or compacts fragmented memory so larger free blocks become available.", Medium, false, true, ActionKind::PurgeList(MemoryList::Combined)),
    entry!(MemRegistryCache, Memory, "Registry Cache", "Flush cached registry and slab data", "Flushes cached registry hives on Windows or reclaimable kernel slab objects on Linux.", Low, true, true, ActionKind::PurgeList(MemoryList::RegistryCache)),
    entry!(ProcLowerIdle, Process, "Lower Idle Process Priority", "Reduce priority of idle background processes", "Moves processes that are using almost no CPU to below-normal priority so active work is scheduled first. The foreground app is left alone.", Low, true, false, ActionKind::LowerIdlePriority),
    entry!(ProcBoostForeground, Process, "Boost Foreground App", "Give the active window higher CPU priority", "Raises the process that owns the focused window to above-normal priority.", Low, true, false, ActionKind::BoostForeground),
    entry!(ProcSelectiveTrim, Process, "Selective Working Set Trim", "Trim only high-memory idle processes", "Pages out memory only from large processes that are currently idle, leaving busy processes untouched.", Low, true, false, ActionKind::TrimSelective),
    entry!(ProcHandleDetect, Process, "Handle Leak Detection", "Detect processes with excessive memory", "Reports processes holding an unusually large amount of memory. Read-only; nothing is changed.", Low, true, false, ActionKind::LeakScan),
    entry!(CpuPowerHigh, CpuPower, "High Performance Power Plan", "Switch to the high performance power profile", "Switches the active power profile to high performance. Uses more power and may raise fan noise.", Low, false, false, ActionKind::Tweak(Tweak::HighPerformancePower)),
    entry!(CpuTimerReset, CpuPower, "Timer Resolution Reset", "Reset the system timer to its default resolution", "Restores the default system timer resolution that games or media apps may have raised, letting idle cores sleep longer.", Low, true, false, ActionKind::Tweak(Tweak::TimerResolution)),
    entry!(SvcTelemetry, Services, "Stop Telemetry Services", "Stop usage and crash reporting services", "Stops services that collect usage data and crash reports. They may start again on the next boot.", Medium, false, true, ActionKind::StopServices(ServiceGroup::Telemetry)),
    entry!(SvcXbox, Services, "Stop Gaming Services", "Stop game bar and gaming helper services", "Stops game bar and gaming helper services that stay resident in the background.", Low, false, true, ActionKind::StopServices(ServiceGroup::Gaming)),
    entry!(SvcSearch, Services, "Stop Search Indexer", "Stop the file search indexing service", "Stops the file indexing service. File search falls back to slower unindexed lookups until it restarts.", Medium, false, true, ActionKind::StopServices(ServiceGroup::SearchIndexer)),
    entry!(SvcSysmain, Services, "Stop Prefetch Service", "Stop the memory prefetching service", "Stops the service that preloads frequently used applications into memory.", Medium, false, true, ActionKind::StopServices(ServiceGroup::Prefetch)),
    entry!(NetDnsFlush, Network, "Flush DNS Cache", "Clear stale DNS resolver entries", "Clears cached DNS answers. Fixes lookups that still point at old addresses; the next lookups are slightly slower.", Low, true, false, ActionKind::FlushNetwork(NetCache::Dns)),
    entry!(NetArpFlush, Network, "Flush ARP Cache", "Clear the MAC address resolution cache", "Clears the table mapping local IP addresses to hardware addresses. It is rebuilt on demand.", Low, false, true, ActionKind::FlushNetwork(NetCache::Arp)),
    entry!(DiskTempFiles, Disk, "Temp Files", "Delete files from the temporary directories", "Deletes files left in the temporary directories. Recently modified files are kept because running programs may still use them.", Low, true, false, ActionKind::Cleanup(CleanupTarget::TempFiles)),
    entry!(DiskThumbnails, Disk, "Thumbnail Cache", "Reset the thumbnail cache", "Deletes cached image previews. They are regenerated the next time a folder is browsed.", Low, false, false, ActionKind::Cleanup(CleanupTarget::Thumbnails)),
    entry!(DiskShaderCache, Disk, "Shader Cache", "Clear the compiled shader cache", "Deletes compiled GPU shaders. Games may stutter briefly while shaders are rebuilt.", Low, false, false, ActionKind::Cleanup(CleanupTarget::ShaderCache)),
    entry!(DiskErrorReports, Disk, "Error Reports", "Remove crash dumps and error reports", "Deletes queued crash reports and dumps that are no longer needed.", Low, true, false, ActionKind::Cleanup(CleanupTarget::ErrorReports)),
    entry!(VisGameDvr, Tweaks, "Disable Game Capture", "Turn off background game recording", "Turns off the game overlay and background gameplay recording, reducing GPU and memory overhead.", Low, false, false, ActionKind::Tweak(Tweak::GameCaptureOff)),
    entry!(VisTips, Tweaks, "Disable Tips & Suggestions", "Turn off tips and promoted content", "Turns off tips, suggestions and promoted content shown by the OS.", Low, false, false, ActionKind::Tweak(Tweak::TipsOff)),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationItem {
    pub id: OptimizationId,
    pub category: Category,
    pub name: String,
    pub description: String,
    pub tooltip: String,
    pub risk: Risk,
    pub enabled_by_default: bool,
    pub requires_elevation: bool,
    pub available: bool,
    /// RAM or disk the action would free if run now, when measurable.
    pub estimated_savings_mb: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    entries: &'static [CatalogEntry],
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog { entries: &ENTRIES }
    }
}

impl Catalog {
    pub fn entries(&self) -> &'static [CatalogEntry] {
        self.entries
    }

    pub fn get(&self, id: OptimizationId) -> Option<&'static CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn lookup(&self, id: &str) -> Option<&'static CatalogEntry> {
        id.parse().ok().and_then(|id| self.get(id))
    }

    /// Every entry with availability probed against `ops` right now, and
    /// a savings estimate for the available ones that can be sized.
    pub fn items(&self, ops: &dyn SystemOps, config: &ExecutorConfig) -> Vec<OptimizationItem> {
        let mut estimator = Estimator {
            ops,
            config,
            processes: None,
        };
        self.entries
            .iter()
            .map(|e| {
                let available = e.is_available(ops);
                let estimated_savings_mb = if available {
                    estimator.savings_mb(e.action)
                } else {
                    None
                };
                OptimizationItem {
                    id: e.id,
                    category: e.category,
                    name: e.name.to_string(),
                    description: e.description.to_string(),
                    tooltip: e.tooltip.to_string(),
                    risk: e.risk,
                    enabled_by_default: e.enabled_by_default,
                    requires_elevation: e.requires_elevation,
                    available,
                    estimated_savings_mb,
                }
            })
            .collect()
    }

    pub fn default_selection(&self, ops: &dyn SystemOps) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled_by_default && e.is_available(ops))
            .map(|e| e.id.as_str().to_string())
            .collect()
    }
}

/// Sizes catalog actions without running them. The process list is read
/// at most once per catalog fetch.
struct Estimator<'a> {
    ops: &'a dyn SystemOps,
    config: &'a ExecutorConfig,
    processes: Option<Vec<ProcessInfo>>,
}

impl Estimator<'_> {
    fn processes(&mut self) -> &[ProcessInfo] {
        let ops = self.ops;
        self.processes.get_or_insert_with(|| ops.processes())
    }

    fn resident_where(&mut self, keep: impl Fn(&ProcessInfo) -> bool) -> u64 {
        self.processes()
            .iter()
            .filter(|p| keep(*p))
            .map(|p| p.memory_bytes)
            .sum()
    }

    fn service_bytes(&mut self, group: ServiceGroup) -> u64 {
        let stems: Vec<String> = self
            .ops
            .service_names(group)
            .iter()
            .map(|name| service_stem(name))
            .filter(|stem| !stem.is_empty())
            .collect();
        if stems.is_empty() {
            return 0;
        }
        self.resident_where(|p| {
            let key = p.name_key();
            stems.iter().any(|stem| key.contains(stem.as_str()))
        })
    }

    fn savings_mb(&mut self, action: ActionKind) -> Option<f64> {
        let mb = match action {
            ActionKind::TrimAll => {
                bytes_to_mb(self.resident_where(|p| p.pid != 0)) * TRIM_ALL_FRACTION
            }
            ActionKind::TrimSelective => {
                let config = self.config;
                bytes_to_mb(self.resident_where(|p| is_selective_candidate(p, config)))
                    * TRIM_SELECTIVE_FRACTION
            }
            ActionKind::PurgeList(list) => bytes_to_mb(self.ops.memory_list_bytes(list)?),
            ActionKind::StopServices(group) => bytes_to_mb(self.service_bytes(group)),
            ActionKind::Tweak(Tweak::GameCaptureOff) => {
                bytes_to_mb(self.service_bytes(ServiceGroup::Gaming))
            }
            ActionKind::Cleanup(target) => {
                bytes_to_mb(cleanup::measure_dirs(&self.ops.cleanup_dirs(target)))
            }
            ActionKind::LowerIdlePriority
            | ActionKind::BoostForeground
            | ActionKind::LeakScan
            | ActionKind::Tweak(_)
            | ActionKind::FlushNetwork(_) => return None,
        };
        (mb > 0.0).then_some(mb)
    }
}

/// `plocate-updatedb.timer` -> `plocate-updatedb`, `DiagTrack` -> `diagtrack`.
fn service_stem(name: &str) -> String {
    let base = name
        .strip_suffix(".service")
        .or_else(|| name.strip_suffix(".timer"))
        .unwrap_or(name);
    name_key(base)
}
