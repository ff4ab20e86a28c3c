//! The ordered classification chain. The first rule whose predicate
//! holds decides a process's category; later rules never see it.

use std::collections::{HashMap, HashSet};

use super::{Severity, SuggestionCategory};
use crate::config::AdvisorConfig;
use crate::format::bytes_to_mb;
use crate::system::process::{ProcessInfo, ProcessState, ProcessTable};

/// Table-wide facts the per-process rules need.
pub struct RuleContext<'a> {
    pub config: &'a AdvisorConfig,
    instance_counts: HashMap<String, usize>,
    /// Pids beyond the expected instance count for their name.
    excess: HashSet<u32>,
}

impl<'a> RuleContext<'a> {
    pub fn new(table: &ProcessTable, config: &'a AdvisorConfig) -> Self {
        let mut by_name: HashMap<String, Vec<u32>> = HashMap::new();
        for p in table.processes.values() {
            if p.state == ProcessState::Zombie {
                continue;
            }
            by_name.entry(p.name_key()).or_default().push(p.pid);
        }

        let mut instance_counts = HashMap::with_capacity(by_name.len());
        let mut excess = HashSet::new();
        for (name, mut pids) in by_name {
            let baseline = config
                .expected_instances
                .get(&name)
                .copied()
                .unwrap_or(config.duplicate_baseline);
            // Keep the oldest-looking (lowest) pids, flag the rest.
            pids.sort_unstable();
            excess.extend(pids.iter().skip(baseline).copied());
            instance_counts.insert(name, pids.len());
        }

        RuleContext {
            config,
            instance_counts,
            excess,
        }
    }

    pub fn instances(&self, process: &ProcessInfo) -> usize {
        self.instance_counts
            .get(&process.name_key())
            .copied()
            .unwrap_or(1)
    }

    pub fn is_excess(&self, pid: u32) -> bool {
        self.excess.contains(&pid)
    }
}

pub struct Classification {
    pub severity: Severity,
    pub savings_fraction: f64,
    pub reason: String,
}

pub struct Rule {
    pub category: SuggestionCategory,
    pub matches: fn(&ProcessInfo, &RuleContext) -> bool,
    pub classify: fn(&ProcessInfo, &RuleContext) -> Classification,
}

fn mb(process: &ProcessInfo) -> f64 {
    bytes_to_mb(process.memory_bytes)
}

fn bloated_matches(p: &ProcessInfo, ctx: &RuleContext) -> bool {
    mb(p) > ctx.config.bloated_mb
}

fn bloated_classify(p: &ProcessInfo, ctx: &RuleContext) -> Classification {
    Classification {
        severity: Severity::High,
        savings_fraction: ctx.config.savings.bloated,
        reason: format!(
            "{:.0} MB resident with {:.1}% CPU, likely bloated",
            mb(p),
            p.cpu_percent
        ),
    }
}

fn idle_hog_matches(p: &ProcessInfo, ctx: &RuleContext) -> bool {
    p.cpu_percent < ctx.config.idle_cpu_percent && mb(p) > ctx.config.idle_floor_mb
}

fn idle_hog_classify(p: &ProcessInfo, ctx: &RuleContext) -> Classification {
    Classification {
        severity: Severity::Medium,
        savings_fraction: ctx.config.savings.idle_hog,
        reason: format!("{:.0} MB held while idle, memory can be trimmed", mb(p)),
    }
}

fn duplicate_matches(p: &ProcessInfo, ctx: &RuleContext) -> bool {
    ctx.is_excess(p.pid) && mb(p) > ctx.config.duplicate_floor_mb
}

fn duplicate_classify(p: &ProcessInfo, ctx: &RuleContext) -> Classification {
    Classification {
        severity: Severity::Medium,
        savings_fraction: ctx.config.savings.duplicate,
        reason: format!("{} instances of {} running", ctx.instances(p), p.name),
    }
}

fn background_matches(p: &ProcessInfo, ctx: &RuleContext) -> bool {
    mb(p) > ctx.config.background_floor_mb
}

fn background_classify(p: &ProcessInfo, ctx: &RuleContext) -> Classification {
    Classification {
        severity: Severity::Low,
        savings_fraction: ctx.config.savings.background,
        reason: format!("Background process using {:.0} MB", mb(p)),
    }
}

pub static RULES: [Rule; 4] = [
    Rule {
        category: SuggestionCategory::Bloated,
        matches: bloated_matches,
        classify: bloated_classify,
    },
    Rule {
        category: SuggestionCategory::IdleHog,
        matches: idle_hog_matches,
        classify: idle_hog_classify,
    },
    Rule {
        category: SuggestionCategory::Duplicate,
        matches: duplicate_matches,
        classify: duplicate_classify,
    },
    Rule {
        category: SuggestionCategory::Background,
        matches: background_matches,
        classify: background_classify,
    },
];

pub fn first_match(p: &ProcessInfo, ctx: &RuleContext) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.matches)(p, ctx))
}
