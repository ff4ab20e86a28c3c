//! Ranks the live process table into trim suggestions.

pub mod deny;
pub mod rules;
pub mod trim;

use std::fmt;

use serde::Serialize;

use crate::config::AdvisorConfig;
use crate::format::bytes_to_mb;
use crate::system::process::{ProcessState, ProcessTable};

pub use deny::DenyList;
pub use trim::{ProcessOptReport, ProcessOptResult, trim_processes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    Bloated,
    IdleHog,
    Duplicate,
    Background,
}

impl fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuggestionCategory::Bloated => "bloated",
            SuggestionCategory::IdleHog => "idle_hog",
            SuggestionCategory::Duplicate => "duplicate",
            SuggestionCategory::Background => "background",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSuggestion {
    pub pid: u32,
    pub name: String,
    pub memory_mb: f64,
    pub cpu_percent: f32,
    pub estimated_savings_mb: f64,
    pub reason: String,
    pub severity: Severity,
    pub category: SuggestionCategory,
    pub safe_to_optimize: bool,
}

/// Classify every live, non-protected process with the first matching
/// rule. Sorted by estimated savings (largest first), ties by pid.
pub fn analyze(
    table: &ProcessTable,
    deny: &DenyList,
    config: &AdvisorConfig,
) -> Vec<ProcessSuggestion> {
    let _span = tracing::debug_span!("advisor.analyze", processes = table.len()).entered();
    let ctx = rules::RuleContext::new(table, config);

    let mut suggestions: Vec<ProcessSuggestion> = table
        .processes
        .values()
        .filter(|p| p.state != ProcessState::Zombie)
        .filter(|p| !deny.is_denied(p))
        .filter_map(|p| {
            let rule = rules::first_match(p, &ctx)?;
            let class = (rule.classify)(p, &ctx);
            let memory_mb = bytes_to_mb(p.memory_bytes);
            Some(ProcessSuggestion {
                pid: p.pid,
                name: p.name.clone(),
                memory_mb,
                cpu_percent: p.cpu_percent,
                estimated_savings_mb: (memory_mb * class.savings_fraction).max(0.0),
                reason: class.reason,
                severity: class.severity,
                category: rule.category,
                safe_to_optimize: true,
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.estimated_savings_mb
            .total_cmp(&a.estimated_savings_mb)
            .then(a.pid.cmp(&b.pid))
    });
    suggestions.truncate(config.max_suggestions);
    tracing::debug!(count = suggestions.len(), "suggestions ranked");
    suggestions
}
