use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use serde::Serialize;
use tokio::time::MissedTickBehavior;

use trimtop::Engine;
use trimtop::advisor::{ProcessOptReport, ProcessSuggestion};
use trimtop::catalog::OptimizationItem;
use trimtop::config::{Config, load_config, load_config_from_path};
use trimtop::executor::OptimizationReport;
use trimtop::format::{MIB, format_bytes, truncate_unicode};
use trimtop::health::HealthScore;
use trimtop::logging::{LogFormat, init_tracing};
use trimtop::system::snapshot::LiveMetrics;

const NAME_WIDTH: usize = 28;

#[derive(Parser)]
#[command(
    name = "trimtop",
    about = "System health scoring, optimization catalog and working-set trimming"
)]
struct Cli {
    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format on stderr: text or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Composite health score with per-category breakdown
    Health,
    /// One live metrics sample
    Metrics,
    /// List every optimization and whether it is available here
    Catalog,
    /// Run the given optimization ids
    Optimize {
        /// Include every enabled-by-default, available optimization
        #[arg(long)]
        defaults: bool,
        ids: Vec<String>,
    },
    /// Rank processes worth trimming
    Suggest,
    /// Trim the working sets of the given pids
    Trim {
        #[arg(required = true)]
        pids: Vec<u32>,
    },
    /// Poll live metrics until interrupted
    Watch {
        /// Poll interval in milliseconds, overrides the config file
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many samples
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    let log_format = match cli.log_format {
        Some(format) => format,
        None => config.general.log_format.parse().unwrap_or_default(),
    };
    init_tracing(log_format).map_err(|e| eyre!(e))?;

    let engine = tokio::task::spawn_blocking(move || Engine::native(config)).await?;
    run(&cli, &engine).await
}

fn load_config_for_cli(cli: &Cli) -> Config {
    match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
}

async fn run(cli: &Cli, engine: &Engine) -> Result<()> {
    match &cli.command {
        Command::Health => {
            let score = engine.get_health_score().await;
            emit(cli.json, &score, print_health)
        }
        Command::Metrics => {
            let metrics = engine.get_live_metrics().await;
            emit(cli.json, &metrics, print_metrics)
        }
        Command::Catalog => {
            let items = engine.get_catalog().await;
            emit(cli.json, &items, |items| print_catalog(items))
        }
        Command::Optimize { defaults, ids } => {
            let mut selection = if *defaults {
                engine.default_selection().await
            } else {
                Vec::new()
            };
            selection.extend(ids.iter().cloned());
            if selection.is_empty() {
                return Err(eyre!("no optimization ids given; pass ids or --defaults"));
            }
            let report = engine.optimize(&selection).await;
            emit(cli.json, &report, print_report)
        }
        Command::Suggest => {
            let suggestions = engine.get_process_suggestions().await;
            emit(cli.json, &suggestions, |s| print_suggestions(s))
        }
        Command::Trim { pids } => {
            let report = engine.optimize_processes(pids).await;
            emit(cli.json, &report, print_trim_report)
        }
        Command::Watch { interval_ms, count } => watch(cli.json, engine, *interval_ms, *count).await,
    }
}

async fn watch(
    json: bool,
    engine: &Engine,
    interval_ms: Option<u64>,
    count: Option<usize>,
) -> Result<()> {
    let period = interval_ms.unwrap_or(engine.config().general.poll_interval_ms).max(100);
    let mut interval = tokio::time::interval(Duration::from_millis(period));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut samples = 0;
    loop {
        interval.tick().await;
        let outcome = engine.telemetry().poll().await;
        if outcome.was_skipped() {
            tracing::debug!("previous poll still running, reusing last sample");
        }
        let metrics = LiveMetrics::from(outcome.snapshot().as_ref());
        if json {
            println!("{}", serde_json::to_string(&metrics)?);
        } else {
            print_metrics_line(&metrics);
        }
        samples += 1;
        if count.is_some_and(|n| samples >= n) {
            return Ok(());
        }
    }
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_health(score: &HealthScore) {
    println!("Overall health: {}/100", score.overall);
    for detail in &score.details {
        println!(
            "  {:<8} {:>3}  {}",
            detail.category.to_string(),
            detail.score,
            detail.label
        );
        if let Some(suggestion) = &detail.suggestion {
            println!("           -> {suggestion}");
        }
    }
}

fn print_metrics(m: &LiveMetrics) {
    println!("CPU      {:>5.1}% ({} cores)", m.cpu_usage, m.cpu_per_core.len());
    println!(
        "Memory   {:>5.1}% ({} / {})",
        m.memory_percent,
        format_bytes(m.memory_used_mb * MIB),
        format_bytes(m.memory_total_mb * MIB)
    );
    println!(
        "Swap     {} / {}",
        format_bytes(m.swap_used_mb * MIB),
        format_bytes(m.swap_total_mb * MIB)
    );
    println!(
        "Disk IO  read {} write {}",
        format_bytes(m.disk_read_bytes),
        format_bytes(m.disk_write_bytes)
    );
    println!(
        "Net IO   rx {} tx {}",
        format_bytes(m.net_rx_bytes),
        format_bytes(m.net_tx_bytes)
    );
    println!("Procs    {}", m.process_count);
    println!("Uptime   {}h", m.uptime_seconds / 3600);
    for t in &m.temperatures {
        println!("Temp     {} {:.0}C", truncate_unicode(&t.label, NAME_WIDTH), t.temp_c);
    }
}

fn print_metrics_line(m: &LiveMetrics) {
    println!(
        "cpu {:>5.1}%  mem {:>5.1}%  disk r/w {}/{}  net rx/tx {}/{}  procs {}",
        m.cpu_usage,
        m.memory_percent,
        format_bytes(m.disk_read_bytes),
        format_bytes(m.disk_write_bytes),
        format_bytes(m.net_rx_bytes),
        format_bytes(m.net_tx_bytes),
        m.process_count
    );
}

fn print_catalog(items: &[OptimizationItem]) {
    for item in items {
        let marker = match (item.available, item.enabled_by_default) {
            (false, _) => "-",
            (true, true) => "*",
            (true, false) => " ",
        };
        let savings = item
            .estimated_savings_mb
            .map(|mb| format_bytes((mb * MIB as f64) as u64))
            .unwrap_or_default();
        println!(
            "{marker} {:<22} {:<12} {:<6} {:>9}  {}{}",
            item.id.as_str(),
            item.category.to_string(),
            item.risk.to_string(),
            savings,
            truncate_unicode(&item.name, NAME_WIDTH),
            if item.requires_elevation { " (admin)" } else { "" }
        );
    }
    println!();
    println!("* enabled by default   - unavailable on this system");
}

fn print_report(report: &OptimizationReport) {
    for r in &report.results {
        let status = if r.success { "ok  " } else { "FAIL" };
        let freed = match (r.memory_freed_mb, r.disk_freed_mb) {
            (Some(mem), _) => format!(" [{mem:.1} MB RAM]"),
            (None, Some(disk)) => format!(" [{disk:.1} MB disk]"),
            (None, None) => String::new(),
        };
        println!(
            "{status} {:<22} {:>5} ms  {}{freed}",
            r.id, r.duration_ms, r.message
        );
    }
    println!(
        "{} attempted, {} succeeded, {} failed in {} ms",
        report.items_attempted, report.items_succeeded, report.items_failed, report.total_duration_ms
    );
    println!(
        "Memory {} MB -> {} MB, freed {:.1} MB RAM and {:.1} MB disk",
        report.memory_before_mb,
        report.memory_after_mb,
        report.total_memory_freed_mb,
        report.total_disk_freed_mb
    );
}

fn print_suggestions(suggestions: &[ProcessSuggestion]) {
    if suggestions.is_empty() {
        println!("No processes worth trimming.");
        return;
    }
    println!(
        "{:>7}  {:<w$}  {:>9}  {:>6}  {:>9}  {:<10}  REASON",
        "PID",
        "NAME",
        "MEMORY",
        "CPU",
        "SAVINGS",
        "CATEGORY",
        w = NAME_WIDTH
    );
    for s in suggestions {
        println!(
            "{:>7}  {:<w$}  {:>6.0} MB  {:>5.1}%  {:>6.0} MB  {:<10}  {}",
            s.pid,
            truncate_unicode(&s.name, NAME_WIDTH),
            s.memory_mb,
            s.cpu_percent,
            s.estimated_savings_mb,
            s.category.to_string(),
            s.reason,
            w = NAME_WIDTH
        );
    }
}

fn print_trim_report(report: &ProcessOptReport) {
    for r in &report.results {
        let status = if r.success { "ok  " } else { "FAIL" };
        println!(
            "{status} {:>7} {:<w$} {}",
            r.pid,
            truncate_unicode(&r.name, NAME_WIDTH),
            r.message,
            w = NAME_WIDTH
        );
    }
    println!(
        "{} trimmed, {} failed, freed {:.1} MB in {} ms",
        report.processes_trimmed,
        report.processes_failed,
        report.total_freed_mb,
        report.total_duration_ms
    );
}
