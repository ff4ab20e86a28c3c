//! The session object behind every caller-facing operation.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::advisor::{self, DenyList, ProcessOptReport, ProcessSuggestion};
use crate::catalog::{Catalog, OptimizationItem};
use crate::config::Config;
use crate::executor::{Executor, OptimizationReport};
use crate::health::{self, HealthInputs, HealthScore};
use crate::system::collector::{Collector, SnapshotSource};
use crate::system::native::NativeOps;
use crate::system::ops::SystemOps;
use crate::system::process::build_process_table_from_flat;
use crate::system::snapshot::{LiveMetrics, SystemSnapshot};
use crate::system::telemetry::Telemetry;

/// Owns the telemetry state, the catalog and the OS collaborator.
///
/// Scoring and suggestions read snapshots and never wait on anything but
/// a poll. `optimize` and `optimize_processes` both mutate the machine
/// and queue behind one execution gate.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    telemetry: Telemetry,
    catalog: Catalog,
    ops: Arc<dyn SystemOps>,
    exec_gate: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(config: Config, source: Box<dyn SnapshotSource>, ops: Arc<dyn SystemOps>) -> Self {
        Engine {
            config: Arc::new(config),
            telemetry: Telemetry::new(source),
            catalog: Catalog::default(),
            ops,
            exec_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Engine over the live machine. Takes an initial blocking sample.
    pub fn native(config: Config) -> Self {
        let ops = Arc::new(NativeOps::new(config.executor.extra_temp_dirs.clone()));
        Engine::new(config, Box::new(Collector::new()), ops)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    async fn snapshot(&self) -> Arc<SystemSnapshot> {
        self.telemetry.poll().await.into_snapshot()
    }

    pub async fn get_health_score(&self) -> HealthScore {
        let snapshot = self.snapshot().await;
        health::score(&HealthInputs::from_snapshot(&snapshot), &self.config.health)
    }

    pub async fn get_live_metrics(&self) -> LiveMetrics {
        LiveMetrics::from(self.snapshot().await.as_ref())
    }

    pub async fn get_catalog(&self) -> Vec<OptimizationItem> {
        let ops = self.ops.clone();
        let catalog = self.catalog;
        let config = self.config.executor.clone();
        tokio::task::spawn_blocking(move || catalog.items(ops.as_ref(), &config))
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%err, "catalog probe failed");
                Vec::new()
            })
    }

    /// Enabled-by-default ids that are available on this machine.
    pub async fn default_selection(&self) -> Vec<String> {
        let ops = self.ops.clone();
        let catalog = self.catalog;
        tokio::task::spawn_blocking(move || catalog.default_selection(ops.as_ref()))
            .await
            .unwrap_or_default()
    }

    pub async fn optimize(&self, ids: &[String]) -> OptimizationReport {
        let _gate = self.exec_gate.lock().await;
        let executor = Executor::new(
            self.catalog,
            self.ops.clone(),
            self.config.executor.clone(),
        );
        let owned = ids.to_vec();
        tokio::task::spawn_blocking(move || executor.run(&owned))
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%err, "optimization worker failed");
                OptimizationReport::aborted(ids, &format!("optimization worker failed: {err}"))
            })
    }

    pub async fn get_process_suggestions(&self) -> Vec<ProcessSuggestion> {
        let snapshot = self.snapshot().await;
        let deny =
            DenyList::for_current_process(&snapshot.process_table, &self.config.advisor.protected);
        advisor::analyze(&snapshot.process_table, &deny, &self.config.advisor)
    }

    pub async fn optimize_processes(&self, pids: &[u32]) -> ProcessOptReport {
        let _gate = self.exec_gate.lock().await;
        let ops = self.ops.clone();
        let processes = tokio::task::spawn_blocking(move || ops.processes())
            .await
            .unwrap_or_default();
        let table = build_process_table_from_flat(processes);
        let deny = DenyList::for_current_process(&table, &self.config.advisor.protected);
        advisor::trim_processes(self.ops.clone(), pids, &deny, &self.config.advisor).await
    }
}
