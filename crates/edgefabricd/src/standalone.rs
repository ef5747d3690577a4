//! Standalone mode — every subsystem in one process.
//!
//! The configured nodes execute tasks in-process, so their heartbeats are
//! synthesized here from the capacity each one has reserved. In this mode
//! the daemon:
//! 1. Opens the redb authority store
//! 2. Registers the `[[nodes]]` from the config
//! 3. Starts the health monitor, the heartbeat loop and the dispatch loop
//! 4. Publishes cluster state into the local cache and syncs it with the
//!    authority every `sync.interval`
//! 5. On Ctrl-C stops the loops, drains running tasks and runs a final sync

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use edgefabric_cache::LocalCache;
use edgefabric_core::{FabricConfig, NodeId, TaskSubmission, epoch_millis};
use edgefabric_health::{HealthAggregator, HealthMonitor, HealthReport};
use edgefabric_registry::{NodeRecord, NodeRegistry, NodeSpec};
use edgefabric_scheduler::{EdgeRuntime, LoopbackExecutor};
use edgefabric_state::StateStore;
use edgefabric_sync::{SyncCoordinator, SyncRecord, SyncReport};

/// Version tag of the records this daemon publishes.
const RECORD_VERSION: &str = "fabric/v1";

/// All subsystems of one standalone fabric.
pub struct Fabric {
    state: StateStore,
    registry: Arc<NodeRegistry>,
    health: Arc<HealthAggregator>,
    monitor: HealthMonitor,
    runtime: EdgeRuntime,
    cache: LocalCache<SyncRecord<Value>>,
    sync: SyncCoordinator<Value>,
}

impl Fabric {
    /// Build the subsystems, start the health monitor and register the
    /// configured nodes.
    pub async fn assemble(config: FabricConfig, state: StateStore) -> anyhow::Result<Self> {
        let registry = Arc::new(NodeRegistry::new());
        let health = Arc::new(HealthAggregator::with_registry(
            config.health.clone(),
            Arc::clone(&registry),
        ));

        let monitor = HealthMonitor::new(Arc::clone(&health));
        monitor.start(registry.subscribe().await).await;

        for declaration in &config.nodes {
            let mut spec = NodeSpec::new(declaration.compute_units, declaration.memory_mb);
            if let Some(location) = &declaration.location {
                spec = spec.with_location(location.clone());
            }
            registry.register(spec).await?;
        }
        info!(nodes = config.nodes.len(), "configured nodes registered");

        let runtime = EdgeRuntime::with_state_store(
            Arc::clone(&registry),
            Arc::clone(&health),
            Arc::new(LoopbackExecutor),
            config.scheduler.clone(),
            state.clone(),
        );
        let cache = LocalCache::new(config.cache.clone());

        Ok(Self {
            state,
            registry,
            health,
            monitor,
            runtime,
            cache,
            sync: SyncCoordinator::new(),
        })
    }

    pub fn runtime(&self) -> &EdgeRuntime {
        &self.runtime
    }

    /// Submit every task in `submissions`. Rejected ones are logged and
    /// skipped. Returns how many were accepted.
    pub async fn submit_all(&self, submissions: Vec<TaskSubmission>) -> usize {
        let mut accepted = 0;
        for submission in submissions {
            match self.runtime.submit(submission).await {
                Ok(_) => accepted += 1,
                Err(err) => warn!(error = %err, "startup task rejected"),
            }
        }
        accepted
    }

    /// Report every active node's load, derived from its reservations.
    pub async fn heartbeat(&self) -> usize {
        let mut reported = 0;
        for node in self.registry.snapshot().await {
            if node.retired {
                continue;
            }
            match self.health.ingest(local_report(&node)).await {
                Ok(_) => reported += 1,
                Err(err) => debug!(node_id = %node.id, error = %err, "heartbeat rejected"),
            }
        }
        reported
    }

    /// Write the current cluster summary and node snapshots into the cache.
    pub async fn publish(&self) -> anyhow::Result<()> {
        let now = epoch_millis();

        let summary = self.health.cluster_summary().await;
        self.cache
            .set(
                "cluster/summary",
                SyncRecord::new(now, RECORD_VERSION, serde_json::to_value(&summary)?),
            )
            .await;

        for node in self.registry.snapshot().await {
            self.cache
                .set(
                    node_key(node.id),
                    SyncRecord::new(now, RECORD_VERSION, serde_json::to_value(&node)?),
                )
                .await;
        }
        Ok(())
    }

    /// Reconcile the cache with the authority store.
    pub async fn sync_round(&self) -> SyncReport {
        let report = self.sync.sync_round(&self.cache, &self.state).await;
        if report.is_clean() {
            debug!(
                pushed = report.pushed.len(),
                pulled = report.pulled.len(),
                unchanged = report.unchanged,
                superseded = report.superseded.len(),
                "sync round complete"
            );
        } else {
            warn!(failed = report.failed.len(), "sync round left keys unreconciled");
        }
        report
    }

    /// Stop background work, let running tasks finish and push a last
    /// view of the cluster to the authority.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.monitor.stop().await;
        self.runtime.drain().await;

        self.publish().await?;
        self.sync_round().await;

        let summary = self.health.cluster_summary().await;
        let stats = self.cache.stats().await;
        info!(
            total_nodes = summary.total_nodes,
            healthy_nodes = summary.healthy_nodes,
            queued = self.runtime.queue().len().await,
            cached = stats.entries,
            "fabric shut down"
        );
        Ok(())
    }
}

fn node_key(node_id: NodeId) -> String {
    format!("nodes/{node_id}")
}

fn ratio(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        (used / total).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn local_report(node: &NodeRecord) -> HealthReport {
    let cpu = ratio(
        f64::from(node.reserved.compute_units),
        f64::from(node.capacity.compute_units),
    );
    let memory = ratio(node.reserved.memory_mb as f64, node.capacity.memory_mb as f64);
    HealthReport::new(node.id, cpu.max(memory), cpu, memory)
}

/// Read a JSON array of task submissions.
pub fn load_submissions(path: &Path) -> anyhow::Result<Vec<TaskSubmission>> {
    let content = std::fs::read_to_string(path)?;
    let submissions: Vec<TaskSubmission> = serde_json::from_str(&content)?;
    Ok(submissions)
}

async fn run_heartbeat_loop(
    fabric: Arc<Fabric>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                fabric.heartbeat().await;
            }
            _ = shutdown.changed() => {
                debug!("heartbeat loop shutting down");
                break;
            }
        }
    }
}

async fn run_sync_loop(
    fabric: Arc<Fabric>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = fabric.publish().await {
                    warn!(error = %err, "failed to publish cluster state");
                    continue;
                }
                fabric.sync_round().await;
            }
            _ = shutdown.changed() => {
                debug!("sync loop shutting down");
                break;
            }
        }
    }
}

/// Run the standalone daemon until Ctrl-C.
pub async fn run_standalone(
    config: FabricConfig,
    data_dir: PathBuf,
    tasks: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("edge fabric daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("edgefabric.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "authority store opened");

    let heartbeat_interval = config.health.sweep_interval;
    let sync_interval = config.sync.interval;
    let fabric = Arc::new(Fabric::assemble(config, state).await?);

    if let Some(path) = tasks {
        let submissions = load_submissions(&path)?;
        let total = submissions.len();
        let accepted = fabric.submit_all(submissions).await;
        info!(path = ?path, total, accepted, "startup tasks submitted");
    }

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatch_handle = {
        let runtime = fabric.runtime().clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { runtime.run(heartbeat_interval, shutdown).await })
    };
    let heartbeat_handle = tokio::spawn(run_heartbeat_loop(
        Arc::clone(&fabric),
        heartbeat_interval,
        shutdown_rx.clone(),
    ));
    let sync_handle = tokio::spawn(run_sync_loop(
        Arc::clone(&fabric),
        sync_interval,
        shutdown_rx,
    ));

    info!(
        heartbeat_interval_ms = heartbeat_interval.as_millis() as u64,
        sync_interval_ms = sync_interval.as_millis() as u64,
        "fabric running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = dispatch_handle.await;
    let _ = heartbeat_handle.await;
    let _ = sync_handle.await;

    fabric.shutdown().await?;
    info!("edge fabric daemon stopped");
    Ok(())
}
