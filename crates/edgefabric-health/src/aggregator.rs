//! Per-node health records and the cluster view derived from them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use edgefabric_core::{HealthConfig, NodeId};
use edgefabric_registry::{NodeRegistry, RegistryEvent};

use crate::error::{HealthError, HealthResult};

/// Liveness state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Registered, no report yet.
    Joining,
    Healthy,
    /// Last report was above the load threshold.
    Degraded,
    /// No report within the heartbeat timeout, or retired.
    Offline,
}

/// One liveness/resource report pushed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthReport {
    pub node_id: NodeId,
    /// Fraction of capacity in use, `0.0..=1.0`.
    pub load: f64,
    /// CPU utilization snapshot.
    pub cpu: f64,
    /// Memory utilization snapshot.
    pub memory: f64,
}

impl HealthReport {
    pub fn new(node_id: NodeId, load: f64, cpu: f64, memory: f64) -> Self {
        Self {
            node_id,
            load,
            cpu,
            memory,
        }
    }

    fn validate(&self) -> HealthResult<()> {
        if !(0.0..=1.0).contains(&self.load) {
            return Err(HealthError::InvalidLoad {
                node_id: self.node_id,
                load: self.load,
            });
        }
        let usage_ok = |v: f64| v.is_finite() && v >= 0.0;
        if !usage_ok(self.cpu) || !usage_ok(self.memory) {
            return Err(HealthError::InvalidUsage(self.node_id));
        }
        Ok(())
    }
}

/// What the aggregator knows about one node.
#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub status: NodeStatus,
    /// Time of the last report, or of registration before the first one.
    pub last_heartbeat: Instant,
    /// Superseded by every new report.
    pub last_report: Option<HealthReport>,
    pub retired: bool,
}

/// Cluster-wide view, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub offline_nodes: usize,
    /// Averages over reporting, non-offline nodes. Zero when there are none.
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_load: f64,
}

/// Ingests node reports and derives node status and cluster health.
pub struct HealthAggregator {
    config: HealthConfig,
    nodes: RwLock<BTreeMap<NodeId, NodeHealth>>,
    /// Consulted when a report names a node no event has seeded yet.
    registry: Option<Arc<NodeRegistry>>,
}

impl HealthAggregator {
    /// Aggregator that learns about nodes only through [`seed`](Self::seed)
    /// and registry events.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(BTreeMap::new()),
            registry: None,
        }
    }

    /// Aggregator that also accepts reports from any active node in
    /// `registry`, even before its `NodeJoined` event has been applied.
    pub fn with_registry(config: HealthConfig, registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Create the initial `Joining` record for a newly registered node.
    pub async fn seed(&self, node_id: NodeId) {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node_id) {
            debug!(%node_id, "health record already seeded");
            return;
        }
        nodes.insert(
            node_id,
            NodeHealth {
                node_id,
                status: NodeStatus::Joining,
                last_heartbeat: Instant::now(),
                last_report: None,
                retired: false,
            },
        );
        debug!(%node_id, "health record seeded");
    }

    /// Apply one registry event.
    pub async fn apply_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::NodeJoined { node_id, .. } => self.seed(*node_id).await,
            RegistryEvent::NodeRetired { node_id } => {
                let mut nodes = self.nodes.write().await;
                if let Some(node) = nodes.get_mut(node_id) {
                    node.retired = true;
                    if node.status != NodeStatus::Offline {
                        info!(%node_id, from = ?node.status, "retired node marked offline");
                        node.status = NodeStatus::Offline;
                    }
                }
            }
            RegistryEvent::ResourcesReleased { .. } => {}
        }
    }

    /// Apply every event already queued on `events`, without waiting.
    /// Returns how many were applied.
    pub async fn drain_events(&self, events: &mut mpsc::UnboundedReceiver<RegistryEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.apply_event(&event).await;
            applied += 1;
        }
        applied
    }

    /// Ingest a report received now.
    pub async fn ingest(&self, report: HealthReport) -> HealthResult<NodeStatus> {
        self.ingest_at(report, Instant::now()).await
    }

    /// Ingest a report received at `now`.
    pub async fn ingest_at(&self, report: HealthReport, now: Instant) -> HealthResult<NodeStatus> {
        report.validate()?;
        self.seed_from_registry(report.node_id).await;

        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(&report.node_id)
            .filter(|n| !n.retired)
            .ok_or(HealthError::UnknownNode(report.node_id))?;

        let next = if report.load > self.config.degraded_threshold {
            NodeStatus::Degraded
        } else {
            NodeStatus::Healthy
        };

        let prev = node.status;
        node.status = next;
        node.last_heartbeat = now;
        node.last_report = Some(report);

        if prev != next {
            match (prev, next) {
                (_, NodeStatus::Degraded) => warn!(
                    node_id = %report.node_id,
                    load = report.load,
                    threshold = self.config.degraded_threshold,
                    from = ?prev,
                    "node degraded"
                ),
                (NodeStatus::Offline, _) => {
                    info!(node_id = %report.node_id, "offline node rejoined")
                }
                _ => info!(node_id = %report.node_id, from = ?prev, to = ?next, "node status changed"),
            }
        } else {
            debug!(node_id = %report.node_id, load = report.load, "health report ingested");
        }

        Ok(next)
    }

    /// Seed `node_id` if the registry knows it as active but no event has
    /// reached this aggregator yet.
    async fn seed_from_registry(&self, node_id: NodeId) {
        let Some(registry) = &self.registry else {
            return;
        };
        if self.nodes.read().await.contains_key(&node_id) {
            return;
        }
        match registry.get(node_id).await {
            Ok(record) if !record.retired => {
                debug!(%node_id, "seeding node ahead of its join event");
                self.seed(node_id).await;
            }
            _ => {}
        }
    }

    /// Mark every node silent for longer than the heartbeat timeout as
    /// offline. Returns the nodes that transitioned in this sweep.
    pub async fn sweep(&self) -> Vec<NodeId> {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) -> Vec<NodeId> {
        let timeout = self.config.heartbeat_timeout;
        let mut nodes = self.nodes.write().await;
        let mut transitioned = Vec::new();

        for node in nodes.values_mut() {
            if node.status == NodeStatus::Offline {
                continue;
            }
            let silent_for = now.saturating_duration_since(node.last_heartbeat);
            if silent_for > timeout {
                warn!(
                    node_id = %node.node_id,
                    from = ?node.status,
                    silent_ms = silent_for.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "heartbeat timeout, node offline"
                );
                node.status = NodeStatus::Offline;
                transitioned.push(node.node_id);
            }
        }

        transitioned
    }

    pub async fn status_of(&self, node_id: NodeId) -> Option<NodeStatus> {
        let nodes = self.nodes.read().await;
        nodes.get(&node_id).map(|n| n.status)
    }

    pub async fn node(&self, node_id: NodeId) -> Option<NodeHealth> {
        let nodes = self.nodes.read().await;
        nodes.get(&node_id).cloned()
    }

    /// Nodes currently eligible for new work.
    pub async fn healthy_nodes(&self) -> Vec<NodeId> {
        let nodes = self.nodes.read().await;
        nodes
            .values()
            .filter(|n| n.status == NodeStatus::Healthy)
            .map(|n| n.node_id)
            .collect()
    }

    /// Derive the cluster view from the current per-node records.
    pub async fn cluster_summary(&self) -> ClusterSummary {
        let nodes = self.nodes.read().await;

        let mut summary = ClusterSummary {
            total_nodes: nodes.len(),
            healthy_nodes: 0,
            degraded_nodes: 0,
            offline_nodes: 0,
            avg_cpu: 0.0,
            avg_memory: 0.0,
            avg_load: 0.0,
        };

        let mut reporting = 0usize;
        for node in nodes.values() {
            match node.status {
                NodeStatus::Healthy => summary.healthy_nodes += 1,
                NodeStatus::Degraded => summary.degraded_nodes += 1,
                NodeStatus::Offline => summary.offline_nodes += 1,
                NodeStatus::Joining => {}
            }
            if node.status == NodeStatus::Offline {
                continue;
            }
            if let Some(report) = &node.last_report {
                reporting += 1;
                summary.avg_cpu += report.cpu;
                summary.avg_memory += report.memory;
                summary.avg_load += report.load;
            }
        }

        if reporting > 0 {
            let n = reporting as f64;
            summary.avg_cpu /= n;
            summary.avg_memory /= n;
            summary.avg_load /= n;
        }

        summary
    }
}
