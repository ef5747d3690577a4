//! Health monitor — background tasks that keep the aggregator current.
//!
//! One task applies registry events as they arrive; another runs the
//! offline sweep every `sweep_interval`. Both stop on a shared shutdown
//! signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use edgefabric_registry::RegistryEvent;

use crate::aggregator::HealthAggregator;

pub struct HealthMonitor {
    aggregator: Arc<HealthAggregator>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(aggregator: Arc<HealthAggregator>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            aggregator,
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn aggregator(&self) -> &Arc<HealthAggregator> {
        &self.aggregator
    }

    /// Spawn the event and sweep loops.
    pub async fn start(&self, events: mpsc::UnboundedReceiver<RegistryEvent>) {
        let interval = self.aggregator.config().sweep_interval;

        let event_handle = tokio::spawn(run_event_loop(
            Arc::clone(&self.aggregator),
            events,
            self.shutdown_tx.subscribe(),
        ));
        let sweep_handle = tokio::spawn(run_sweep_loop(
            Arc::clone(&self.aggregator),
            interval,
            self.shutdown_tx.subscribe(),
        ));

        let mut handles = self.handles.lock().await;
        handles.push(event_handle);
        handles.push(sweep_handle);
        info!(sweep_interval_ms = interval.as_millis() as u64, "health monitor started");
    }

    /// Signal both loops and wait for them to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("health monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        let handles = self.handles.lock().await;
        !handles.is_empty() && handles.iter().all(|h| !h.is_finished())
    }
}

async fn run_event_loop(
    aggregator: Arc<HealthAggregator>,
    mut events: mpsc::UnboundedReceiver<RegistryEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => aggregator.apply_event(&event).await,
                None => {
                    debug!("registry event channel closed");
                    break;
                }
            },
            _ = shutdown.changed() => {
                debug!("health event loop shutting down");
                break;
            }
        }
    }
}

async fn run_sweep_loop(
    aggregator: Arc<HealthAggregator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let offline = aggregator.sweep().await;
                if !offline.is_empty() {
                    debug!(count = offline.len(), "sweep marked nodes offline");
                }
            }
            _ = shutdown.changed() => {
                debug!("health sweep loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use edgefabric_core::{HealthConfig, NodeId, ResourceDescriptor};
    use edgefabric_registry::{NodeRegistry, NodeSpec};

    use super::*;
    use crate::aggregator::{HealthReport, NodeStatus};

    fn config() -> HealthConfig {
        HealthConfig {
            heartbeat_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            degraded_threshold: 0.8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_seeds_and_sweeps() {
        let registry = Arc::new(NodeRegistry::new());
        let aggregator = Arc::new(HealthAggregator::with_registry(
            config(),
            Arc::clone(&registry),
        ));
        let monitor = HealthMonitor::new(Arc::clone(&aggregator));
        monitor.start(registry.subscribe().await).await;
        assert!(monitor.is_running().await);

        // Reports are accepted as soon as registration returns.
        let id = registry.register(NodeSpec::new(4, 2048)).await.unwrap();
        aggregator
            .ingest(HealthReport::new(id, 0.1, 0.1, 0.1))
            .await
            .unwrap();
        assert_eq!(aggregator.status_of(id).await, Some(NodeStatus::Healthy));

        // Silence past the timeout plus one sweep interval.
        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert_eq!(aggregator.status_of(id).await, Some(NodeStatus::Offline));

        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_applies_join_events() {
        let aggregator = Arc::new(HealthAggregator::new(config()));
        let monitor = HealthMonitor::new(Arc::clone(&aggregator));
        let (tx, rx) = mpsc::unbounded_channel();
        monitor.start(rx).await;

        tx.send(RegistryEvent::NodeJoined {
            node_id: NodeId(0),
            capacity: ResourceDescriptor::new(4, 2048),
        })
        .unwrap();
        drop(tx);
        // The event loop exits once the channel is drained and closed.
        while monitor.is_running().await {
            tokio::task::yield_now().await;
        }
        assert_eq!(aggregator.status_of(NodeId(0)).await, Some(NodeStatus::Joining));
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn node_not_offline_before_timeout() {
        let aggregator = Arc::new(HealthAggregator::new(config()));
        aggregator.seed(NodeId(0)).await;
        aggregator
            .ingest(HealthReport::new(NodeId(0), 0.1, 0.1, 0.1))
            .await
            .unwrap();

        let monitor = HealthMonitor::new(Arc::clone(&aggregator));
        let (_tx, rx) = mpsc::unbounded_channel();
        monitor.start(rx).await;

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(aggregator.status_of(NodeId(0)).await, Some(NodeStatus::Healthy));

        monitor.stop().await;
    }
}
