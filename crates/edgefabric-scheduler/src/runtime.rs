//! EdgeRuntime — dispatches queued tasks onto healthy nodes.
//!
//! Every change to where a task lives (queue, in flight, finished) happens
//! under the `in_flight` lock, so `dispatch`, `cancel` and attempt
//! completion never observe a task half-moved. Capacity reservation
//! itself is atomic inside the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use edgefabric_core::{NodeId, Payload, SchedulerConfig, Task, TaskId, TaskSubmission, epoch_millis};
use edgefabric_health::HealthAggregator;
use edgefabric_registry::{NodeRegistry, Reservation};
use edgefabric_state::{OutcomeKind, StateStore, TaskOutcome};

use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::{ExecutionError, Executor};
use crate::queue::{QueuedTask, TaskQueue};

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue. `attempts` counts failed attempts so far.
    Queued { attempts: u32 },
    Running { node_id: NodeId, attempt: u32 },
    Succeeded { node_id: NodeId, output: Payload },
    /// Retry budget exhausted.
    Failed { reason: String, attempts: u32 },
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. } | TaskStatus::Failed { .. } | TaskStatus::Cancelled
        )
    }
}

/// Result of one dispatch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// The queue was empty.
    Idle,
    /// No healthy node could fit the head task; it went back to the queue
    /// at its original position.
    NoCapacity { task_id: TaskId },
    Dispatched { task_id: TaskId, node_id: NodeId },
}

/// How a cancellation took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue before any node saw it.
    Dequeued,
    /// The node was signalled; a late result will be discarded.
    Signalled,
}

struct InFlight {
    queued: QueuedTask,
    reservation: Reservation,
    cancelled: bool,
}

struct Shared {
    registry: Arc<NodeRegistry>,
    health: Arc<HealthAggregator>,
    executor: Arc<dyn Executor>,
    config: SchedulerConfig,
    state: Option<StateStore>,
    queue: TaskQueue,
    statuses: RwLock<HashMap<TaskId, TaskStatus>>,
    in_flight: Mutex<HashMap<TaskId, InFlight>>,
    executions: Mutex<JoinSet<()>>,
    capacity_freed: Notify,
}

/// Cheap to clone; clones share one runtime.
#[derive(Clone)]
pub struct EdgeRuntime {
    shared: Arc<Shared>,
}

impl EdgeRuntime {
    pub fn new(
        registry: Arc<NodeRegistry>,
        health: Arc<HealthAggregator>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
    ) -> Self {
        Self::build(registry, health, executor, config, None)
    }

    /// Like [`EdgeRuntime::new`], additionally persisting every terminal
    /// outcome to `store`.
    pub fn with_state_store(
        registry: Arc<NodeRegistry>,
        health: Arc<HealthAggregator>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
        store: StateStore,
    ) -> Self {
        Self::build(registry, health, executor, config, Some(store))
    }

    fn build(
        registry: Arc<NodeRegistry>,
        health: Arc<HealthAggregator>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
        state: Option<StateStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                health,
                executor,
                config,
                state,
                queue: TaskQueue::new(),
                statuses: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                executions: Mutex::new(JoinSet::new()),
                capacity_freed: Notify::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.shared.registry
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.shared.health
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Accept a task into the queue. Acknowledges acceptance only;
    /// completion is observed through [`EdgeRuntime::status`].
    pub async fn submit(&self, submission: TaskSubmission) -> SchedulerResult<TaskId> {
        let task = Task::from(submission);
        if !task.requirement.is_positive() {
            warn!(task_id = %task.id, requirement = %task.requirement, "rejected task with non-positive requirement");
            return Err(SchedulerError::InvalidResourceRequirement(
                task.id,
                task.requirement,
            ));
        }

        let mut statuses = self.shared.statuses.write().await;
        if statuses.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }

        let task_id = task.id.clone();
        let requirement = task.requirement;
        self.shared.queue.enqueue(task).await?;
        statuses.insert(task_id.clone(), TaskStatus::Queued { attempts: 0 });

        info!(%task_id, %requirement, "task submitted");
        Ok(task_id)
    }

    pub async fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.shared.statuses.read().await.get(task_id).cloned()
    }

    /// Number of attempts currently running on nodes.
    pub async fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().await.len()
    }

    /// Take the head of the queue and place it on the healthy node with
    /// the most remaining capacity.
    ///
    /// Never waits for capacity: when nothing fits the task is requeued
    /// and `NoCapacity` returned, leaving the retry to the caller's loop.
    pub async fn dispatch(&self) -> DispatchResult {
        let shared = &self.shared;
        let mut in_flight = shared.in_flight.lock().await;

        let Some(queued) = shared.queue.dequeue_next().await else {
            return DispatchResult::Idle;
        };
        let task_id = queued.task.id.clone();
        let candidates = shared.health.healthy_nodes().await;

        let Some(reservation) = shared
            .registry
            .reserve_best_fit(&candidates, queued.task.requirement)
            .await
        else {
            if shared.registry.fits_any_declared(queued.task.requirement).await {
                debug!(
                    %task_id,
                    requirement = %queued.task.requirement,
                    healthy = candidates.len(),
                    "no healthy node has capacity"
                );
            } else {
                let waiting_behind = shared.queue.len().await;
                warn!(
                    %task_id,
                    requirement = %queued.task.requirement,
                    waiting_behind,
                    "task exceeds every active node's declared capacity, queue is stalled behind it"
                );
            }
            if let Err(err) = shared.queue.requeue(queued).await {
                warn!(%task_id, error = %err, "failed to requeue task");
            }
            return DispatchResult::NoCapacity { task_id };
        };

        let node_id = reservation.node_id();
        let attempt = queued.attempts + 1;
        let task = queued.task.clone();
        in_flight.insert(
            task_id.clone(),
            InFlight {
                queued,
                reservation,
                cancelled: false,
            },
        );
        shared
            .set_status(&task_id, TaskStatus::Running { node_id, attempt })
            .await;

        let execution = shared.executor.execute(node_id, task);
        let timeout = shared.config.execution_timeout;
        let runner = Arc::clone(shared);
        let id = task_id.clone();

        let mut executions = shared.executions.lock().await;
        while executions.try_join_next().is_some() {}
        executions.spawn(async move {
            let result = match tokio::time::timeout(timeout, execution).await {
                Ok(result) => result,
                Err(_) => {
                    // The node may still be working; its capacity is about
                    // to be handed out again.
                    runner.executor.cancel(node_id, &id);
                    Err(ExecutionError::TimedOut(timeout))
                }
            };
            runner.complete(&id, result).await;
        });

        info!(%task_id, %node_id, attempt, "task dispatched");
        DispatchResult::Dispatched { task_id, node_id }
    }

    /// Dispatch until the queue is empty or the head task does not fit.
    pub async fn dispatch_ready(&self) -> usize {
        let mut dispatched = 0;
        while let DispatchResult::Dispatched { .. } = self.dispatch().await {
            dispatched += 1;
        }
        dispatched
    }

    /// Cancel a queued or running task.
    ///
    /// A queued task is removed outright. For a running task the executor
    /// is signalled and the attempt's eventual result is discarded; its
    /// reservation is held until that result arrives.
    pub async fn cancel(&self, task_id: &TaskId) -> SchedulerResult<CancelOutcome> {
        let shared = &self.shared;
        let mut in_flight = shared.in_flight.lock().await;

        if let Some(entry) = in_flight.get_mut(task_id) {
            if entry.cancelled {
                return Err(SchedulerError::AlreadyFinished(task_id.clone()));
            }
            entry.cancelled = true;
            let node_id = entry.reservation.node_id();
            let attempts = entry.queued.attempts + 1;
            shared.executor.cancel(node_id, task_id);
            shared.set_status(task_id, TaskStatus::Cancelled).await;
            shared.persist(task_id, Some(node_id), attempts, OutcomeKind::Cancelled);
            info!(%task_id, %node_id, "running task cancelled");
            return Ok(CancelOutcome::Signalled);
        }

        let mut statuses = shared.statuses.write().await;
        match statuses.get(task_id) {
            None => return Err(SchedulerError::UnknownTask(task_id.clone())),
            Some(status) if status.is_terminal() => {
                return Err(SchedulerError::AlreadyFinished(task_id.clone()));
            }
            Some(_) => {}
        }

        let attempts = match shared.queue.cancel(task_id).await {
            Some(queued) => queued.attempts,
            None => {
                warn!(%task_id, "non-terminal task is neither queued nor running");
                0
            }
        };
        statuses.insert(task_id.clone(), TaskStatus::Cancelled);
        drop(statuses);

        shared.persist(task_id, None, attempts, OutcomeKind::Cancelled);
        info!(%task_id, "queued task cancelled");
        Ok(CancelOutcome::Dequeued)
    }

    /// Wait until every spawned attempt has reported back.
    ///
    /// Retried tasks go back to the queue and are not dispatched here.
    pub async fn drain(&self) {
        loop {
            let mut executions = std::mem::take(&mut *self.shared.executions.lock().await);
            if executions.is_empty() {
                break;
            }
            while let Some(joined) = executions.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "execution task aborted");
                }
            }
        }
    }

    /// Keep dispatching until `shutdown` flips.
    ///
    /// Wakes on new submissions, on released capacity and every
    /// `retry_interval` so tasks stuck on `NoCapacity` or requeued after
    /// a failure get another chance once nodes recover.
    pub async fn run(&self, retry_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(retry_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(retry_interval_ms = retry_interval.as_millis() as u64, "dispatch loop started");

        loop {
            tokio::select! {
                _ = self.shared.queue.ready() => {}
                _ = self.shared.capacity_freed.notified() => {}
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    debug!("dispatch loop shutting down");
                    break;
                }
            }

            let dispatched = self.dispatch_ready().await;
            if dispatched > 0 {
                debug!(dispatched, "dispatch pass complete");
            }
        }
    }
}

impl Shared {
    async fn set_status(&self, task_id: &TaskId, status: TaskStatus) {
        self.statuses.write().await.insert(task_id.clone(), status);
    }

    fn persist(&self, task_id: &TaskId, node_id: Option<NodeId>, attempts: u32, outcome: OutcomeKind) {
        let Some(store) = &self.state else {
            return;
        };
        let record = TaskOutcome {
            task_id: task_id.clone(),
            node_id,
            attempts,
            outcome,
            finished_at: epoch_millis(),
        };
        if let Err(err) = store.put_task_outcome(&record) {
            warn!(%task_id, error = %err, "failed to persist task outcome");
        }
    }

    /// Settle one attempt: release its capacity, then record success,
    /// requeue for another attempt, or record terminal failure.
    async fn complete(&self, task_id: &TaskId, result: Result<Payload, ExecutionError>) {
        let mut in_flight = self.in_flight.lock().await;
        let Some(InFlight {
            mut queued,
            reservation,
            cancelled,
        }) = in_flight.remove(task_id)
        else {
            warn!(%task_id, "result for a task that is not in flight");
            return;
        };

        let node_id = reservation.node_id();
        self.registry.release(reservation).await;
        self.capacity_freed.notify_one();

        if cancelled {
            debug!(%task_id, %node_id, "discarding late result of cancelled task");
            return;
        }

        queued.attempts += 1;
        let attempts = queued.attempts;
        match result {
            Ok(output) => {
                info!(%task_id, %node_id, attempts, "task succeeded");
                self.set_status(
                    task_id,
                    TaskStatus::Succeeded {
                        node_id,
                        output: output.clone(),
                    },
                )
                .await;
                self.persist(task_id, Some(node_id), attempts, OutcomeKind::Succeeded { output });
            }
            Err(err) if attempts <= self.config.max_retries => {
                warn!(
                    %task_id,
                    %node_id,
                    attempts,
                    max_retries = self.config.max_retries,
                    error = %err,
                    "task attempt failed; requeueing"
                );
                self.set_status(task_id, TaskStatus::Queued { attempts }).await;
                if let Err(err) = self.queue.requeue(queued).await {
                    warn!(%task_id, error = %err, "failed to requeue task");
                }
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(%task_id, %node_id, attempts, reason = %reason, "task failed permanently");
                self.set_status(
                    task_id,
                    TaskStatus::Failed {
                        reason: reason.clone(),
                        attempts,
                    },
                )
                .await;
                self.persist(task_id, Some(node_id), attempts, OutcomeKind::Failed { reason });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use edgefabric_core::HealthConfig;
    use edgefabric_health::HealthReport;
    use edgefabric_registry::NodeSpec;

    use super::*;
    use crate::executor::{ExecutionFuture, LoopbackExecutor};

    async fn cluster(nodes: &[(u32, u64)]) -> (Arc<NodeRegistry>, Arc<HealthAggregator>) {
        let registry = Arc::new(NodeRegistry::new());
        let health = Arc::new(HealthAggregator::new(HealthConfig::default()));
        for (compute, memory) in nodes {
            let id = registry.register(NodeSpec::new(*compute, *memory)).await.unwrap();
            health.seed(id).await;
            health
                .ingest(HealthReport::new(id, 0.1, 0.1, 0.1))
                .await
                .unwrap();
        }
        (registry, health)
    }

    fn config(max_retries: u32) -> SchedulerConfig {
        SchedulerConfig {
            max_retries,
            execution_timeout: Duration::from_secs(5),
        }
    }

    /// Fails the first `failures` attempts, then echoes.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Executor for Flaky {
        fn execute(&self, _node_id: NodeId, task: Task) -> ExecutionFuture {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = call < self.failures;
            Box::pin(async move {
                if fail {
                    Err(ExecutionError::Failed(format!("attempt {} crashed", call + 1)))
                } else {
                    Ok(task.payload)
                }
            })
        }
    }

    #[tokio::test]
    async fn submit_rejects_invalid_and_duplicate() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let runtime = EdgeRuntime::new(registry, health, Arc::new(LoopbackExecutor), config(3));

        let err = runtime.submit(TaskSubmission::new("zero", 0, 128)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidResourceRequirement(_, _)));
        assert_eq!(runtime.status(&TaskId::new("zero")).await, None);

        runtime.submit(TaskSubmission::new("t", 1, 128)).await.unwrap();
        assert_eq!(
            runtime.submit(TaskSubmission::new("t", 1, 128)).await,
            Err(SchedulerError::DuplicateTask(TaskId::new("t")))
        );
    }

    #[tokio::test]
    async fn success_releases_and_records_output() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let runtime = EdgeRuntime::new(
            Arc::clone(&registry),
            health,
            Arc::new(LoopbackExecutor),
            config(3),
        );

        let id = runtime
            .submit(TaskSubmission::new("echo", 2, 1024).with_payload(Payload::Text("hi".into())))
            .await
            .unwrap();
        assert_eq!(runtime.dispatch().await, DispatchResult::Dispatched {
            task_id: id.clone(),
            node_id: NodeId(0),
        });
        runtime.drain().await;

        assert_eq!(
            runtime.status(&id).await,
            Some(TaskStatus::Succeeded {
                node_id: NodeId(0),
                output: Payload::Text("hi".into()),
            })
        );
        assert_eq!(
            registry.remaining_of(NodeId(0)).await.unwrap(),
            edgefabric_core::ResourceDescriptor::new(4, 4096)
        );
        assert_eq!(runtime.in_flight().await, 0);
    }

    #[tokio::test]
    async fn idle_when_queue_empty() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let runtime = EdgeRuntime::new(registry, health, Arc::new(LoopbackExecutor), config(3));
        assert_eq!(runtime.dispatch().await, DispatchResult::Idle);
    }

    #[tokio::test]
    async fn retries_then_succeeds_within_budget() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let executor = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let runtime = EdgeRuntime::new(registry, health, executor.clone(), config(3));
        let id = runtime.submit(TaskSubmission::new("flaky", 1, 128)).await.unwrap();

        for expected_failures in 1..=2 {
            runtime.dispatch().await;
            runtime.drain().await;
            assert_eq!(
                runtime.status(&id).await,
                Some(TaskStatus::Queued {
                    attempts: expected_failures
                })
            );
        }

        runtime.dispatch().await;
        runtime.drain().await;
        assert!(matches!(runtime.status(&id).await, Some(TaskStatus::Succeeded { .. })));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        #[derive(Default)]
        struct Hang {
            cancels: AtomicU32,
        }
        impl Executor for Hang {
            fn execute(&self, _node_id: NodeId, _task: Task) -> ExecutionFuture {
                Box::pin(std::future::pending())
            }

            fn cancel(&self, node_id: NodeId, task_id: &TaskId) {
                assert_eq!((node_id, task_id.as_str()), (NodeId(0), "slow"));
                self.cancels.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (registry, health) = cluster(&[(4, 4096)]).await;
        let executor = Arc::new(Hang::default());
        let runtime = EdgeRuntime::new(
            Arc::clone(&registry),
            health,
            executor.clone(),
            config(0),
        );
        let id = runtime.submit(TaskSubmission::new("slow", 1, 128)).await.unwrap();
        runtime.dispatch().await;
        runtime.drain().await;

        assert_eq!(
            runtime.status(&id).await,
            Some(TaskStatus::Failed {
                reason: "execution timed out after 5s".into(),
                attempts: 1,
            })
        );
        assert_eq!(
            registry.remaining_of(NodeId(0)).await.unwrap().compute_units,
            4
        );
        // The node was told to stop before its capacity was released.
        assert_eq!(executor.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_outcomes_are_persisted() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let store = StateStore::open_in_memory().unwrap();
        let runtime = EdgeRuntime::with_state_store(
            registry,
            health,
            Arc::new(LoopbackExecutor),
            config(3),
            store.clone(),
        );

        runtime.submit(TaskSubmission::new("done", 1, 128)).await.unwrap();
        runtime.submit(TaskSubmission::new("dropped", 1, 128)).await.unwrap();
        runtime.cancel(&TaskId::new("dropped")).await.unwrap();
        runtime.dispatch().await;
        runtime.drain().await;

        let done = store.get_task_outcome("done").unwrap().unwrap();
        assert_eq!(done.node_id, Some(NodeId(0)));
        assert_eq!(done.attempts, 1);
        assert!(matches!(done.outcome, OutcomeKind::Succeeded { .. }));

        let dropped = store.get_task_outcome("dropped").unwrap().unwrap();
        assert_eq!(dropped.outcome, OutcomeKind::Cancelled);
        assert_eq!(dropped.node_id, None);
    }

    #[tokio::test]
    async fn cancel_unknown_and_finished() {
        let (registry, health) = cluster(&[(4, 4096)]).await;
        let runtime = EdgeRuntime::new(registry, health, Arc::new(LoopbackExecutor), config(3));

        assert_eq!(
            runtime.cancel(&TaskId::new("ghost")).await,
            Err(SchedulerError::UnknownTask(TaskId::new("ghost")))
        );

        let id = runtime.submit(TaskSubmission::new("quick", 1, 128)).await.unwrap();
        runtime.dispatch().await;
        runtime.drain().await;
        assert_eq!(
            runtime.cancel(&id).await,
            Err(SchedulerError::AlreadyFinished(id.clone()))
        );
    }
}
