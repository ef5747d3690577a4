//! TaskQueue — pending tasks ordered heaviest first.
//!
//! Ordering key: compute units descending, then memory descending, then
//! submission sequence ascending. Placing the largest tasks first is the
//! usual greedy bin-packing heuristic; the sequence tiebreak keeps equal
//! tasks FIFO so none of them starves.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use edgefabric_core::{Task, TaskId};

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    compute: Reverse<u32>,
    memory: Reverse<u64>,
    sequence: u64,
}

/// A task plus its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub task: Task,
    /// Assigned on first enqueue, kept across retries.
    pub sequence: u64,
    /// Failed attempts so far.
    pub attempts: u32,
}

impl QueuedTask {
    fn key(&self) -> PriorityKey {
        PriorityKey {
            compute: Reverse(self.task.requirement.compute_units),
            memory: Reverse(self.task.requirement.memory_mb),
            sequence: self.sequence,
        }
    }
}

struct Inner {
    ordered: BTreeMap<PriorityKey, QueuedTask>,
    index: HashMap<TaskId, PriorityKey>,
    next_sequence: u64,
}

impl Inner {
    fn insert(&mut self, queued: QueuedTask) {
        let key = queued.key();
        self.index.insert(queued.task.id.clone(), key);
        self.ordered.insert(key, queued);
    }
}

pub struct TaskQueue {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ordered: BTreeMap::new(),
                index: HashMap::new(),
                next_sequence: 0,
            }),
            ready: Notify::new(),
        }
    }

    /// Add a new task behind every queued task of equal weight.
    pub async fn enqueue(&self, task: Task) -> SchedulerResult<()> {
        if !task.requirement.is_positive() {
            return Err(SchedulerError::InvalidResourceRequirement(
                task.id,
                task.requirement,
            ));
        }

        let mut inner = self.inner.lock().await;
        if inner.index.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        debug!(task_id = %task.id, sequence, requirement = %task.requirement, "task enqueued");
        inner.insert(QueuedTask {
            task,
            sequence,
            attempts: 0,
        });
        drop(inner);

        self.ready.notify_one();
        Ok(())
    }

    /// Put a previously dequeued task back at its original position.
    ///
    /// Does not fire the readiness signal: the caller decides when the
    /// task becomes worth retrying.
    pub async fn requeue(&self, queued: QueuedTask) -> SchedulerResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.index.contains_key(&queued.task.id) {
            return Err(SchedulerError::DuplicateTask(queued.task.id));
        }
        debug!(
            task_id = %queued.task.id,
            sequence = queued.sequence,
            attempts = queued.attempts,
            "task requeued"
        );
        inner.insert(queued);
        Ok(())
    }

    /// Remove and return the highest-priority task, or `None` if empty.
    /// Never waits.
    pub async fn dequeue_next(&self) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().await;
        let (_, queued) = inner.ordered.pop_first()?;
        inner.index.remove(&queued.task.id);
        Some(queued)
    }

    /// Remove a specific queued task.
    pub async fn cancel(&self, task_id: &TaskId) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().await;
        let key = inner.index.remove(task_id)?;
        inner.ordered.remove(&key)
    }

    pub async fn contains(&self, task_id: &TaskId) -> bool {
        self.inner.lock().await.index.contains_key(task_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.ordered.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.ordered.is_empty()
    }

    /// Queued task ids in dequeue order.
    pub async fn pending(&self) -> Vec<TaskId> {
        let inner = self.inner.lock().await;
        inner.ordered.values().map(|q| q.task.id.clone()).collect()
    }

    /// Resolves after the next `enqueue` (or immediately if one happened
    /// since the last wait).
    pub async fn ready(&self) {
        self.ready.notified().await;
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use edgefabric_core::{Payload, ResourceDescriptor};

    use super::*;

    fn task(id: &str, compute: u32, memory: u64) -> Task {
        Task::new(
            TaskId::new(id),
            ResourceDescriptor::new(compute, memory),
            Payload::Empty,
        )
    }

    async fn drain(queue: &TaskQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(q) = queue.dequeue_next().await {
            out.push(q.task.id.to_string());
        }
        out
    }

    #[tokio::test]
    async fn orders_by_compute_then_memory() {
        let queue = TaskQueue::new();
        queue.enqueue(task("A", 2, 512)).await.unwrap();
        queue.enqueue(task("B", 3, 1024)).await.unwrap();
        queue.enqueue(task("C", 1, 256)).await.unwrap();
        assert_eq!(drain(&queue).await, vec!["B", "A", "C"]);
    }

    #[tokio::test]
    async fn memory_breaks_compute_ties() {
        let queue = TaskQueue::new();
        queue.enqueue(task("small", 2, 256)).await.unwrap();
        queue.enqueue(task("big", 2, 2048)).await.unwrap();
        assert_eq!(drain(&queue).await, vec!["big", "small"]);
    }

    #[tokio::test]
    async fn equal_tasks_stay_fifo() {
        let queue = TaskQueue::new();
        for id in ["t1", "t2", "t3", "t4"] {
            queue.enqueue(task(id, 1, 128)).await.unwrap();
        }
        assert_eq!(drain(&queue).await, vec!["t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn heavy_arrival_overtakes() {
        let queue = TaskQueue::new();
        queue.enqueue(task("light-1", 1, 128)).await.unwrap();
        queue.enqueue(task("light-2", 1, 128)).await.unwrap();
        assert_eq!(queue.pending().await[0].as_str(), "light-1");

        queue.enqueue(task("heavy", 8, 128)).await.unwrap();
        assert_eq!(drain(&queue).await, vec!["heavy", "light-1", "light-2"]);
    }

    #[tokio::test]
    async fn dequeue_output_is_non_increasing() {
        let queue = TaskQueue::new();
        let shapes = [(3, 100), (1, 900), (3, 200), (2, 50), (3, 100), (1, 900), (5, 1)];
        for (i, (c, m)) in shapes.iter().enumerate() {
            queue.enqueue(task(&format!("t{i}"), *c, *m)).await.unwrap();
        }

        let mut prev: Option<QueuedTask> = None;
        while let Some(q) = queue.dequeue_next().await {
            if let Some(p) = &prev {
                let pk = (p.task.requirement.compute_units, p.task.requirement.memory_mb);
                let qk = (q.task.requirement.compute_units, q.task.requirement.memory_mb);
                assert!(pk >= qk);
                if pk == qk {
                    assert!(p.sequence < q.sequence);
                }
            }
            prev = Some(q);
        }
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let queue = TaskQueue::new();
        assert!(queue.dequeue_next().await.is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn rejects_non_positive_requirement() {
        let queue = TaskQueue::new();
        let err = queue.enqueue(task("bad", 0, 128)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidResourceRequirement(_, _)));
        let err = queue.enqueue(task("bad", 1, 0)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidResourceRequirement(_, _)));
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let queue = TaskQueue::new();
        queue.enqueue(task("dup", 1, 128)).await.unwrap();
        assert_eq!(
            queue.enqueue(task("dup", 2, 128)).await,
            Err(SchedulerError::DuplicateTask(TaskId::new("dup")))
        );
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn requeue_keeps_original_position() {
        let queue = TaskQueue::new();
        queue.enqueue(task("first", 1, 128)).await.unwrap();
        queue.enqueue(task("second", 1, 128)).await.unwrap();

        let mut first = queue.dequeue_next().await.unwrap();
        queue.enqueue(task("third", 1, 128)).await.unwrap();
        first.attempts = 1;
        queue.requeue(first).await.unwrap();

        let next = queue.dequeue_next().await.unwrap();
        assert_eq!(next.task.id.as_str(), "first");
        assert_eq!(next.attempts, 1);
        assert_eq!(drain(&queue).await, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn cancel_removes_task() {
        let queue = TaskQueue::new();
        queue.enqueue(task("a", 1, 128)).await.unwrap();
        queue.enqueue(task("b", 1, 128)).await.unwrap();

        let removed = queue.cancel(&TaskId::new("a")).await.unwrap();
        assert_eq!(removed.task.id.as_str(), "a");
        assert!(queue.cancel(&TaskId::new("a")).await.is_none());
        assert!(!queue.contains(&TaskId::new("a")).await);
        assert_eq!(drain(&queue).await, vec!["b"]);
    }

    #[tokio::test]
    async fn ready_fires_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.ready().await })
        };
        queue.enqueue(task("a", 1, 128)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
