//! The seam between the dispatcher and the nodes that run tasks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use edgefabric_core::{NodeId, Payload, Task, TaskId};

/// Why an attempt did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The node reported a failure.
    #[error("{0}")]
    Failed(String),

    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),
}

pub type ExecutionFuture =
    Pin<Box<dyn Future<Output = Result<Payload, ExecutionError>> + Send>>;

/// Hands a task to a node and resolves with the node's report.
pub trait Executor: Send + Sync {
    fn execute(&self, node_id: NodeId, task: Task) -> ExecutionFuture;

    /// Ask the node to stop working on a task. Best effort; the attempt's
    /// future still resolves and its result is discarded.
    fn cancel(&self, node_id: NodeId, task_id: &TaskId) {
        debug!(%node_id, %task_id, "executor has no cancel hook");
    }
}

/// Runs every task in-process and echoes its payload back as output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackExecutor;

impl Executor for LoopbackExecutor {
    fn execute(&self, node_id: NodeId, task: Task) -> ExecutionFuture {
        Box::pin(async move {
            debug!(%node_id, task_id = %task.id, "loopback execution");
            Ok(task.payload)
        })
    }
}

#[cfg(test)]
mod tests {
    use edgefabric_core::ResourceDescriptor;

    use super::*;

    #[tokio::test]
    async fn loopback_echoes_payload() {
        let task = Task::new(
            TaskId::new("echo"),
            ResourceDescriptor::new(1, 64),
            Payload::Text("hello".into()),
        );
        let output = LoopbackExecutor.execute(NodeId(0), task).await.unwrap();
        assert_eq!(output, Payload::Text("hello".into()));
    }

    #[test]
    fn timeout_message_mentions_duration() {
        let err = ExecutionError::TimedOut(Duration::from_secs(2));
        assert_eq!(err.to_string(), "execution timed out after 2s");
    }
}
