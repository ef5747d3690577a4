//! Persisted task outcome records.

use serde::{Deserialize, Serialize};

use edgefabric_core::{NodeId, Payload, TaskId};

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded { output: Payload },
    Failed { reason: String },
    Cancelled,
}

/// Terminal record of a task, kept for provenance after it leaves the
/// runtime's in-memory view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Node of the last attempt, if the task was ever dispatched.
    pub node_id: Option<NodeId>,
    pub attempts: u32,
    pub outcome: OutcomeKind,
    /// Unix epoch milliseconds.
    pub finished_at: u64,
}
