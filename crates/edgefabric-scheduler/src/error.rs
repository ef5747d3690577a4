//! Scheduler error types.

use thiserror::Error;

use edgefabric_core::{ResourceDescriptor, TaskId};

/// Errors surfaced to callers of the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid resource requirement for {0}: {1} (compute and memory must be positive)")]
    InvalidResourceRequirement(TaskId, ResourceDescriptor),

    #[error("task already submitted: {0}")]
    DuplicateTask(TaskId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task already finished: {0}")]
    AlreadyFinished(TaskId),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
