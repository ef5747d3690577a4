//! Sync error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A strategy declined to produce a single winner.
    #[error("reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    #[error("authority unavailable: {0}")]
    Authority(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
