//! Versioned replica records.

use serde::{Deserialize, Serialize};

/// One replica's view of a shared datum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord<T> {
    /// Write time; larger is newer.
    pub timestamp: u64,
    /// Version tag, used to select a conflict-resolution strategy.
    pub version: String,
    pub payload: T,
}

impl<T> SyncRecord<T> {
    pub fn new(timestamp: u64, version: impl Into<String>, payload: T) -> Self {
        Self {
            timestamp,
            version: version.into(),
            payload,
        }
    }
}
