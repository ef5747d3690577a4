//! The authority side of a sync round.

use serde::Serialize;
use serde::de::DeserializeOwned;

use edgefabric_state::StateStore;

use crate::error::{SyncError, SyncResult};
use crate::record::SyncRecord;

/// Where the authoritative copy of each record lives.
pub trait Authority<T>: Send + Sync {
    fn fetch(&self, key: &str) -> SyncResult<Option<SyncRecord<T>>>;
    fn store(&self, key: &str, record: &SyncRecord<T>) -> SyncResult<()>;
}

impl<T> Authority<T> for StateStore
where
    T: Serialize + DeserializeOwned,
{
    fn fetch(&self, key: &str) -> SyncResult<Option<SyncRecord<T>>> {
        self.get_record(key)
            .map_err(|e| SyncError::Authority(e.to_string()))
    }

    fn store(&self, key: &str, record: &SyncRecord<T>) -> SyncResult<()> {
        self.put_record(key, record)
            .map_err(|e| SyncError::Authority(e.to_string()))
    }
}
