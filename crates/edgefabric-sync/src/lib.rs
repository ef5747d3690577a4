//! edgefabric-sync — reconciling node replicas with the authority.
//!
//! A [`SyncRecord`] is one replica's view of a shared datum. Two records
//! for the same key are merged by a [`ConflictResolutionStrategy`]; the
//! coordinator picks the strategy by version tag and falls back to
//! last-write-wins.
//!
//! Reconciliation is a pure function of its two inputs, so a sync round
//! can be retried or run redundantly. A sync round never fails as a
//! whole: per-key authority errors are collected in the [`SyncReport`]
//! and retry scheduling is left to the caller.

pub mod authority;
pub mod coordinator;
pub mod error;
pub mod record;
pub mod strategy;

pub use authority::Authority;
pub use coordinator::{SyncCoordinator, SyncReport};
pub use error::{SyncError, SyncResult};
pub use record::SyncRecord;
pub use strategy::{ConflictResolutionStrategy, FnStrategy, LastWriteWins, SetUnion};
