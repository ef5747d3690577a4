//! Conflict-resolution strategies.

use crate::error::SyncResult;
use crate::record::SyncRecord;

/// Merges two replicas of the same key into one winner.
///
/// Implementations must be pure: the result depends only on the two
/// inputs. The coordinator raises the winner's timestamp to the newer
/// input's if a strategy returns an older one.
pub trait ConflictResolutionStrategy<T>: Send + Sync {
    fn resolve(&self, local: &SyncRecord<T>, remote: &SyncRecord<T>)
    -> SyncResult<SyncRecord<T>>;
}

/// Newer timestamp wins; on a tie the remote (authority) copy wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<T: Clone> ConflictResolutionStrategy<T> for LastWriteWins {
    fn resolve(
        &self,
        local: &SyncRecord<T>,
        remote: &SyncRecord<T>,
    ) -> SyncResult<SyncRecord<T>> {
        if local.timestamp > remote.timestamp {
            Ok(local.clone())
        } else {
            Ok(remote.clone())
        }
    }
}

/// Union of two append-only collections, sorted and deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetUnion;

impl<E: Ord + Clone> ConflictResolutionStrategy<Vec<E>> for SetUnion {
    fn resolve(
        &self,
        local: &SyncRecord<Vec<E>>,
        remote: &SyncRecord<Vec<E>>,
    ) -> SyncResult<SyncRecord<Vec<E>>> {
        let mut merged: Vec<E> = local
            .payload
            .iter()
            .chain(remote.payload.iter())
            .cloned()
            .collect();
        merged.sort();
        merged.dedup();

        Ok(SyncRecord {
            timestamp: local.timestamp.max(remote.timestamp),
            version: remote.version.clone(),
            payload: merged,
        })
    }
}

/// Adapts a closure into a strategy.
pub struct FnStrategy<F>(pub F);

impl<T, F> ConflictResolutionStrategy<T> for FnStrategy<F>
where
    F: Fn(&SyncRecord<T>, &SyncRecord<T>) -> SyncResult<SyncRecord<T>> + Send + Sync,
{
    fn resolve(
        &self,
        local: &SyncRecord<T>,
        remote: &SyncRecord<T>,
    ) -> SyncResult<SyncRecord<T>> {
        (self.0)(local, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec<T>(ts: u64, payload: T) -> SyncRecord<T> {
        SyncRecord::new(ts, "v1", payload)
    }

    #[test]
    fn lww_newer_wins_either_way() {
        let a = rec(100, "a");
        let b = rec(200, "b");
        assert_eq!(LastWriteWins.resolve(&a, &b).unwrap(), b);
        assert_eq!(LastWriteWins.resolve(&b, &a).unwrap(), b);
    }

    #[test]
    fn lww_tie_prefers_remote() {
        let local = rec(100, "a");
        let remote = rec(100, "b");
        assert_eq!(LastWriteWins.resolve(&local, &remote).unwrap().payload, "b");
    }

    #[test]
    fn set_union_merges() {
        let local = rec(5, vec![1, 3, 5]);
        let remote = rec(9, vec![2, 3]);
        let merged = SetUnion.resolve(&local, &remote).unwrap();
        assert_eq!(merged.payload, vec![1, 2, 3, 5]);
        assert_eq!(merged.timestamp, 9);
        assert_eq!(SetUnion.resolve(&remote, &local).unwrap(), merged);
    }
}
