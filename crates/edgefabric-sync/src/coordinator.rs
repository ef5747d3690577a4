//! SyncCoordinator — strategy selection and sync rounds.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use edgefabric_cache::LocalCache;

use crate::authority::Authority;
use crate::error::SyncResult;
use crate::record::SyncRecord;
use crate::strategy::{ConflictResolutionStrategy, LastWriteWins};

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Keys whose authority copy was written.
    pub pushed: Vec<String>,
    /// Keys whose local copy was replaced.
    pub pulled: Vec<String>,
    /// Keys already in agreement.
    pub unchanged: usize,
    /// Keys written locally while the round was reconciling them. The
    /// newer local value is kept and reconciled next round.
    pub superseded: Vec<String>,
    /// Keys that could not be reconciled this round, with the reason.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reconciles replicas using a strategy chosen by version tag.
pub struct SyncCoordinator<T> {
    default: Arc<dyn ConflictResolutionStrategy<T>>,
    strategies: HashMap<String, Arc<dyn ConflictResolutionStrategy<T>>>,
}

impl<T> SyncCoordinator<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Coordinator with last-write-wins as the default strategy.
    pub fn new() -> Self {
        Self {
            default: Arc::new(LastWriteWins),
            strategies: HashMap::new(),
        }
    }

    /// Use `strategy` for every pair of records tagged `version`.
    /// Replaces any strategy previously registered for that tag.
    pub fn register_strategy(
        &mut self,
        version: impl Into<String>,
        strategy: impl ConflictResolutionStrategy<T> + 'static,
    ) {
        let version = version.into();
        info!(%version, "conflict strategy registered");
        self.strategies.insert(version, Arc::new(strategy));
    }

    pub fn has_strategy(&self, version: &str) -> bool {
        self.strategies.contains_key(version)
    }

    /// Merge two replicas of one key into the winning record.
    ///
    /// A registered strategy applies only when both records carry its
    /// tag; mismatched tags fall back to the default.
    pub fn reconcile(
        &self,
        local: &SyncRecord<T>,
        remote: &SyncRecord<T>,
    ) -> SyncResult<SyncRecord<T>> {
        let strategy = if local.version == remote.version {
            self.strategies
                .get(&local.version)
                .unwrap_or(&self.default)
        } else {
            &self.default
        };

        let mut winner = strategy.resolve(local, remote)?;

        let newest = local.timestamp.max(remote.timestamp);
        if winner.timestamp < newest {
            debug!(
                version = %winner.version,
                returned = winner.timestamp,
                raised_to = newest,
                "winner timestamp raised to newest input"
            );
            winner.timestamp = newest;
        }

        Ok(winner)
    }

    /// Reconcile every live entry of `cache` with `authority`.
    ///
    /// Keys unknown to the authority are pushed as-is. The winner of each
    /// reconciliation is written to whichever side differs from it. The
    /// local write only lands if the cache still holds the record this
    /// round read, so a concurrent local update is never rolled back.
    pub async fn sync_round(
        &self,
        cache: &LocalCache<SyncRecord<T>>,
        authority: &dyn Authority<T>,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for (key, local) in cache.snapshot().await {
            let remote = match authority.fetch(&key) {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(%key, error = %e, "authority fetch failed");
                    report.failed.push((key, e.to_string()));
                    continue;
                }
            };

            let Some(remote) = remote else {
                match authority.store(&key, &local) {
                    Ok(()) => report.pushed.push(key),
                    Err(e) => {
                        warn!(%key, error = %e, "authority store failed");
                        report.failed.push((key, e.to_string()));
                    }
                }
                continue;
            };

            let winner = match self.reconcile(&local, &remote) {
                Ok(w) => w,
                Err(e) => {
                    warn!(%key, error = %e, "reconciliation failed");
                    report.failed.push((key, e.to_string()));
                    continue;
                }
            };

            if winner == local && winner == remote {
                report.unchanged += 1;
                continue;
            }

            if winner != remote {
                if let Err(e) = authority.store(&key, &winner) {
                    warn!(%key, error = %e, "authority store failed");
                    report.failed.push((key, e.to_string()));
                    continue;
                }
                report.pushed.push(key.clone());
            }
            if winner != local {
                if cache.set_if(&key, &local, winner).await {
                    report.pulled.push(key);
                } else {
                    debug!(%key, "local record changed during round, keeping it");
                    report.superseded.push(key);
                }
            }
        }

        debug!(
            pushed = report.pushed.len(),
            pulled = report.pulled.len(),
            unchanged = report.unchanged,
            superseded = report.superseded.len(),
            failed = report.failed.len(),
            "sync round finished"
        );
        report
    }
}

impl<T> Default for SyncCoordinator<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
