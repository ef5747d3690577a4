//! Best-fit-by-slack node selection.
//!
//! Among nodes that can hold the demand, prefer the one left with the
//! most unreserved capacity after the hypothetical assignment. Compute
//! slack is compared first, then memory slack; remaining ties go to the
//! lowest node id so the choice is deterministic.

use std::cmp::Reverse;

use edgefabric_core::{NodeId, ResourceDescriptor};

use crate::registry::NodeRecord;

/// Pick the best-fit candidate for `demand`, or `None` if nothing fits.
pub fn select_best_fit<'a>(
    candidates: impl IntoIterator<Item = &'a NodeRecord>,
    demand: &ResourceDescriptor,
) -> Option<NodeId> {
    candidates
        .into_iter()
        .filter(|n| !n.retired && demand.fits_within(&n.remaining()))
        .max_by_key(|n| {
            let slack = n.remaining().saturating_sub(*demand);
            (slack.compute_units, slack.memory_mb, Reverse(n.id))
        })
        .map(|n| n.id)
}
