//! Edit reconciliation: merge staged edits into a copy of the loaded
//! snapshot and report which `(site, metric)` pairs actually changed.
//!
//! Last writer wins. There is no conflict detection against external
//! writes to the backend between load and save; the original system has
//! the same gap and this core preserves it.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::Dataset;

/// Differences at or below this magnitude are treated as "unchanged".
pub const EDIT_EPSILON: f64 = 1e-9;

pub type DirtyKey = (String, String);

#[derive(Clone, Debug)]
pub struct Reconciled {
    /// The full dataset to persist: every site and metric, not just the
    /// dirty ones.
    pub merged: Dataset,
    pub dirty: BTreeSet<DirtyKey>,
}

/// Apply `pending` on top of `snapshot`.
///
/// An edit equal to the snapshot value (within [`EDIT_EPSILON`]) is
/// dropped silently; with no effective edits the merged dataset is
/// structurally equal to the snapshot and the dirty set is empty.
pub fn reconcile(snapshot: &Dataset, pending: &BTreeMap<DirtyKey, f64>) -> Reconciled {
    let mut merged = snapshot.clone();
    let mut dirty = BTreeSet::new();

    for ((site, metric), value) in pending {
        let current = snapshot
            .get(site)
            .and_then(|metrics| metrics.get(metric))
            .copied();

        let changed = match current {
            Some(existing) => (existing - value).abs() > EDIT_EPSILON,
            None => true,
        };
        if !changed {
            continue;
        }

        merged
            .entry(site.clone())
            .or_default()
            .insert(metric.clone(), *value);
        dirty.insert((site.clone(), metric.clone()));
    }

    Reconciled { merged, dirty }
}
