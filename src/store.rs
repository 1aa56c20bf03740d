use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::backend::{Backend, FlatTable};
use crate::errors::{BackendError, StoreError};
use crate::keys::{self, SITE_SEP};
use crate::model::{self, Dataset, MetricValue};
use crate::normalize::normalize_group;
use crate::reconcile::{self, DirtyKey, EDIT_EPSILON};

/// Site adopted by the legacy migration for pre-multi-site tables, and
/// the site seeded with defaults when the backend is unreachable.
pub const DEFAULT_SITE: &str = "default";

/// A separator-free table at or below this many keys is read as one
/// site's worth of legacy metrics (the vocabulary has 29 entries; many
/// sites flattened together would far exceed this).
pub const LEGACY_KEY_LIMIT: usize = 48;

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub used_defaults: bool,
    pub migrated: bool,
    pub skipped_keys: usize,
    pub sites: usize,
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub dirty: BTreeSet<DirtyKey>,
    /// False when there was nothing to persist and the backend write was
    /// skipped entirely.
    pub saved: bool,
}

#[derive(Clone, Debug)]
pub struct NormalizedGroup {
    pub group: &'static str,
    pub values: Vec<(&'static str, f64)>,
    pub was_normalized: bool,
}

/// In-memory metrics store: the nested site -> metric -> value view over
/// the flat persisted key space, plus the staged-edit set.
///
/// One logical owner at a time; the hosting process adds locking if it
/// needs cross-thread sharing.
pub struct Store {
    backend: Box<dyn Backend>,
    snapshot: Dataset,
    pending: BTreeMap<DirtyKey, f64>,
    /// True when the snapshot was filled from built-in defaults the
    /// backend has never seen; the next commit persists them even if no
    /// edit differs.
    defaults_unsaved: bool,
}

impl Store {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            snapshot: Dataset::new(),
            pending: BTreeMap::new(),
            defaults_unsaved: false,
        }
    }

    pub fn backend_medium(&self) -> &'static str {
        self.backend.medium()
    }

    pub fn snapshot(&self) -> &Dataset {
        &self.snapshot
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn discard_pending_edits(&mut self) {
        self.pending.clear();
    }

    /// Replace the snapshot wholesale from the backend.
    ///
    /// Refuses to run over unsaved edits unless the caller consents via
    /// `discard_pending`; an automatic reload silently dropping staged
    /// edits is the hazard this guards against. An unreachable backend
    /// degrades to the built-in defaults for the default site.
    pub fn load_snapshot(&mut self, discard_pending: bool) -> Result<LoadOutcome, StoreError> {
        if self.has_pending_edits() && !discard_pending {
            return Err(StoreError::PendingEditsWouldBeLost);
        }
        self.pending.clear();

        let mut outcome = LoadOutcome::default();

        let mut table = match self.backend.load_all() {
            Ok(table) => table,
            Err(err @ BackendError::Unavailable { .. }) => {
                warn!(error = %err, "backend unreachable, falling back to built-in defaults");
                self.snapshot = default_dataset();
                self.defaults_unsaved = true;
                outcome.used_defaults = true;
                outcome.sites = 1;
                return Ok(outcome);
            }
            Err(err) => return Err(err.into()),
        };

        if is_legacy_table(&table) {
            table = migrate_legacy(&table);
            outcome.migrated = true;
            info!(keys = table.len(), site = DEFAULT_SITE, "migrated legacy flat table");
            // Persist the upgrade immediately; a failure here only delays
            // the rewrite until the next successful commit.
            if let Err(err) = self.backend.save_all(&table) {
                warn!(error = %err, "could not persist migrated table");
            }
        }

        let (dataset, skipped) = decode_table(&table);
        outcome.skipped_keys = skipped;

        self.snapshot = if dataset.is_empty() {
            outcome.used_defaults = true;
            self.defaults_unsaved = true;
            default_dataset()
        } else {
            self.defaults_unsaved = false;
            dataset
        };
        outcome.sites = self.snapshot.len();

        Ok(outcome)
    }

    /// Raw working value: staged edit if present, else snapshot, else a
    /// renderable zero. Unknown metrics are never an error.
    pub fn get_metric(&self, site: &str, metric: &str) -> f64 {
        if let Some(value) = self
            .pending
            .get(&(site.to_string(), metric.to_string()))
        {
            return *value;
        }
        self.snapshot
            .get(site)
            .and_then(|metrics| metrics.get(metric))
            .copied()
            .unwrap_or(0.0)
    }

    /// Working value coerced to the metric's declared kind.
    pub fn typed_metric(&self, site: &str, metric: &str) -> MetricValue {
        MetricValue::coerce(model::metric_kind(metric), self.get_metric(site, metric))
    }

    /// Stage one edit; a later edit to the same `(site, metric)` wins.
    pub fn stage_edit(&mut self, site: &str, metric: &str, value: f64) -> Result<(), StoreError> {
        keys::validate_component("site", site)?;
        keys::validate_component("metric", metric)?;
        self.pending
            .insert((site.to_string(), metric.to_string()), value);
        Ok(())
    }

    /// Normalize a group's working values without committing anything.
    pub fn preview_normalized_group(
        &self,
        site: &str,
        group_name: &str,
    ) -> Result<NormalizedGroup, StoreError> {
        let spec = model::group(group_name).ok_or_else(|| StoreError::UnknownGroup {
            name: group_name.to_string(),
        })?;

        let raw: Vec<f64> = spec
            .members
            .iter()
            .map(|member| self.get_metric(site, member))
            .collect();
        let normalized = normalize_group(&raw, spec.target, spec.precision);

        Ok(NormalizedGroup {
            group: spec.name,
            values: spec
                .members
                .iter()
                .copied()
                .zip(normalized.values)
                .collect(),
            was_normalized: normalized.was_normalized,
        })
    }

    pub fn site_is_empty(&self, site: &str) -> bool {
        self.snapshot
            .get(site)
            .is_none_or(|metrics| metrics.is_empty())
    }

    /// Stage the full built-in default table for a site.
    pub fn stage_defaults(&mut self, site: &str) -> Result<(), StoreError> {
        for (metric, value) in model::DEFAULT_DATA {
            self.stage_edit(site, metric, *value)?;
        }
        Ok(())
    }

    /// Merge staged edits, re-normalize any touched groups, and persist
    /// the full flat key space.
    ///
    /// With no effective edits this is a no-op that skips the backend
    /// write. On a failed write the staged edits stay in place so the
    /// caller can retry the same commit.
    pub fn commit(&mut self) -> Result<CommitOutcome, StoreError> {
        let reconciled = reconcile::reconcile(&self.snapshot, &self.pending);
        let mut merged = reconciled.merged;
        let mut dirty = reconciled.dirty;

        if dirty.is_empty() && !self.defaults_unsaved {
            self.pending.clear();
            info!("no effective edits, nothing to save");
            return Ok(CommitOutcome {
                dirty,
                saved: false,
            });
        }

        renormalize_dirty_groups(&mut merged, &mut dirty);

        let table = encode_dataset(&merged);
        self.backend.save_all(&table)?;

        self.snapshot = merged;
        self.pending.clear();
        self.defaults_unsaved = false;
        info!(dirty = dirty.len(), keys = table.len(), "committed edits");

        Ok(CommitOutcome { dirty, saved: true })
    }
}

fn default_dataset() -> Dataset {
    let mut dataset = Dataset::new();
    dataset.insert(DEFAULT_SITE.to_string(), model::default_metrics());
    dataset
}

/// A table from the pre-multi-site era: no key carries the separator and
/// the key count is one site's worth, not many sites flattened.
pub fn is_legacy_table(table: &FlatTable) -> bool {
    !table.is_empty()
        && table.len() <= LEGACY_KEY_LIMIT
        && table.keys().all(|key| !key.contains(SITE_SEP))
}

/// Re-encode every legacy key under the default site. Idempotent at the
/// load level: the output no longer looks legacy, so a second pass never
/// runs.
pub fn migrate_legacy(table: &FlatTable) -> FlatTable {
    table
        .iter()
        .map(|(metric, value)| (keys::encode(DEFAULT_SITE, metric), value.clone()))
        .collect()
}

fn decode_table(table: &FlatTable) -> (Dataset, usize) {
    let mut dataset = Dataset::new();
    let mut skipped = 0;

    for (key, raw) in table {
        let (site, metric) = match keys::decode(key) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(key = %key, error = %err, "skipping flat key");
                skipped += 1;
                continue;
            }
        };
        let Some(value) = model::parse_raw(raw) else {
            warn!(key = %key, value = %raw, "skipping non-numeric value");
            skipped += 1;
            continue;
        };
        dataset
            .entry(site.to_string())
            .or_default()
            .insert(metric.to_string(), value);
    }

    (dataset, skipped)
}

fn encode_dataset(dataset: &Dataset) -> FlatTable {
    let mut table = FlatTable::new();
    for (site, metrics) in dataset {
        for (metric, value) in metrics {
            table.insert(keys::encode(site, metric), model::format_value(*value));
        }
    }
    table
}

/// Every group with a dirty member gets re-normalized in the merged
/// dataset; members changed by the rescale join the dirty set. Members a
/// site never recorded are materialized only when normalization gives
/// them a nonzero share.
fn renormalize_dirty_groups(merged: &mut Dataset, dirty: &mut BTreeSet<DirtyKey>) {
    let touched: BTreeSet<(String, &'static str)> = dirty
        .iter()
        .filter_map(|(site, metric)| {
            model::group_containing(metric).map(|spec| (site.clone(), spec.name))
        })
        .collect();

    for (site, group_name) in touched {
        let Some(spec) = model::group(group_name) else {
            continue;
        };
        let Some(metrics) = merged.get_mut(&site) else {
            continue;
        };

        let raw: Vec<f64> = spec
            .members
            .iter()
            .map(|member| metrics.get(*member).copied().unwrap_or(0.0))
            .collect();
        let normalized = normalize_group(&raw, spec.target, spec.precision);
        if !normalized.was_normalized {
            continue;
        }

        for (member, value) in spec.members.iter().zip(normalized.values) {
            let previous = metrics.get(*member).copied();
            if previous.is_none() && value == 0.0 {
                continue;
            }
            if previous.is_none_or(|old| (old - value).abs() > EDIT_EPSILON) {
                dirty.insert((site.clone(), member.to_string()));
            }
            metrics.insert(member.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct MemoryBackend {
        table: Rc<RefCell<FlatTable>>,
        fail_load: Rc<Cell<bool>>,
        fail_save: Rc<Cell<bool>>,
        saves: Rc<Cell<usize>>,
    }

    impl Backend for MemoryBackend {
        fn medium(&self) -> &'static str {
            "memory"
        }

        fn load_all(&self) -> Result<FlatTable, BackendError> {
            if self.fail_load.get() {
                return Err(BackendError::Unavailable {
                    medium: "memory",
                    message: "load disabled".to_string(),
                });
            }
            Ok(self.table.borrow().clone())
        }

        fn save_all(&self, table: &FlatTable) -> Result<(), BackendError> {
            if self.fail_save.get() {
                return Err(BackendError::WriteFailed {
                    medium: "memory",
                    message: "save disabled".to_string(),
                });
            }
            self.saves.set(self.saves.get() + 1);
            *self.table.borrow_mut() = table.clone();
            Ok(())
        }
    }

    fn legacy_backend() -> MemoryBackend {
        let backend = MemoryBackend::default();
        {
            let mut table = backend.table.borrow_mut();
            table.insert("hcp_educated".to_string(), "28".to_string());
            table.insert("demo_black".to_string(), "50".to_string());
            table.insert("demo_hispanic".to_string(), "50".to_string());
        }
        backend
    }

    #[test]
    fn legacy_table_is_adopted_by_the_default_site() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));

        let outcome = store.load_snapshot(false).unwrap();
        assert!(outcome.migrated);
        assert!(!outcome.used_defaults);
        assert_eq!(store.get_metric(DEFAULT_SITE, "demo_black"), 50.0);
        assert_eq!(store.get_metric(DEFAULT_SITE, "hcp_educated"), 28.0);

        let table = backend.table.borrow().clone();
        assert!(table.contains_key("default__demo_black"));
        assert!(!table.contains_key("demo_black"));
    }

    #[test]
    fn legacy_migration_is_idempotent() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();
        let after_first = backend.table.borrow().clone();

        let outcome = store.load_snapshot(false).unwrap();
        assert!(!outcome.migrated);
        assert_eq!(*backend.table.borrow(), after_first);
        assert!(!is_legacy_table(&backend.table.borrow()));
    }

    #[test]
    fn staged_demographics_preview_normalizes_to_target() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "demo_white", 50.0).unwrap();
        let preview = store
            .preview_normalized_group(DEFAULT_SITE, "demographics")
            .unwrap();

        assert!(preview.was_normalized);
        let sum: f64 = preview.values.iter().map(|(_, value)| value).sum();
        assert!((sum - 100.0).abs() <= 0.1 + 1e-9, "sum was {sum}");

        let by_name: BTreeMap<&str, f64> = preview.values.iter().copied().collect();
        assert_eq!(by_name["demo_black"], by_name["demo_hispanic"]);
        assert_eq!(by_name["demo_black"], by_name["demo_white"]);
        assert_eq!(by_name["demo_other"], 0.0);
    }

    #[test]
    fn commit_renormalizes_touched_groups_and_persists() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "demo_white", 50.0).unwrap();
        let outcome = store.commit().unwrap();
        assert!(outcome.saved);
        assert!(outcome
            .dirty
            .contains(&(DEFAULT_SITE.to_string(), "demo_white".to_string())));
        assert!(outcome
            .dirty
            .contains(&(DEFAULT_SITE.to_string(), "demo_black".to_string())));

        let total: f64 = ["demo_black", "demo_hispanic", "demo_white", "demo_other"]
            .iter()
            .map(|metric| store.get_metric(DEFAULT_SITE, metric))
            .sum();
        assert!((total - 100.0).abs() <= 0.1 + 1e-9);

        let table = backend.table.borrow().clone();
        assert_eq!(table["default__demo_black"], "33.3");
        assert_eq!(table["default__hcp_educated"], "28");
    }

    #[test]
    fn two_sites_persist_under_distinct_flat_keys() {
        let backend = MemoryBackend::default();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();

        store.stage_edit("A", "attendees_educated", 98.0).unwrap();
        store.stage_edit("B", "attendees_educated", 120.0).unwrap();
        store.commit().unwrap();

        {
            let table = backend.table.borrow();
            assert_eq!(table["A__attendees_educated"], "98");
            assert_eq!(table["B__attendees_educated"], "120");
        }

        let mut reloaded = Store::new(Box::new(backend));
        reloaded.load_snapshot(false).unwrap();
        assert_eq!(reloaded.get_metric("A", "attendees_educated"), 98.0);
        assert_eq!(reloaded.get_metric("B", "attendees_educated"), 120.0);
    }

    #[test]
    fn commit_without_edits_skips_the_backend_write() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();
        let saves_after_load = backend.saves.get();

        let outcome = store.commit().unwrap();
        assert!(!outcome.saved);
        assert!(outcome.dirty.is_empty());
        assert_eq!(backend.saves.get(), saves_after_load);
    }

    #[test]
    fn staged_edit_equal_to_snapshot_is_not_dirty() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "hcp_educated", 28.0).unwrap();
        let outcome = store.commit().unwrap();
        assert!(!outcome.saved);
        assert!(!store.has_pending_edits());
    }

    #[test]
    fn failed_save_keeps_pending_edits_for_retry() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "hcp_educated", 30.0).unwrap();
        backend.fail_save.set(true);
        assert!(matches!(
            store.commit(),
            Err(StoreError::Backend(BackendError::WriteFailed { .. }))
        ));
        assert!(store.has_pending_edits());
        assert_eq!(store.get_metric(DEFAULT_SITE, "hcp_educated"), 30.0);

        backend.fail_save.set(false);
        let outcome = store.commit().unwrap();
        assert!(outcome.saved);
        assert!(!store.has_pending_edits());
        assert_eq!(backend.table.borrow()["default__hcp_educated"], "30");
    }

    #[test]
    fn unreachable_backend_falls_back_to_defaults() {
        let backend = MemoryBackend::default();
        backend.fail_load.set(true);
        let mut store = Store::new(Box::new(backend));

        let outcome = store.load_snapshot(false).unwrap();
        assert!(outcome.used_defaults);
        assert_eq!(store.get_metric(DEFAULT_SITE, "hcp_educated"), 28.0);
        assert_eq!(store.get_metric(DEFAULT_SITE, "ldlc_0_54"), 0.54);
    }

    #[test]
    fn empty_table_also_receives_defaults() {
        let backend = MemoryBackend::default();
        let mut store = Store::new(Box::new(backend));

        let outcome = store.load_snapshot(false).unwrap();
        assert!(outcome.used_defaults);
        assert!(!store.site_is_empty(DEFAULT_SITE));
    }

    #[test]
    fn commit_after_default_fill_persists_the_defaults() {
        let backend = MemoryBackend::default();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();

        let outcome = store.commit().unwrap();
        assert!(outcome.saved);
        assert_eq!(backend.table.borrow()["default__hcp_educated"], "28");
        assert_eq!(backend.table.borrow()["default__ldlc_0_54"], "0.54");

        // Once persisted, a further empty commit is a no-op again.
        let outcome = store.commit().unwrap();
        assert!(!outcome.saved);
    }

    #[test]
    fn reload_refuses_to_drop_unsaved_edits_without_consent() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "hcp_educated", 30.0).unwrap();
        assert!(matches!(
            store.load_snapshot(false),
            Err(StoreError::PendingEditsWouldBeLost)
        ));

        store.load_snapshot(true).unwrap();
        assert!(!store.has_pending_edits());
        assert_eq!(store.get_metric(DEFAULT_SITE, "hcp_educated"), 28.0);
    }

    #[test]
    fn stray_malformed_keys_are_skipped_in_namespaced_tables() {
        let backend = MemoryBackend::default();
        {
            let mut table = backend.table.borrow_mut();
            table.insert("A__hcp_educated".to_string(), "12".to_string());
            table.insert("stray".to_string(), "7".to_string());
            table.insert("A__gender_male".to_string(), "oops".to_string());
        }
        let mut store = Store::new(Box::new(backend));

        let outcome = store.load_snapshot(false).unwrap();
        assert_eq!(outcome.skipped_keys, 2);
        assert!(!outcome.migrated);
        assert_eq!(store.get_metric("A", "hcp_educated"), 12.0);
        assert_eq!(store.get_metric("A", "gender_male"), 0.0);
    }

    #[test]
    fn unknown_metric_reads_as_zero_and_typed_values_coerce() {
        let backend = MemoryBackend::default();
        {
            let mut table = backend.table.borrow_mut();
            table.insert("A__hcp_educated".to_string(), "28.0".to_string());
            table.insert("A__ldlc_0_54".to_string(), "1".to_string());
        }
        let mut store = Store::new(Box::new(backend));
        store.load_snapshot(false).unwrap();

        assert_eq!(store.get_metric("A", "not_a_metric"), 0.0);
        assert_eq!(store.typed_metric("A", "hcp_educated"), MetricValue::Int(28));
        assert_eq!(store.typed_metric("A", "ldlc_0_54"), MetricValue::Float(1.0));
    }

    #[test]
    fn stage_edit_rejects_names_with_embedded_separator() {
        let backend = MemoryBackend::default();
        let mut store = Store::new(Box::new(backend));
        assert!(store.stage_edit("bad__site", "hcp_educated", 1.0).is_err());
        assert!(store.stage_edit("A", "bad__metric", 1.0).is_err());
    }

    #[test]
    fn last_staged_edit_wins() {
        let backend = legacy_backend();
        let mut store = Store::new(Box::new(backend.clone()));
        store.load_snapshot(false).unwrap();

        store.stage_edit(DEFAULT_SITE, "hcp_educated", 29.0).unwrap();
        store.stage_edit(DEFAULT_SITE, "hcp_educated", 31.0).unwrap();
        assert_eq!(store.get_metric(DEFAULT_SITE, "hcp_educated"), 31.0);

        store.commit().unwrap();
        assert_eq!(backend.table.borrow()["default__hcp_educated"], "31");
    }
}
