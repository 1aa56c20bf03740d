use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::SetArgs;
use crate::commands;
use crate::model;

pub fn run(args: SetArgs) -> Result<()> {
    let metric_pattern =
        Regex::new(r"^[a-z][a-z0-9_]*$").context("failed to compile metric name pattern")?;
    let edits = parse_edits(&args.edits, &metric_pattern)?;

    let mut store = commands::open_store(&args.data_root, args.backend, args.table_path);
    let outcome = store.load_snapshot(false)?;
    if outcome.used_defaults {
        warn!("backend had no data, editing on top of built-in defaults");
    }

    for (metric, value) in &edits {
        store.stage_edit(&args.site, metric, *value)?;
    }

    let touched_groups: BTreeSet<&'static str> = edits
        .iter()
        .filter_map(|(metric, _)| model::group_containing(metric))
        .map(|spec| spec.name)
        .collect();

    for group in touched_groups {
        let preview = store.preview_normalized_group(&args.site, group)?;
        if preview.was_normalized {
            warn!(
                site = %args.site,
                group = preview.group,
                "group does not sum to its target and will be normalized on save"
            );
            for (member, value) in preview.values.iter().copied() {
                info!(metric = member, value, "normalized preview");
            }
        }
    }

    if args.dry_run {
        info!(staged = edits.len(), "dry run, discarding staged edits");
        store.discard_pending_edits();
        return Ok(());
    }

    let outcome = store
        .commit()
        .context("commit failed; re-run to retry with the same edits")?;
    if outcome.saved {
        info!(site = %args.site, dirty = outcome.dirty.len(), "saved changes");
    } else {
        info!(site = %args.site, "values already match, nothing saved");
    }

    Ok(())
}

fn parse_edits(raw: &[String], metric_pattern: &Regex) -> Result<Vec<(String, f64)>> {
    let mut edits = Vec::with_capacity(raw.len());

    for entry in raw {
        let Some((metric, value)) = entry.split_once('=') else {
            bail!("expected METRIC=VALUE, got: {entry}");
        };
        if !metric_pattern.is_match(metric) {
            bail!("invalid metric name: {metric}");
        }
        let value: f64 = value
            .parse()
            .with_context(|| format!("invalid numeric value for {metric}: {value}"))?;
        if !value.is_finite() || value < 0.0 {
            bail!("metric values must be finite and non-negative: {entry}");
        }
        edits.push((metric.to_string(), value));
    }

    Ok(edits)
}
