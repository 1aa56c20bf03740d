use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands;
use crate::model::{self, MetricValue};
use crate::util::now_utc_string;

#[derive(Debug, Serialize)]
struct StatusReport {
    generated_at: String,
    backend: &'static str,
    used_defaults: bool,
    sites: Vec<SiteReport>,
}

#[derive(Debug, Serialize)]
struct SiteReport {
    site: String,
    metrics: BTreeMap<String, MetricValue>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let mut store = commands::open_store(&args.data_root, args.backend, args.table_path);

    let outcome = store.load_snapshot(false)?;
    if outcome.used_defaults {
        warn!("backend had no data, reporting built-in defaults");
    }
    if outcome.migrated {
        info!("legacy flat table upgraded to site-namespaced keys");
    }
    if outcome.skipped_keys > 0 {
        warn!(skipped = outcome.skipped_keys, "skipped unusable flat keys");
    }
    info!(
        backend = store.backend_medium(),
        sites = outcome.sites,
        "loaded snapshot"
    );

    let sites: Vec<SiteReport> = store
        .snapshot()
        .iter()
        .filter(|(site, _)| {
            args.site
                .as_deref()
                .is_none_or(|wanted| wanted == site.as_str())
        })
        .map(|(site, metrics)| SiteReport {
            site: site.clone(),
            metrics: metrics
                .keys()
                .map(|metric| (metric.clone(), store.typed_metric(site, metric)))
                .collect(),
        })
        .collect();

    if let Some(wanted) = &args.site {
        if sites.is_empty() {
            warn!(site = %wanted, "no data for requested site");
        }
    }

    if args.json {
        let report = StatusReport {
            generated_at: now_utc_string(),
            backend: store.backend_medium(),
            used_defaults: outcome.used_defaults,
            sites,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for report in &sites {
        println!("{}", report.site);
        for spec in model::GROUPS {
            let present: Vec<String> = spec
                .members
                .iter()
                .filter(|member| report.metrics.contains_key(**member))
                .map(|member| format!("{member}={}", report.metrics[*member]))
                .collect();
            if !present.is_empty() {
                println!("  {}: {}", spec.name, present.join("  "));
            }
        }
        for (metric, value) in &report.metrics {
            if model::group_containing(metric).is_none() {
                println!("  {metric} = {value}");
            }
        }
    }

    Ok(())
}
