use anyhow::{Result, bail};
use tracing::info;

use crate::cli::SeedArgs;
use crate::commands;

/// Write the built-in default metric table for a site.
pub fn run(args: SeedArgs) -> Result<()> {
    let mut store = commands::open_store(&args.data_root, args.backend, args.table_path);
    store.load_snapshot(false)?;

    if !store.site_is_empty(&args.site) && !args.force {
        bail!(
            "site {} already has data; pass --force to overwrite it with defaults",
            args.site
        );
    }

    store.stage_defaults(&args.site)?;
    let outcome = store.commit()?;

    if outcome.saved {
        info!(site = %args.site, metrics = outcome.dirty.len(), "seeded defaults");
    } else {
        info!(site = %args.site, "site already matches the defaults");
    }

    Ok(())
}
