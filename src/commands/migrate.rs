use anyhow::{Context, Result};
use tracing::info;

use crate::cli::MigrateArgs;
use crate::commands;
use crate::store::{self, DEFAULT_SITE};

/// Force the legacy-to-namespaced upgrade pass. Loads also run it
/// implicitly; this makes the one-time rewrite an explicit, loggable
/// step for operators.
pub fn run(args: MigrateArgs) -> Result<()> {
    let backend = commands::open_backend(&args.data_root, args.backend, args.table_path);

    let table = backend
        .load_all()
        .context("cannot migrate an unreachable backend")?;

    if !store::is_legacy_table(&table) {
        info!(keys = table.len(), "table is already site-namespaced, nothing to migrate");
        return Ok(());
    }

    let migrated = store::migrate_legacy(&table);
    backend.save_all(&migrated)?;
    info!(
        keys = migrated.len(),
        site = DEFAULT_SITE,
        "migrated legacy flat table"
    );

    Ok(())
}
