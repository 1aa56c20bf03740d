use anyhow::Result;
use tracing::warn;

use crate::cli::GetArgs;
use crate::commands;

pub fn run(args: GetArgs) -> Result<()> {
    let mut store = commands::open_store(&args.data_root, args.backend, args.table_path);

    let outcome = store.load_snapshot(false)?;
    if outcome.used_defaults {
        warn!("backend had no data, reporting built-in defaults");
    }

    println!("{}", store.typed_metric(&args.site, &args.metric));
    Ok(())
}
