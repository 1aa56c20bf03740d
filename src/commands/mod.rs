use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{Backend, DelimitedFileBackend, SqliteBackend};
use crate::cache::CachedBackend;
use crate::cli::BackendKind;
use crate::store::Store;

pub mod get;
pub mod migrate;
pub mod seed;
pub mod set;
pub mod status;

/// Matches the refresh interval the dashboard used between backend reads.
const CACHE_MAX_AGE: Duration = Duration::from_secs(60);

pub(crate) fn open_backend(
    data_root: &Path,
    kind: BackendKind,
    table_path: Option<PathBuf>,
) -> Box<dyn Backend> {
    match kind {
        BackendKind::File => {
            let path = table_path.unwrap_or_else(|| data_root.join("metrics.tsv"));
            Box::new(CachedBackend::new(
                DelimitedFileBackend::new(path),
                CACHE_MAX_AGE,
            ))
        }
        BackendKind::Sqlite => {
            let path = table_path.unwrap_or_else(|| data_root.join("metrics.sqlite"));
            Box::new(CachedBackend::new(SqliteBackend::new(path), CACHE_MAX_AGE))
        }
    }
}

pub(crate) fn open_store(
    data_root: &Path,
    kind: BackendKind,
    table_path: Option<PathBuf>,
) -> Store {
    Store::new(open_backend(data_root, kind, table_path))
}
