use std::collections::BTreeMap;

use crate::errors::BackendError;

mod file;
mod sqlite;

pub use file::DelimitedFileBackend;
pub use sqlite::SqliteBackend;

/// The persisted key space: flat key -> raw string value. `BTreeMap` keeps
/// write ordering stable (site then metric, lexicographic) so saved tables
/// stay diffable.
pub type FlatTable = BTreeMap<String, String>;

/// Read/write contract over the persistence medium.
///
/// `load_all` returns every persisted pair or fails with
/// [`BackendError::Unavailable`]; the caller falls back to defaults rather
/// than crashing. `save_all` replaces the entire key space and presents as
/// all-or-nothing; it is safe to call repeatedly. Values travel as strings
/// and numeric interpretation belongs to the store.
pub trait Backend {
    fn medium(&self) -> &'static str;

    fn load_all(&self) -> Result<FlatTable, BackendError>;

    fn save_all(&self, table: &FlatTable) -> Result<(), BackendError>;
}
