use std::fs;
use std::path::PathBuf;

use tracing::warn;

use super::{Backend, FlatTable};
use crate::errors::BackendError;

const MEDIUM: &str = "file";
const HEADER: &str = "key\tvalue";

/// Tab-delimited flat file, one `key<TAB>value` row per line with a header
/// row written on save and skipped on load by convention.
pub struct DelimitedFileBackend {
    path: PathBuf,
}

impl DelimitedFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Backend for DelimitedFileBackend {
    fn medium(&self) -> &'static str {
        MEDIUM
    }

    fn load_all(&self) -> Result<FlatTable, BackendError> {
        let raw = fs::read_to_string(&self.path).map_err(|err| BackendError::Unavailable {
            medium: MEDIUM,
            message: format!("{}: {err}", self.path.display()),
        })?;

        let mut table = FlatTable::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() || (index == 0 && line == HEADER) {
                continue;
            }
            match line.split_once('\t') {
                Some((key, value)) if !key.is_empty() => {
                    table.insert(key.to_string(), value.to_string());
                }
                _ => {
                    warn!(line = index + 1, path = %self.path.display(), "skipping unparseable row");
                }
            }
        }

        Ok(table)
    }

    fn save_all(&self, table: &FlatTable) -> Result<(), BackendError> {
        let write_failed = |message: String| BackendError::WriteFailed {
            medium: MEDIUM,
            message,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| write_failed(format!("{}: {err}", parent.display())))?;
            }
        }

        let mut contents = String::with_capacity(table.len() * 32);
        contents.push_str(HEADER);
        contents.push('\n');
        for (key, value) in table {
            contents.push_str(key);
            contents.push('\t');
            contents.push_str(value);
            contents.push('\n');
        }

        // Write to a sibling and rename so a failed save never leaves a
        // half-written table behind.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, contents)
            .map_err(|err| write_failed(format!("{}: {err}", staging.display())))?;
        fs::rename(&staging, &self.path)
            .map_err(|err| write_failed(format!("{}: {err}", self.path.display())))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DelimitedFileBackend::new(dir.path().join("missing.tsv"));
        assert!(matches!(
            backend.load_all(),
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn save_then_load_round_trips_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DelimitedFileBackend::new(dir.path().join("metrics.tsv"));

        let mut table = FlatTable::new();
        table.insert("A__attendees_educated".to_string(), "98".to_string());
        table.insert("B__attendees_educated".to_string(), "120".to_string());
        backend.save_all(&table).unwrap();

        let raw = fs::read_to_string(dir.path().join("metrics.tsv")).unwrap();
        assert!(raw.starts_with("key\tvalue\n"));

        assert_eq!(backend.load_all().unwrap(), table);
    }

    #[test]
    fn save_is_repeatable_and_replaces_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DelimitedFileBackend::new(dir.path().join("metrics.tsv"));

        let mut first = FlatTable::new();
        first.insert("default__hcp_educated".to_string(), "28".to_string());
        backend.save_all(&first).unwrap();

        let mut second = FlatTable::new();
        second.insert("default__hcp_educated".to_string(), "30".to_string());
        backend.save_all(&second).unwrap();
        backend.save_all(&second).unwrap();

        assert_eq!(backend.load_all().unwrap(), second);
    }

    #[test]
    fn unparseable_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.tsv");
        fs::write(&path, "key\tvalue\ndefault__hcp_educated\t28\nnot a row\n").unwrap();

        let backend = DelimitedFileBackend::new(path);
        let table = backend.load_all().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table["default__hcp_educated"], "28");
    }
}
