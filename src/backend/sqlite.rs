use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags, params};

use super::{Backend, FlatTable};
use crate::errors::BackendError;
use crate::util::now_utc_string;

const MEDIUM: &str = "sqlite";

/// SQLite-backed key/value table: the "tabular service" medium. Same
/// two-column shape as the file medium, with a metadata row recording the
/// last full rewrite.
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn ensure_schema(connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metrics (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );
            ",
        )
    }
}

impl Backend for SqliteBackend {
    fn medium(&self) -> &'static str {
        MEDIUM
    }

    fn load_all(&self) -> Result<FlatTable, BackendError> {
        let unavailable = |message: String| BackendError::Unavailable {
            medium: MEDIUM,
            message,
        };

        if !self.path.exists() {
            return Err(unavailable(format!(
                "{}: database file missing",
                self.path.display()
            )));
        }

        let connection =
            Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|err| unavailable(format!("{}: {err}", self.path.display())))?;

        let mut statement = connection
            .prepare("SELECT key, value FROM metrics ORDER BY key")
            .map_err(|err| unavailable(err.to_string()))?;

        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| unavailable(err.to_string()))?;

        let mut table = FlatTable::new();
        for row in rows {
            let (key, value) = row.map_err(|err| unavailable(err.to_string()))?;
            table.insert(key, value);
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
                std::fs::create_dir_all(parent)
                    .map_err(|err| write_failed(format!("{}: {err}", parent.display())))?;
            }
        }

        let mut connection = Connection::open(&self.path)
            .map_err(|err| write_failed(format!("{}: {err}", self.path.display())))?;
        Self::ensure_schema(&connection).map_err(|err| write_failed(err.to_string()))?;

        let tx = connection
            .transaction()
            .map_err(|err| write_failed(err.to_string()))?;
        {
            tx.execute("DELETE FROM metrics", [])
                .map_err(|err| write_failed(err.to_string()))?;

            let mut statement = tx
                .prepare("INSERT INTO metrics(key, value) VALUES(?1, ?2)")
                .map_err(|err| write_failed(err.to_string()))?;
            for (key, value) in table {
                statement
                    .execute(params![key, value])
                    .map_err(|err| write_failed(err.to_string()))?;
            }

            tx.execute(
                "INSERT INTO metadata(key, value) VALUES('updated_at', ?1)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [now_utc_string()],
            )
            .map_err(|err| write_failed(err.to_string()))?;
        }
        tx.commit().map_err(|err| write_failed(err.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("missing.sqlite"));
        assert!(matches!(
            backend.load_all(),
            Err(BackendError::Unavailable { .. })
        ));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("metrics.sqlite"));

        let mut table = FlatTable::new();
        table.insert("A__attendees_educated".to_string(), "98".to_string());
        table.insert("B__attendees_educated".to_string(), "120".to_string());
        backend.save_all(&table).unwrap();

        assert_eq!(backend.load_all().unwrap(), table);
    }

    #[test]
    fn save_replaces_the_full_key_space() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("metrics.sqlite"));

        let mut first = FlatTable::new();
        first.insert("default__hcp_educated".to_string(), "28".to_string());
        first.insert("default__stale_metric".to_string(), "1".to_string());
        backend.save_all(&first).unwrap();

        let mut second = FlatTable::new();
        second.insert("default__hcp_educated".to_string(), "30".to_string());
        backend.save_all(&second).unwrap();

        assert_eq!(backend.load_all().unwrap(), second);
    }

    #[test]
    fn save_records_an_updated_at_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.sqlite");
        let backend = SqliteBackend::new(path.clone());
        backend.save_all(&FlatTable::new()).unwrap();

        let connection = Connection::open(&path).unwrap();
        let stamp: String = connection
            .query_row(
                "SELECT value FROM metadata WHERE key = 'updated_at'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!stamp.is_empty());
    }
}
