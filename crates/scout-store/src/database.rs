use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Thread-safe SQLite connection wrapper.
/// Uses parking_lot::Mutex for synchronous access (rusqlite is not Sync).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        initialize(&conn)?;

        info!(path = %path.display(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing and one-shot CLI runs).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        initialize(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn initialize(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn schema_version_set_once() {
        let db = Database::in_memory().unwrap();
        let (version, rows): (u32, u32) = db
            .with_conn(|conn| {
                let version =
                    conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;
                let rows =
                    conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?;
                Ok((version, rows))
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
        assert_eq!(rows, 1);
    }

    #[test]
    fn tables_created() {
        let db = Database::in_memory().unwrap();
        let tables = table_names(&db);
        for expected in ["workspaces", "domains", "documents", "documents_fts"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/scout.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let db2 = Database::open(&path).unwrap();
        let rows: u32 = db2
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
        drop(db);
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
