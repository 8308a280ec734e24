//! SQLite-backed session store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{check_key, RemoteStore, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    id       TEXT PRIMARY KEY NOT NULL,
    payload  BLOB NOT NULL,
    saved_at TEXT NOT NULL
)";

/// A [`RemoteStore`] keeping all sessions in one SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the schema.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

impl RemoteStore for SqliteStore {
    fn session_exists(&self, session: &str) -> Result<bool, StoreError> {
        check_key(session)?;
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![session],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn save(&self, session: &str, payload: &[u8]) -> Result<(), StoreError> {
        check_key(session)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, payload, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, saved_at = excluded.saved_at",
            params![session, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn fetch(&self, session: &str) -> Result<Vec<u8>, StoreError> {
        check_key(session)?;
        let conn = self.conn()?;
        conn.query_row(
            "SELECT payload FROM sessions WHERE id = ?1",
            params![session],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(session.to_string()))
    }

    fn delete(&self, session: &str) -> Result<(), StoreError> {
        check_key(session)?;
        let conn = self.conn()?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session])?;
        Ok(())
    }
}
