//! Persistent metadata store
//!
//! One SQLite table of document metadata, written after every successful
//! download and read back when the in-memory listing has nothing fresher.
//! Migrations are append-only.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use tracing::{debug, info, warn};

use crate::provider::Document;

/// A single schema migration, tracked in `schema_meta`
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE documents (
            _id           INTEGER PRIMARY KEY AUTOINCREMENT,
            _display_name TEXT    NOT NULL,
            document_id   TEXT    NOT NULL UNIQUE,
            flags         INTEGER NOT NULL DEFAULT 0,
            last_modified INTEGER NOT NULL,
            mime_type     TEXT    NOT NULL,
            _size         INTEGER NOT NULL
        );
    ",
}];

/// Durable metadata of downloaded documents, keyed by document id
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    /// Open (or create) the store at `path` and apply pending migrations
    pub fn open(path: &Path) -> SqlResult<Self> {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Document store opened");
        Ok(store)
    }

    /// Store backed by a private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> SqlResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_meta (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Row for `document_id`, if it was ever downloaded
    pub fn get(&self, document_id: &str) -> SqlResult<Option<Document>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT _display_name, document_id, flags, last_modified, mime_type, _size
                 FROM documents WHERE document_id = ?1",
                [document_id],
                |row| {
                    Ok(Document {
                        name: row.get(0)?,
                        document_id: row.get(1)?,
                        flags: row.get(2)?,
                        last_modified: row.get(3)?,
                        mime_type: row.get(4)?,
                        size: row.get::<_, i64>(5)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        debug!(document_id = document_id, found = row.is_some(), "Document store lookup");
        Ok(row)
    }

    /// Insert or replace the row for `document.document_id`
    pub fn upsert(&self, document: &Document) -> SqlResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (_display_name, document_id, flags, last_modified, mime_type, _size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(document_id) DO UPDATE SET
                _display_name = excluded._display_name,
                flags = excluded.flags,
                last_modified = excluded.last_modified,
                mime_type = excluded.mime_type,
                _size = excluded._size",
            params![
                document.name,
                document.document_id,
                document.flags,
                document.last_modified,
                document.mime_type,
                document.size as i64,
            ],
        )?;
        debug!(document_id = %document.document_id, "Document metadata stored");
        Ok(())
    }

    /// Number of stored rows
    pub fn len(&self) -> SqlResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Apply all migrations whose version hasn't been recorded yet
fn apply_migrations(conn: &Connection) -> SqlResult<()> {
    let max_applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_meta",
        [],
        |row| row.get(0),
    )?;

    for m in MIGRATIONS {
        if m.version > max_applied {
            conn.execute_batch(m.sql)?;
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", [m.version])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, last_modified: i64, size: u64) -> Document {
        Document {
            name: id.rsplit('/').next().unwrap().to_string(),
            document_id: id.to_string(),
            flags: 0,
            last_modified,
            mime_type: "text/plain".to_string(),
            size,
        }
    }

    #[test]
    fn test_get_missing() {
        let store = DocumentStore::open_in_memory().unwrap();
        assert_eq!(store.get("acct/a.txt").unwrap(), None);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_upsert_replaces_row() {
        let store = DocumentStore::open_in_memory().unwrap();

        store.upsert(&doc("acct/a.txt", 1_000, 10)).unwrap();
        store.upsert(&doc("acct/a.txt", 2_000, 20)).unwrap();
        store.upsert(&doc("acct/b.txt", 500, 5)).unwrap();

        assert_eq!(store.len().unwrap(), 2);
        let row = store.get("acct/a.txt").unwrap().unwrap();
        assert_eq!(row.last_modified, 2_000);
        assert_eq!(row.size, 20);
        assert_eq!(row.name, "a.txt");
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("documents.db");

        {
            let store = DocumentStore::open(&path).unwrap();
            store.upsert(&doc("acct/a.txt", 1_000, 10)).unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.get("acct/a.txt").unwrap(), Some(doc("acct/a.txt", 1_000, 10)));
    }

    #[test]
    fn test_open_under_file_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        assert!(DocumentStore::open(&blocker.join("documents.db")).is_err());
    }
}
