//! Durable record store backing the pending request queue
//!
//! The queue persists its contents as an ordered, index-addressed set of
//! records, one serialized envelope per position. The store is opaque to the
//! rest of the core beyond this contract: replace the whole image, list it
//! back in order. Records that fail to deserialize on load are dropped
//! individually without corrupting their neighbors.

use std::path::Path;

use rusqlite::Connection;

use crate::errors::QueueError;

// ----------------------------------------------------------------------------
// Record Store Contract
// ----------------------------------------------------------------------------

/// Ordered, position-keyed record storage
pub trait RecordStore: Send {
    /// Atomically replace the stored image with `records`, preserving order
    fn replace_all(&mut self, records: &[String]) -> Result<(), QueueError>;

    /// Load all records in position order
    fn load_all(&self) -> Result<Vec<(usize, String)>, QueueError>;
}

// ----------------------------------------------------------------------------
// Sqlite-backed Store
// ----------------------------------------------------------------------------

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS pending_requests (
    position INTEGER PRIMARY KEY,
    envelope TEXT NOT NULL
)";

/// Durable store persisting the queue image in a local sqlite database
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, QueueError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueueError::Store {
                reason: format!("failed to create store directory: {e}"),
            })?;
        }

        let conn = Connection::open(path).map_err(store_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(store_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(store_err)?;
        conn.execute(SCHEMA, []).map_err(store_err)?;

        Ok(Self { conn })
    }

    /// Open an in-memory sqlite store (no durability, used in tests)
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute(SCHEMA, []).map_err(store_err)?;
        Ok(Self { conn })
    }
}

impl RecordStore for SqliteRecordStore {
    fn replace_all(&mut self, records: &[String]) -> Result<(), QueueError> {
        let tx = self.conn.transaction().map_err(store_err)?;
        tx.execute("DELETE FROM pending_requests", [])
            .map_err(store_err)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO pending_requests (position, envelope) VALUES (?1, ?2)")
                .map_err(store_err)?;
            for (position, record) in records.iter().enumerate() {
                stmt.execute(rusqlite::params![position as i64, record])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }

    fn load_all(&self) -> Result<Vec<(usize, String)>, QueueError> {
        let mut stmt = self
            .conn
            .prepare("SELECT position, envelope FROM pending_requests ORDER BY position")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?))
            })
            .map_err(store_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(store_err)?);
        }
        Ok(records)
    }
}

fn store_err(e: rusqlite::Error) -> QueueError {
    QueueError::Store {
        reason: e.to_string(),
    }
}

// ----------------------------------------------------------------------------
// In-memory Store
// ----------------------------------------------------------------------------

/// Volatile store for configurations that opt out of durability
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Vec<String>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn replace_all(&mut self, records: &[String]) -> Result<(), QueueError> {
        self.records = records.to_vec();
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(usize, String)>, QueueError> {
        Ok(self
            .records
            .iter()
            .cloned()
            .enumerate()
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_replace_and_load() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store
            .replace_all(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], (0, "a".to_string()));
        assert_eq!(records[2], (2, "c".to_string()));

        // Replacing shrinks as well as grows.
        store.replace_all(&["x".to_string()]).unwrap();
        let records = store.load_all().unwrap();
        assert_eq!(records, vec![(0, "x".to_string())]);
    }

    #[test]
    fn test_sqlite_empty_image() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store.replace_all(&[]).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryRecordStore::new();
        store.replace_all(&["one".to_string(), "two".to_string()]).unwrap();
        let records = store.load_all().unwrap();
        assert_eq!(records[1], (1, "two".to_string()));
    }
}
