//! Persistent table store on sled.
//!
//! Each table is a sled tree named `table:<name>`. Rows are rkyv-encoded and
//! keyed by a big-endian id from [`sled::Db::generate_id`], so a scan returns
//! rows in insertion order.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sled::{Db, Tree};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::query::Statement;
use joinery_proto::ResultRow;

use super::{evaluate, QueryBackend, TableStore};

/// Prefix of table trees.
const TABLE_PREFIX: &str = "table:";

/// Sled cache size in bytes.
const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Table store backed by a sled database.
pub struct SledBackend {
    db: Db,
    statements: AtomicU64,
}

impl SledBackend {
    /// Open or create a database at `path`.
    ///
    /// There is no background flusher: writes reach disk on [`flush`] or when
    /// the backend is dropped, and the file lock is released with it.
    ///
    /// [`flush`]: SledBackend::flush
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(DEFAULT_CACHE_CAPACITY)
            .use_compression(true)
            .flush_every_ms(None)
            .open()?;
        debug!(path = %path.as_ref().display(), recovered = db.was_recovered(), "opened sled backend");
        Ok(Self::from_db(db))
    }

    /// Open a database that is removed when dropped.
    pub fn temporary() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db))
    }

    /// Wrap an open database.
    pub fn from_db(db: Db) -> Self {
        Self {
            db,
            statements: AtomicU64::new(0),
        }
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Names of the tables opened in this database.
    pub fn tables(&self) -> Vec<String> {
        self.db
            .tree_names()
            .iter()
            .filter_map(|name| std::str::from_utf8(name).ok())
            .filter_map(|name| name.strip_prefix(TABLE_PREFIX))
            .map(str::to_string)
            .collect()
    }

    fn tree(&self, table: &str) -> Result<Tree, Error> {
        Ok(self.db.open_tree(format!("{}{}", TABLE_PREFIX, table))?)
    }

    fn encode(row: &ResultRow) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(row)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<ResultRow, Error> {
        // sled gives no alignment guarantee for stored values.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<ResultRow, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl TableStore for SledBackend {
    fn scan(&self, table: &str) -> Result<Vec<ResultRow>, Error> {
        let tree = self.tree(table)?;
        let mut rows = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            rows.push(Self::decode(&bytes)?);
        }
        Ok(rows)
    }

    fn insert(&self, table: &str, row: ResultRow) -> Result<(), Error> {
        let id = self.db.generate_id()?;
        self.tree(table)?.insert(id.to_be_bytes(), Self::encode(&row)?)?;
        Ok(())
    }
}

#[async_trait]
impl QueryBackend for SledBackend {
    async fn execute(&self, statement: Statement<'_>) -> Result<Vec<ResultRow>, Error> {
        let n = self.statements.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(statement = n, "executing statement");
        evaluate::execute(self, statement)
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "failed to flush sled backend on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinery_proto::Value;

    #[test]
    fn test_scan_in_insertion_order() {
        let backend = SledBackend::temporary().unwrap();
        for (id, name) in [(3i64, "c"), (1, "a"), (2, "b")] {
            backend
                .insert("letters", ResultRow::new().with("id", id).with("name", name))
                .unwrap();
        }

        let rows = backend.scan("letters").unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").clone()).collect();
        assert_eq!(ids, vec![Value::Int64(3), Value::Int64(1), Value::Int64(2)]);
        assert_eq!(rows[0].get("name"), &Value::from("c"));
        assert!(backend.scan("missing").unwrap().is_empty());
        assert!(backend.tables().contains(&"letters".to_string()));
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = SledBackend::open(dir.path()).unwrap();
            backend
                .insert("notes", ResultRow::new().with("id", 1i64).with("body", Value::Null))
                .unwrap();
            backend.flush().unwrap();
        }

        let backend = SledBackend::open(dir.path()).unwrap();
        let rows = backend.scan("notes").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("body"));
        assert!(rows[0].get("body").is_null());
    }

    #[test]
    fn test_reopen_after_drop_without_flush() {
        let dir = tempfile::tempdir().unwrap();
        for round in 1..=5i64 {
            let backend = SledBackend::open(dir.path()).unwrap();
            assert_eq!(backend.scan("notes").unwrap().len() as i64, round - 1);
            backend
                .insert("notes", ResultRow::new().with("id", round))
                .unwrap();
        }
        let backend = SledBackend::open(dir.path()).unwrap();
        assert_eq!(backend.scan("notes").unwrap().len(), 5);
    }
}
