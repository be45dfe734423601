//! Database facade.
//!
//! `Database` is the primary entry point for the engine and the only one:
//! it owns the keyspace, the indexes living inside it, the change hub, and
//! the transaction coordinator, and every public operation routes through
//! it. Boundary layers (the HTTP server) hold an `Arc<Database>` and call
//! these methods; no ambient globals exist.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::document::{self, DocEntry};
use crate::error::{DbError, DbResult};
use crate::hub::{ChangeEvent, ChangeHub};
use crate::keys;
use crate::keyspace::Keyspace;
use crate::path;
use crate::query::{self, QueryNode, QueryOptions};
use crate::write::{Coordinator, TxnOp};
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::info;

/// The main database handle.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use siltdb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// db.set("greeting", serde_json::json!({"text": "hello"}))?;
/// let value = db.get("greeting")?;
/// db.close()?;
/// ```
///
/// # In-Memory Databases
///
/// For testing, use `Database::open_in_memory()`.
pub struct Database {
    config: Config,
    keyspace: Arc<Keyspace>,
    hub: Arc<ChangeHub>,
    coordinator: Coordinator,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database from a directory path with default configuration.
    ///
    /// Recovery from the log is automatic on open.
    pub fn open(dir_path: &Path) -> DbResult<Self> {
        Self::open_with_config(dir_path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - The directory exists and `error_if_exists` is true
    /// - Recovery hits corrupted snapshot data or I/O errors
    pub fn open_with_config(dir_path: &Path, config: Config) -> DbResult<Self> {
        let dir = DatabaseDir::open(dir_path, config.create_if_missing)?;

        if !config.create_if_missing && dir.is_new_database() {
            return Err(DbError::invalid_format(
                "database does not exist and create_if_missing is false",
            ));
        }
        if config.error_if_exists && !dir.is_new_database() {
            return Err(DbError::invalid_format(
                "database already exists and error_if_exists is true",
            ));
        }

        let keyspace = Arc::new(Keyspace::open(dir, &config)?);
        info!(path = %dir_path.display(), entries = keyspace.len(), "database opened");

        Ok(Self::assemble(config, keyspace))
    }

    /// Opens a fresh in-memory database for testing.
    pub fn open_in_memory() -> DbResult<Self> {
        let config = Config::default();
        let keyspace = Arc::new(Keyspace::in_memory(&config)?);
        Ok(Self::assemble(config, keyspace))
    }

    fn assemble(config: Config, keyspace: Arc<Keyspace>) -> Self {
        let hub = Arc::new(ChangeHub::new());
        let coordinator = Coordinator::new(
            Arc::clone(&keyspace),
            Arc::clone(&hub),
            config.geo_precision,
        );
        Self {
            config,
            keyspace,
            hub,
            coordinator,
            is_open: RwLock::new(true),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Gets a document by key.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` for absent keys.
    pub fn get(&self, key: &str) -> DbResult<Value> {
        self.ensure_open()?;
        match self.keyspace.get(&keys::doc_key(key)) {
            Some(bytes) => document::decode(&bytes),
            None => Err(DbError::KeyNotFound),
        }
    }

    /// Gets a document projected onto the given field paths.
    ///
    /// An empty field list returns the full document.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` for absent keys.
    pub fn get_partial(&self, key: &str, fields: &[String]) -> DbResult<Value> {
        let doc = self.get(key)?;
        Ok(path::project(&doc, fields))
    }

    /// Snapshots the entire document mapping as an ordered `{key, value}` list.
    pub fn export(&self) -> DbResult<Vec<DocEntry>> {
        self.ensure_open()?;
        self.keyspace
            .scan_prefix(keys::DOC_NS)
            .into_iter()
            .filter_map(|(k, bytes)| {
                keys::user_key(&k).map(|key| (key.to_string(), bytes))
            })
            .map(|(key, bytes)| {
                Ok(DocEntry {
                    key,
                    value: document::decode(&bytes)?,
                })
            })
            .collect()
    }

    /// Number of documents currently stored.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.keyspace.count_prefix(keys::DOC_NS)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Executes a query AST with projection, pagination, and cancellation.
    pub fn query(&self, node: &QueryNode, options: &QueryOptions) -> DbResult<Vec<Value>> {
        self.ensure_open()?;
        query::execute(&self.keyspace, node, options, self.config.geo_precision)
    }

    /// Finds documents whose geo point at `field` lies within `radius`
    /// metres of the centre.
    pub fn query_within_radius(
        &self,
        field: &str,
        lat: f64,
        lon: f64,
        radius: f64,
    ) -> DbResult<Vec<Value>> {
        let node = QueryNode::GeoWithinRadius {
            field: field.to_string(),
            lat,
            lon,
            radius,
        };
        self.query(&node, &QueryOptions::default())
    }

    /// Finds documents whose geo point at `field` lies within the box.
    pub fn query_in_box(
        &self,
        field: &str,
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    ) -> DbResult<Vec<Value>> {
        let node = QueryNode::GeoInBox {
            field: field.to_string(),
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        };
        self.query(&node, &QueryOptions::default())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Replace-or-inserts a document.
    pub fn set(&self, key: &str, value: Value) -> DbResult<()> {
        self.ensure_open()?;
        self.coordinator.apply(&[TxnOp::Set {
            key: key.to_string(),
            value,
        }])?;
        Ok(())
    }

    /// Removes a document; absent keys are a successful no-op.
    pub fn delete(&self, key: &str) -> DbResult<()> {
        self.ensure_open()?;
        self.coordinator.apply(&[TxnOp::Delete {
            key: key.to_string(),
        }])?;
        Ok(())
    }

    /// Applies many replace-or-inserts atomically.
    pub fn batch_set(&self, items: Vec<DocEntry>) -> DbResult<()> {
        self.ensure_open()?;
        let ops: Vec<TxnOp> = items
            .into_iter()
            .map(|item| TxnOp::Set {
                key: item.key,
                value: item.value,
            })
            .collect();
        self.coordinator.apply(&ops)?;
        Ok(())
    }

    /// Applies a heterogeneous operation sequence atomically, in listed
    /// order; later operations on a key overwrite earlier ones.
    pub fn transaction(&self, ops: Vec<TxnOp>) -> DbResult<()> {
        self.ensure_open()?;
        self.coordinator.apply(&ops)?;
        Ok(())
    }

    /// Atomically deletes every document whose key starts with `prefix`.
    ///
    /// Returns the deleted count.
    pub fn clear_prefix(&self, prefix: &str) -> DbResult<usize> {
        self.ensure_open()?;
        self.coordinator.clear_prefix(prefix)
    }

    /// Atomically clears the entire keyspace.
    ///
    /// Returns the prior document count.
    pub fn drop_database(&self) -> DbResult<usize> {
        self.ensure_open()?;
        self.coordinator.drop_database()
    }

    /// Bulk-upserts a list of documents atomically.
    pub fn import(&self, items: Vec<DocEntry>) -> DbResult<()> {
        self.ensure_open()?;
        self.coordinator.import(&items)?;
        Ok(())
    }

    // ========================================================================
    // Change notifications
    // ========================================================================

    /// Subscribes to committed changes for one key.
    pub fn subscribe(&self, key: &str) -> Receiver<ChangeEvent> {
        self.hub.subscribe(key)
    }

    /// Subscribes to every committed change.
    pub fn subscribe_all(&self) -> Receiver<ChangeEvent> {
        self.hub.subscribe_all()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Writes a snapshot of the current state and truncates the log.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.ensure_open()?;
        self.keyspace.checkpoint()
    }

    /// Sequence of the last committed transaction.
    #[must_use]
    pub fn committed_seq(&self) -> u64 {
        self.keyspace.committed_seq()
    }

    /// Closes the database, checkpointing current state.
    pub fn close(&self) -> DbResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.keyspace.checkpoint()?;
        self.keyspace.flush()?;
        *is_open = false;
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> DbResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(DbError::DatabaseClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("document_count", &self.document_count())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}


/// Persistence tests that require a real file system.
#[cfg(test)]
mod persistence_tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn documents_persist_across_restarts() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("persist_test");

        {
            let db = Database::open(&db_path).unwrap();
            db.set("u1", json!({"name": "Alice"})).unwrap();
            db.close().unwrap();
        }

        {
            let db = Database::open(&db_path).unwrap();
            assert_eq!(db.get("u1").unwrap(), json!({"name": "Alice"}));
            db.close().unwrap();
        }
    }

    /// Copies database files as they are mid-session, before any
    /// close-time checkpoint runs - the on-disk state a crash would leave.
    fn snapshot_dir_state(from: &std::path::Path, to: &std::path::Path) {
        std::fs::create_dir_all(to).unwrap();
        for name in ["wal.log", "snapshot.dat"] {
            let src = from.join(name);
            if src.exists() {
                std::fs::copy(&src, to.join(name)).unwrap();
            }
        }
    }

    #[test]
    fn recovery_without_clean_close() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("crash_test");
        let crashed_path = temp.path().join("crash_test_copy");

        {
            let db = Database::open(&db_path).unwrap();
            db.set("k", json!([42, 43, 44])).unwrap();
            // Capture the files before close() can checkpoint them.
            snapshot_dir_state(&db_path, &crashed_path);
        }

        {
            let db = Database::open(&crashed_path).unwrap();
            assert_eq!(db.get("k").unwrap(), json!([42, 43, 44]));
        }
    }

    #[test]
    fn indexes_usable_after_reopen() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("index_reopen");

        {
            let db = Database::open(&db_path).unwrap();
            db.set("u1", json!({"role": "admin"})).unwrap();
            db.set("u2", json!({"role": "user"})).unwrap();
            db.close().unwrap();
        }

        {
            let db = Database::open(&db_path).unwrap();
            let results = db
                .query(
                    &QueryNode::Eq("role".into(), json!("admin"), crate::query::DataType::String),
                    &QueryOptions::default(),
                )
                .unwrap();
            assert_eq!(results, vec![json!({"role": "admin"})]);
        }
    }

    #[test]
    fn second_open_while_held_is_locked() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked");

        let _db = Database::open(&db_path).unwrap();
        assert!(matches!(
            Database::open(&db_path),
            Err(DbError::DatabaseLocked)
        ));
    }
}
