//! Database directory management.
//!
//! This module handles the file system layout for siltdb:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ wal.log           # Write-ahead log of committed batches
//! └─ snapshot.dat      # Full keyspace snapshot written at checkpoint
//! ```
//!
//! The LOCK file ensures only one process can open the database at a time.

use crate::error::{DbError, DbResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File names within the database directory.
const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "snapshot.dat";
/// Temporary file for atomic snapshot writes.
const SNAPSHOT_TEMP: &str = "snapshot.tmp";

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the database directory
    /// * `create_if_missing` - If true, creates the directory if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> DbResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(DbError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(DbError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        // Acquire exclusive lock (non-blocking)
        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(DbError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the write-ahead log file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Checks if this is a new (empty) database directory.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.snapshot_path().exists() && !self.wal_path().exists()
    }

    /// Writes snapshot bytes to disk atomically.
    ///
    /// Uses write-then-rename for crash safety:
    /// 1. Write to temporary file
    /// 2. Sync temporary file to disk
    /// 3. Rename temporary file to snapshot.dat
    /// 4. Fsync the directory so the rename is durable
    pub fn save_snapshot(&self, data: &[u8]) -> DbResult<()> {
        use std::io::Write;

        let snapshot_path = self.snapshot_path();
        let temp_path = self.path.join(SNAPSHOT_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &snapshot_path)?;
        self.sync_directory()?;

        Ok(())
    }

    /// Loads the snapshot bytes from disk.
    ///
    /// Returns `None` if the snapshot file doesn't exist (new database).
    pub fn load_snapshot(&self) -> DbResult<Option<Vec<u8>>> {
        use std::io::Read;

        let snapshot_path = self.snapshot_path();
        if !snapshot_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(data))
    }

    /// Syncs the database directory to ensure metadata updates are durable.
    ///
    /// On Windows, directory fsync is not supported in the same way as Unix.
    /// NTFS journaling provides similar durability for metadata operations,
    /// so the explicit fsync is skipped there.
    #[cfg(unix)]
    fn sync_directory(&self) -> DbResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> DbResult<()> {
        Ok(())
    }
}
