//! The durable sorted byte keyspace.
//!
//! This is the store adapter beneath the engine: a single lexicographically
//! sorted keyspace with point reads, prefix and range scans, atomic batch
//! commits, a fenced clear, and point-in-time recovery on open.
//!
//! Durability follows the log-then-apply discipline: a batch is framed into
//! one checksummed log record, made durable, and only then applied to the
//! in-memory sorted map that serves reads. Recovery replays the valid log
//! prefix on top of the last checkpoint snapshot, so a crash can only lose
//! un-acknowledged batches, never tear one apart.

mod snapshot;
mod wal;

pub use wal::{WalRecord, WalRecordType};

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::DbResult;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use wal::WalManager;

/// An ordered set of mutations applied atomically.
///
/// Keys may not repeat between puts and deletes; callers stage the *net*
/// effect of a transaction, not its intermediate states.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    puts: Vec<(Vec<u8>, Vec<u8>)>,
    deletes: Vec<Vec<u8>>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an insert-or-overwrite.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.puts.push((key, value));
    }

    /// Stages a removal.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.deletes.push(key);
    }

    /// Returns true if the batch stages nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    /// Number of staged mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }
}

/// The durable sorted keyspace.
///
/// Readers take the map's read lock and see a consistent view; scans
/// materialize their results under that lock. Batch commits are expected
/// to be serialized by the caller (the write path holds the single writer
/// lock), which makes the sequence numbering race-free.
pub struct Keyspace {
    /// Database directory. None for in-memory keyspaces.
    dir: Option<DatabaseDir>,
    /// Write-ahead log.
    wal: WalManager,
    /// Sorted view serving all reads.
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Sequence of the last committed batch.
    committed_seq: AtomicU64,
    /// Log size that triggers an automatic checkpoint.
    max_wal_size: u64,
    /// Serializes commits, clears, and checkpoints against each other.
    ///
    /// A checkpoint truncates the log; racing it against a commit could
    /// wipe a batch record before its effects reach the snapshot.
    commit_lock: Mutex<()>,
}

impl Keyspace {
    /// Opens a persistent keyspace inside a locked database directory.
    ///
    /// Recovery is automatic: the last snapshot is loaded and the valid
    /// log prefix replayed on top of it. A torn log tail is truncated.
    pub fn open(dir: DatabaseDir, config: &Config) -> DbResult<Self> {
        let (mut map, snapshot_seq) = match dir.load_snapshot()? {
            Some(bytes) => {
                let (sequence, map) = snapshot::decode_snapshot(&bytes)?;
                debug!(sequence, entries = map.len(), "loaded snapshot");
                (map, sequence)
            }
            None => (BTreeMap::new(), 0),
        };

        let wal = WalManager::open(&dir.wal_path(), config.sync_on_commit)?;

        let (records, valid_len) = wal.read_valid_prefix()?;
        if valid_len < wal.size()? {
            wal.truncate(valid_len)?;
        }

        let mut committed_seq = snapshot_seq;
        let mut replayed = 0usize;
        for record in records {
            let sequence = record.sequence();
            if sequence <= snapshot_seq {
                continue; // already captured by the snapshot
            }
            match record {
                WalRecord::Batch { puts, deletes, .. } => {
                    for key in deletes {
                        map.remove(&key);
                    }
                    for (key, value) in puts {
                        map.insert(key, value);
                    }
                    replayed += 1;
                }
                WalRecord::Clear { .. } => {
                    map.clear();
                    replayed += 1;
                }
                WalRecord::Checkpoint { .. } => {}
            }
            committed_seq = committed_seq.max(sequence);
        }

        if replayed > 0 {
            info!(replayed, committed_seq, "recovered keyspace from log");
        }

        Ok(Self {
            dir: Some(dir),
            wal,
            map: RwLock::new(map),
            committed_seq: AtomicU64::new(committed_seq),
            max_wal_size: config.max_wal_size,
            commit_lock: Mutex::new(()),
        })
    }

    /// Opens an ephemeral in-memory keyspace.
    pub fn in_memory(config: &Config) -> DbResult<Self> {
        Ok(Self {
            dir: None,
            wal: WalManager::in_memory(),
            map: RwLock::new(BTreeMap::new()),
            committed_seq: AtomicU64::new(0),
            max_wal_size: config.max_wal_size,
            commit_lock: Mutex::new(()),
        })
    }

    /// Point read.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.read().get(key).cloned()
    }

    /// Returns every (key, value) pair whose key starts with `prefix`,
    /// in lexicographic order.
    #[must_use]
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let map = self.map.read();
        Self::prefix_range(&map, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns every key starting with `prefix`, in lexicographic order.
    #[must_use]
    pub fn scan_prefix_keys(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let map = self.map.read();
        Self::prefix_range(&map, prefix).map(|(k, _)| k.clone()).collect()
    }

    /// Counts keys starting with `prefix`.
    #[must_use]
    pub fn count_prefix(&self, prefix: &[u8]) -> usize {
        let map = self.map.read();
        Self::prefix_range(&map, prefix).count()
    }

    /// Returns every key within the bounds, in lexicographic order.
    #[must_use]
    pub fn scan_range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Vec<Vec<u8>> {
        let map = self.map.read();
        map.range((start, end)).map(|(k, _)| k.clone()).collect()
    }

    fn prefix_range<'a>(
        map: &'a BTreeMap<Vec<u8>, Vec<u8>>,
        prefix: &[u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix_successor(prefix) {
            Some(succ) => Bound::Excluded(succ),
            None => Bound::Unbounded,
        };
        map.range((start, end))
    }

    /// Commits a batch atomically.
    ///
    /// The batch is framed into one log record and made durable before the
    /// in-memory view changes, so readers never observe a partial batch and
    /// a crash cannot tear one. Returns the commit sequence.
    pub fn commit(&self, batch: Batch) -> DbResult<u64> {
        let _guard = self.commit_lock.lock();
        let sequence = self.committed_seq.load(Ordering::SeqCst) + 1;

        self.wal.append(&WalRecord::Batch {
            sequence,
            puts: batch.puts.clone(),
            deletes: batch.deletes.clone(),
        })?;
        self.wal.flush()?;

        {
            let mut map = self.map.write();
            for key in &batch.deletes {
                map.remove(key);
            }
            for (key, value) in batch.puts {
                map.insert(key, value);
            }
        }

        self.committed_seq.store(sequence, Ordering::SeqCst);
        self.maybe_checkpoint_locked()?;
        Ok(sequence)
    }

    /// Atomically wipes the whole keyspace.
    ///
    /// Returns the commit sequence of the clear.
    pub fn clear(&self) -> DbResult<u64> {
        let _guard = self.commit_lock.lock();
        let sequence = self.committed_seq.load(Ordering::SeqCst) + 1;

        self.wal.append(&WalRecord::Clear { sequence })?;
        self.wal.flush()?;

        self.map.write().clear();
        self.committed_seq.store(sequence, Ordering::SeqCst);
        self.maybe_checkpoint_locked()?;
        Ok(sequence)
    }

    /// Writes a snapshot of the current state and truncates the log.
    ///
    /// In-memory keyspaces have no snapshot file; their log is simply
    /// cleared since the map is the only copy of the data anyway.
    pub fn checkpoint(&self) -> DbResult<()> {
        let _guard = self.commit_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> DbResult<()> {
        let sequence = self.committed_seq.load(Ordering::SeqCst);

        if let Some(ref dir) = self.dir {
            let bytes = {
                let map = self.map.read();
                snapshot::encode_snapshot(sequence, &map)?
            };
            dir.save_snapshot(&bytes)?;
        }

        self.wal.append(&WalRecord::Checkpoint { sequence })?;
        self.wal.flush()?;
        self.wal.clear()?;

        debug!(sequence, "checkpoint complete");
        Ok(())
    }

    fn maybe_checkpoint_locked(&self) -> DbResult<()> {
        if self.wal.size()? > self.max_wal_size {
            self.checkpoint_locked()?;
        }
        Ok(())
    }

    /// Flushes the log to durable storage.
    pub fn flush(&self) -> DbResult<()> {
        self.wal.flush()
    }

    /// Sequence of the last committed batch.
    #[must_use]
    pub fn committed_seq(&self) -> u64 {
        self.committed_seq.load(Ordering::SeqCst)
    }

    /// Total number of entries across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the keyspace holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("persistent", &self.dir.is_some())
            .field("entries", &self.len())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

/// Smallest byte string strictly greater than every string with `prefix`.
///
/// Returns `None` when no such bound exists (empty or all-0xFF prefixes).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    loop {
        match succ.pop() {
            Some(0xFF) => continue,
            Some(byte) => {
                succ.push(byte + 1);
                return Some(succ);
            }
            None => return None,
        }
    }
}
