//! Write-ahead log: record framing and the backing log medium.
//!
//! Every committed batch becomes one framed record:
//!
//! ```text
//! magic (4) | version (2) | type (1) | length (4) | payload | crc32 (4)
//! ```
//!
//! The CRC covers everything before it, so a torn write at the tail of the
//! log is detected and discarded during recovery rather than replayed.
//!
//! The log medium underneath is deliberately dumb: an append-only byte
//! file, or an in-memory buffer for ephemeral databases. All format
//! knowledge stays in this module, next to the records it frames.

use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic bytes identifying a log record.
pub const WAL_MAGIC: [u8; 4] = *b"SWAL";

/// Current log format version.
pub const WAL_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + type (1) + length (4).
const HEADER_SIZE: usize = 11;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// An atomic multi-key batch.
    Batch = 1,
    /// A fenced wipe of the whole keyspace.
    Clear = 2,
    /// Checkpoint marker written just before log truncation.
    Checkpoint = 3,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Batch),
            2 => Some(Self::Clear),
            3 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A log record representing one committed keyspace mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// An atomic batch of puts and deletes.
    Batch {
        /// Commit sequence number.
        sequence: u64,
        /// Key/value pairs to insert or overwrite.
        puts: Vec<(Vec<u8>, Vec<u8>)>,
        /// Keys to remove.
        deletes: Vec<Vec<u8>>,
    },
    /// A fenced wipe of the whole keyspace.
    Clear {
        /// Commit sequence number.
        sequence: u64,
    },
    /// Checkpoint marker.
    Checkpoint {
        /// Sequence number at checkpoint.
        sequence: u64,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Batch { .. } => WalRecordType::Batch,
            Self::Clear { .. } => WalRecordType::Clear,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the commit sequence the record carries.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Batch { sequence, .. }
            | Self::Clear { sequence }
            | Self::Checkpoint { sequence } => *sequence,
        }
    }

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::new();

        let push_bytes = |buf: &mut Vec<u8>, bytes: &[u8]| -> DbResult<()> {
            let len = u32::try_from(bytes.len())
                .map_err(|_| DbError::log_corruption("entry too large for log record"))?;
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(bytes);
            Ok(())
        };

        match self {
            Self::Batch {
                sequence,
                puts,
                deletes,
            } => {
                buf.extend_from_slice(&sequence.to_le_bytes());

                let put_count = u32::try_from(puts.len())
                    .map_err(|_| DbError::log_corruption("too many puts in batch"))?;
                buf.extend_from_slice(&put_count.to_le_bytes());
                for (key, value) in puts {
                    push_bytes(&mut buf, key)?;
                    push_bytes(&mut buf, value)?;
                }

                let del_count = u32::try_from(deletes.len())
                    .map_err(|_| DbError::log_corruption("too many deletes in batch"))?;
                buf.extend_from_slice(&del_count.to_le_bytes());
                for key in deletes {
                    push_bytes(&mut buf, key)?;
                }
            }

            Self::Clear { sequence } | Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> DbResult<Self> {
        let mut cursor = 0;

        let read_u64 = |cursor: &mut usize| -> DbResult<u64> {
            if *cursor + 8 > payload.len() {
                return Err(DbError::log_corruption("unexpected end of payload"));
            }
            let bytes: [u8; 8] = payload[*cursor..*cursor + 8]
                .try_into()
                .map_err(|_| DbError::log_corruption("invalid u64"))?;
            *cursor += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let read_u32 = |cursor: &mut usize| -> DbResult<u32> {
            if *cursor + 4 > payload.len() {
                return Err(DbError::log_corruption("unexpected end of payload"));
            }
            let bytes: [u8; 4] = payload[*cursor..*cursor + 4]
                .try_into()
                .map_err(|_| DbError::log_corruption("invalid u32"))?;
            *cursor += 4;
            Ok(u32::from_le_bytes(bytes))
        };

        let read_bytes = |cursor: &mut usize| -> DbResult<Vec<u8>> {
            let len = read_u32(cursor)? as usize;
            if *cursor + len > payload.len() {
                return Err(DbError::log_corruption("unexpected end of entry bytes"));
            }
            let bytes = payload[*cursor..*cursor + len].to_vec();
            *cursor += len;
            Ok(bytes)
        };

        let record = match record_type {
            WalRecordType::Batch => {
                let sequence = read_u64(&mut cursor)?;

                let put_count = read_u32(&mut cursor)? as usize;
                let mut puts = Vec::with_capacity(put_count);
                for _ in 0..put_count {
                    let key = read_bytes(&mut cursor)?;
                    let value = read_bytes(&mut cursor)?;
                    puts.push((key, value));
                }

                let del_count = read_u32(&mut cursor)? as usize;
                let mut deletes = Vec::with_capacity(del_count);
                for _ in 0..del_count {
                    deletes.push(read_bytes(&mut cursor)?);
                }

                Self::Batch {
                    sequence,
                    puts,
                    deletes,
                }
            }

            WalRecordType::Clear => Self::Clear {
                sequence: read_u64(&mut cursor)?,
            },

            WalRecordType::Checkpoint => Self::Checkpoint {
                sequence: read_u64(&mut cursor)?,
            },
        };

        if cursor != payload.len() {
            return Err(DbError::log_corruption(format!(
                "trailing bytes in {:?} record: expected {} bytes, got {}",
                record_type,
                cursor,
                payload.len()
            )));
        }

        Ok(record)
    }
}

/// Computes CRC32 checksum for data (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// The bytes a log lives on: a file for persistent databases, a buffer
/// for in-memory ones.
///
/// The medium knows nothing about records; it only appends, reads back,
/// and truncates. Frame interpretation stays in [`WalManager`].
enum LogMedium {
    /// Append-only file opened for read and write.
    File {
        /// Open handle.
        file: File,
        /// Current size, tracked so appends and bounds checks avoid
        /// repeated metadata calls.
        size: u64,
    },
    /// In-memory buffer for ephemeral databases and tests.
    Memory(Vec<u8>),
}

impl LogMedium {
    /// Opens or creates the log file at `path`.
    fn open_file(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::File { file, size })
    }

    fn size(&self) -> u64 {
        match self {
            Self::File { size, .. } => *size,
            Self::Memory(buf) => buf.len() as u64,
        }
    }

    /// Appends bytes, returning the offset they were written at.
    fn append(&mut self, data: &[u8]) -> DbResult<u64> {
        match self {
            Self::File { file, size } => {
                let offset = *size;
                file.seek(SeekFrom::End(0))?;
                file.write_all(data)?;
                *size += data.len() as u64;
                Ok(offset)
            }
            Self::Memory(buf) => {
                let offset = buf.len() as u64;
                buf.extend_from_slice(data);
                Ok(offset)
            }
        }
    }

    /// Reads `len` bytes at `offset`.
    ///
    /// A read past the current end is reported as log corruption; during
    /// recovery that is exactly a torn frame.
    fn read_at(&mut self, offset: u64, len: usize) -> DbResult<Vec<u8>> {
        if offset.saturating_add(len as u64) > self.size() {
            return Err(DbError::log_corruption("read past end of log"));
        }
        match self {
            Self::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            Self::Memory(buf) => Ok(buf[offset as usize..offset as usize + len].to_vec()),
        }
    }

    /// Discards everything after `new_size`.
    fn truncate(&mut self, new_size: u64) -> DbResult<()> {
        if new_size > self.size() {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate log to {} bytes, current size is {}",
                    new_size,
                    self.size()
                ),
            )));
        }
        match self {
            Self::File { file, size } => {
                file.set_len(new_size)?;
                file.sync_all()?;
                *size = new_size;
            }
            Self::Memory(buf) => buf.truncate(new_size as usize),
        }
        Ok(())
    }

    /// Pushes buffered writes to the OS.
    fn flush(&mut self) -> DbResult<()> {
        if let Self::File { file, .. } = self {
            file.flush()?;
        }
        Ok(())
    }

    /// Forces data and metadata onto durable storage.
    fn sync(&mut self) -> DbResult<()> {
        if let Self::File { file, .. } = self {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Manages log writes and recovery reads.
///
/// The `WalManager` frames records onto the log medium and reads back the
/// valid record prefix for recovery.
pub struct WalManager {
    /// The bytes underneath.
    medium: Mutex<LogMedium>,
    /// Whether to sync after each write.
    sync_on_write: bool,
}

impl WalManager {
    /// Opens or creates a file-backed log.
    pub fn open(path: &Path, sync_on_write: bool) -> DbResult<Self> {
        Ok(Self {
            medium: Mutex::new(LogMedium::open_file(path)?),
            sync_on_write,
        })
    }

    /// Creates an in-memory log for ephemeral databases.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            medium: Mutex::new(LogMedium::Memory(Vec::new())),
            sync_on_write: false,
        }
    }

    /// Appends a record to the log.
    ///
    /// Returns the offset where the record was written. When sync-on-write
    /// is enabled the record is durable before this returns.
    pub fn append(&self, record: &WalRecord) -> DbResult<u64> {
        let payload = record.encode_payload()?;
        let record_type = record.record_type();

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(record_type.as_byte());

        let len = u32::try_from(payload.len())
            .map_err(|_| DbError::log_corruption("log record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let mut medium = self.medium.lock();
        let offset = medium.append(&data)?;

        if self.sync_on_write {
            medium.sync()?;
        }

        Ok(offset)
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> DbResult<()> {
        self.medium.lock().flush()
    }

    /// Returns the current log size.
    pub fn size(&self) -> DbResult<u64> {
        Ok(self.medium.lock().size())
    }

    /// Clears all data from the log.
    ///
    /// Used after checkpoint when all committed batches are persisted in
    /// the snapshot.
    pub fn clear(&self) -> DbResult<()> {
        self.medium.lock().truncate(0)
    }

    /// Truncates the log to the given offset.
    pub fn truncate(&self, offset: u64) -> DbResult<()> {
        self.medium.lock().truncate(offset)
    }

    /// Reads the valid prefix of the log.
    ///
    /// Returns the decoded records along with the offset where the valid
    /// prefix ends. A torn or corrupt tail (incomplete frame, bad magic,
    /// CRC mismatch) terminates the read; the caller truncates the log to
    /// the returned offset so the damage cannot resurface.
    pub fn read_valid_prefix(&self) -> DbResult<(Vec<WalRecord>, u64)> {
        let mut medium = self.medium.lock();
        let size = medium.size();

        let mut records = Vec::new();
        let mut offset = 0u64;

        loop {
            match Self::read_record_at(&mut medium, offset, size) {
                Ok(Some((record, next_offset))) => {
                    records.push(record);
                    offset = next_offset;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        offset,
                        error = %e,
                        "discarding log tail after invalid record"
                    );
                    break;
                }
            }
        }

        Ok((records, offset))
    }

    /// Reads a single framed record at `offset`.
    ///
    /// Returns `Ok(None)` at a clean end of log, `Err` on a torn or corrupt
    /// frame.
    fn read_record_at(
        medium: &mut LogMedium,
        offset: u64,
        size: u64,
    ) -> DbResult<Option<(WalRecord, u64)>> {
        if offset == size {
            return Ok(None);
        }
        if offset + HEADER_SIZE as u64 > size {
            return Err(DbError::log_corruption("truncated record header"));
        }

        let header = medium.read_at(offset, HEADER_SIZE)?;

        if header[0..4] != WAL_MAGIC {
            return Err(DbError::log_corruption("bad record magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != WAL_VERSION {
            return Err(DbError::log_corruption(format!(
                "unsupported log version: {version}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6])
            .ok_or_else(|| DbError::log_corruption("unknown record type"))?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as u64;

        let total = HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;
        if offset + total > size {
            return Err(DbError::log_corruption("truncated record body"));
        }

        let body = medium.read_at(offset, total as usize)?;

        let crc_start = body.len() - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            body[crc_start],
            body[crc_start + 1],
            body[crc_start + 2],
            body[crc_start + 3],
        ]);
        let computed = compute_crc32(&body[..crc_start]);
        if stored_crc != computed {
            return Err(DbError::log_corruption("record checksum mismatch"));
        }

        let payload = &body[HEADER_SIZE..crc_start];
        let record = WalRecord::decode_payload(record_type, payload)?;

        Ok(Some((record, offset + total)))
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
