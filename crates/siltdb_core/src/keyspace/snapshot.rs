//! Snapshot encoding for checkpointed keyspace state.
//!
//! A snapshot captures every key/value pair at a commit sequence. The file
//! is written atomically (write-tmp-then-rename) by [`crate::dir`], so a
//! crash during checkpoint leaves either the old snapshot or the new one,
//! never a blend.
//!
//! Layout: magic (4) | version (2) | sequence (8) | count (8) |
//! entries (klen, key, vlen, value)* | crc32 (4). The CRC covers all
//! preceding bytes.

use crate::error::{DbError, DbResult};
use crate::keyspace::wal::compute_crc32;
use std::collections::BTreeMap;

/// Magic bytes identifying a snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"SSNP";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Encodes the keyspace contents at `sequence` into snapshot bytes.
pub fn encode_snapshot(sequence: u64, map: &BTreeMap<Vec<u8>, Vec<u8>>) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&(map.len() as u64).to_le_bytes());

    for (key, value) in map {
        let klen = u32::try_from(key.len())
            .map_err(|_| DbError::snapshot_corruption("key too large for snapshot"))?;
        let vlen = u32::try_from(value.len())
            .map_err(|_| DbError::snapshot_corruption("value too large for snapshot"))?;
        buf.extend_from_slice(&klen.to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&vlen.to_le_bytes());
        buf.extend_from_slice(value);
    }

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decodes snapshot bytes into (sequence, keyspace contents).
pub fn decode_snapshot(data: &[u8]) -> DbResult<(u64, BTreeMap<Vec<u8>, Vec<u8>>)> {
    if data.len() < 4 + 2 + 8 + 8 + 4 {
        return Err(DbError::snapshot_corruption("snapshot too short"));
    }

    let crc_start = data.len() - 4;
    let stored_crc = u32::from_le_bytes([
        data[crc_start],
        data[crc_start + 1],
        data[crc_start + 2],
        data[crc_start + 3],
    ]);
    if compute_crc32(&data[..crc_start]) != stored_crc {
        return Err(DbError::snapshot_corruption("snapshot checksum mismatch"));
    }

    let body = &data[..crc_start];
    if body[0..4] != SNAPSHOT_MAGIC {
        return Err(DbError::snapshot_corruption("bad snapshot magic"));
    }
    let version = u16::from_le_bytes([body[4], body[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(DbError::snapshot_corruption(format!(
            "unsupported snapshot version: {version}"
        )));
    }

    let mut cursor = 6;
    let read_u64 = |cursor: &mut usize| -> DbResult<u64> {
        if *cursor + 8 > body.len() {
            return Err(DbError::snapshot_corruption("unexpected end of snapshot"));
        }
        let bytes: [u8; 8] = body[*cursor..*cursor + 8]
            .try_into()
            .map_err(|_| DbError::snapshot_corruption("invalid u64"))?;
        *cursor += 8;
        Ok(u64::from_le_bytes(bytes))
    };
    let read_bytes = |cursor: &mut usize| -> DbResult<Vec<u8>> {
        if *cursor + 4 > body.len() {
            return Err(DbError::snapshot_corruption("unexpected end of snapshot"));
        }
        let len_bytes: [u8; 4] = body[*cursor..*cursor + 4]
            .try_into()
            .map_err(|_| DbError::snapshot_corruption("invalid u32"))?;
        *cursor += 4;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if *cursor + len > body.len() {
            return Err(DbError::snapshot_corruption("unexpected end of entry"));
        }
        let bytes = body[*cursor..*cursor + len].to_vec();
        *cursor += len;
        Ok(bytes)
    };

    let sequence = read_u64(&mut cursor)?;
    let count = read_u64(&mut cursor)?;

    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = read_bytes(&mut cursor)?;
        let value = read_bytes(&mut cursor)?;
        map.insert(key, value);
    }

    if cursor != body.len() {
        return Err(DbError::snapshot_corruption("trailing bytes in snapshot"));
    }

    Ok((sequence, map))
}
