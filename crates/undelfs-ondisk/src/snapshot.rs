//! The `USNP` metadata snapshot container.
//!
//! A snapshot is the serialized state of a metadata index: a fixed header
//! followed by every record in key order. The CLI reads a snapshot into a
//! memory store, runs recovery, and writes the updated snapshot back.
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic ("USNP")
//! 4       4     format version (le)
//! 8       8     record_count (le)
//! 16      4     checksum — CRC32C of the record region
//! 20      4     reserved (zero)
//! 24      ...   records
//! ```
//!
//! Each record is `disk key (17 bytes) || payload_len (u32 le) || payload`.

use crate::key::{parse_key, write_key, DISK_KEY_SIZE};
use undelfs_types::{ensure_slice, read_le_u32, read_le_u64, ParseError, TreeKey};

/// Magic bytes for the snapshot header — "USNP".
pub const SNAPSHOT_MAGIC: u32 = u32::from_le_bytes(*b"USNP");

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
pub const SNAPSHOT_HEADER_SIZE: usize = 24;

/// Serialize `records` into a snapshot buffer.
///
/// Records are written in the order given; callers hand them over in key
/// order so snapshots of the same index are byte-identical.
///
/// # Panics
///
/// Panics if a payload exceeds `u32::MAX` bytes; the record length field
/// cannot represent it.
#[must_use]
pub fn encode_snapshot(records: &[(TreeKey, Vec<u8>)]) -> Vec<u8> {
    let body_len: usize = records
        .iter()
        .map(|(_, payload)| DISK_KEY_SIZE + 4 + payload.len())
        .sum();
    let mut buf = vec![0_u8; SNAPSHOT_HEADER_SIZE + body_len];

    let mut pos = SNAPSHOT_HEADER_SIZE;
    for (key, payload) in records {
        write_key(&mut buf, pos, *key);
        pos += DISK_KEY_SIZE;
        let Ok(payload_len) = u32::try_from(payload.len()) else {
            panic!("record payload of {} bytes exceeds the u32 limit", payload.len());
        };
        buf[pos..pos + 4].copy_from_slice(&payload_len.to_le_bytes());
        pos += 4;
        buf[pos..pos + payload.len()].copy_from_slice(payload);
        pos += payload.len();
    }

    let crc = crc32c::crc32c(&buf[SNAPSHOT_HEADER_SIZE..]);
    buf[0..4].copy_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf[8..16].copy_from_slice(&(records.len() as u64).to_le_bytes());
    buf[16..20].copy_from_slice(&crc.to_le_bytes());
    // buf[20..24] remains zero (reserved)
    buf
}

/// Parse a snapshot buffer into its records.
///
/// Validates magic, version, record count, and the CRC32C of the record
/// region before decoding any record.
pub fn parse_snapshot(data: &[u8]) -> Result<Vec<(TreeKey, Vec<u8>)>, ParseError> {
    if data.len() < SNAPSHOT_HEADER_SIZE {
        return Err(ParseError::InsufficientData {
            needed: SNAPSHOT_HEADER_SIZE,
            offset: 0,
            actual: data.len(),
        });
    }

    let magic = read_le_u32(data, 0)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(SNAPSHOT_MAGIC),
            actual: u64::from(magic),
        });
    }
    let version = read_le_u32(data, 4)?;
    if version != SNAPSHOT_VERSION {
        return Err(ParseError::InvalidField {
            field: "version",
            reason: "unsupported snapshot format version",
        });
    }
    let record_count = read_le_u64(data, 8)?;
    let stored_crc = read_le_u32(data, 16)?;
    let computed_crc = crc32c::crc32c(&data[SNAPSHOT_HEADER_SIZE..]);
    if stored_crc != computed_crc {
        return Err(ParseError::ChecksumMismatch {
            stored: stored_crc,
            computed: computed_crc,
        });
    }

    let mut records = Vec::new();
    let mut pos = SNAPSHOT_HEADER_SIZE;
    for _ in 0..record_count {
        let key = parse_key(data, pos)?;
        pos += DISK_KEY_SIZE;
        let payload_len = read_le_u32(data, pos)? as usize;
        pos += 4;
        let payload = ensure_slice(data, pos, payload_len)?.to_vec();
        pos += payload_len;
        records.push((key, payload));
    }

    if pos != data.len() {
        return Err(ParseError::InvalidField {
            field: "record_count",
            reason: "trailing bytes after last record",
        });
    }

    Ok(records)
}
