//! Disk key codec.
//!
//! ```text
//! Offset  Size  Field
//! 0       8     objectid (le)
//! 8       1     item kind
//! 9       8     offset (le)
//! ```

use undelfs_types::{read_le_u64, ParseError, TreeKey};

/// Serialized size of a disk key in bytes.
pub const DISK_KEY_SIZE: usize = 17;

/// Decode a disk key at `offset` within `data`.
pub fn parse_key(data: &[u8], offset: usize) -> Result<TreeKey, ParseError> {
    let objectid = read_le_u64(data, offset)?;
    let kind = *undelfs_types::ensure_slice(data, offset + 8, 1)?
        .first()
        .ok_or(ParseError::InvalidField {
            field: "kind",
            reason: "empty slice",
        })?;
    let key_offset = read_le_u64(data, offset + 9)?;
    Ok(TreeKey::new(objectid, kind, key_offset))
}

/// Encode `key` at `offset` within `buf`.
///
/// # Panics
///
/// Panics if `buf` is shorter than `offset + DISK_KEY_SIZE`; callers size
/// their buffers from the layout constants.
pub fn write_key(buf: &mut [u8], offset: usize, key: TreeKey) {
    buf[offset..offset + 8].copy_from_slice(&key.objectid.to_le_bytes());
    buf[offset + 8] = key.kind;
    buf[offset + 9..offset + 17].copy_from_slice(&key.offset.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trip() {
        let key = TreeKey::new(0xDEAD_BEEF, 132, 42);
        let mut buf = [0_u8; DISK_KEY_SIZE + 3];
        write_key(&mut buf, 3, key);
        assert_eq!(parse_key(&buf, 3).unwrap(), key);
    }

    #[test]
    fn key_parse_rejects_short_buffer() {
        let buf = [0_u8; DISK_KEY_SIZE - 1];
        assert!(parse_key(&buf, 0).is_err());
    }
}
