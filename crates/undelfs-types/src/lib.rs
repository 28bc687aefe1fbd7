#![forbid(unsafe_code)]
//! Shared types for the UNDELFS toolkit.
//!
//! Defines the metadata-index key triple ([`TreeKey`]), the id newtypes,
//! the well-known object ids and item kinds the recovery engine cares
//! about, root status flags, and the little-endian field readers used by
//! the ondisk codecs.

use serde::{Deserialize, Serialize};

// ── Well-known object ids ───────────────────────────────────────────────────

/// Objectid of the filesystem tree.
pub const FS_TREE_OBJECTID: u64 = 5;

/// First objectid available for regular inodes; also the inode number of
/// the filesystem root directory.
pub const FIRST_FREE_OBJECTID: u64 = 256;

/// Sentinel objectid that namespaces orphan markers.
///
/// The two's-complement encoding of -5, matching the on-disk convention
/// of the filesystems this toolkit targets.
pub const ORPHAN_OBJECTID: u64 = u64::MAX - 4;

// ── Item kinds ──────────────────────────────────────────────────────────────

/// Inode descriptor record.
pub const INODE_ITEM_KEY: u8 = 1;

/// Orphan marker record. Key offset carries the subvolume id; no payload.
pub const ORPHAN_ITEM_KEY: u8 = 48;

/// Directory entry record. Key offset carries the CRC32C of the entry name.
pub const DIR_ITEM_KEY: u8 = 84;

/// Root descriptor record.
pub const ROOT_ITEM_KEY: u8 = 132;

/// Root back-reference record (child → parent).
pub const ROOT_BACKREF_KEY: u8 = 144;

/// Root reference record (parent → child).
pub const ROOT_REF_KEY: u8 = 156;

// ── Root flags ──────────────────────────────────────────────────────────────

/// Flag bit on a root descriptor marking the subvolume dead (deletion in
/// progress or pending).
pub const ROOT_SUBVOL_DEAD: u64 = 1_u64 << 48;

// ── Namespace conventions ───────────────────────────────────────────────────

/// Well-known recovery directory name under the filesystem root.
pub const RECOVERY_DIR_NAME: &str = "lost+found";

/// Prefix for namespace links created for recovered subvolumes; the full
/// name is the prefix followed by the decimal subvolume id.
pub const RECOVERY_LINK_PREFIX: &str = "sub";

// ── Id newtypes ─────────────────────────────────────────────────────────────

/// Subvolume (tree root) id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubvolId(pub u64);

impl std::fmt::Display for SubvolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SubvolId {
    /// Deterministic namespace-link name for this subvolume.
    #[must_use]
    pub fn recovery_link_name(self) -> String {
        format!("{RECOVERY_LINK_PREFIX}{}", self.0)
    }
}

/// Inode number within the filesystem tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InodeNumber(pub u64);

impl std::fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── TreeKey ─────────────────────────────────────────────────────────────────

/// Key triple addressing one record in the metadata index.
///
/// Records sort by `(objectid, kind, offset)`; the derived `Ord` relies on
/// the field declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TreeKey {
    pub objectid: u64,
    pub kind: u8,
    pub offset: u64,
}

impl TreeKey {
    #[must_use]
    pub const fn new(objectid: u64, kind: u8, offset: u64) -> Self {
        Self {
            objectid,
            kind,
            offset,
        }
    }

    /// Key of the orphan marker for `subvol`.
    #[must_use]
    pub const fn orphan(subvol: SubvolId) -> Self {
        Self::new(ORPHAN_OBJECTID, ORPHAN_ITEM_KEY, subvol.0)
    }

    /// Exact key of the root descriptor for `subvol`.
    #[must_use]
    pub const fn root(subvol: SubvolId) -> Self {
        Self::new(subvol.0, ROOT_ITEM_KEY, 0)
    }

    /// All-zero key; a root descriptor whose drop progress equals this key
    /// has never been touched by a destructive traversal.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }
}

impl std::fmt::Display for TreeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.objectid, self.kind, self.offset)
    }
}

// ── Field readers ───────────────────────────────────────────────────────────

/// Errors from decoding fixed-layout structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough data to decode the structure.
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    /// Magic number does not match the expected value.
    InvalidMagic { expected: u64, actual: u64 },
    /// A field holds a value the decoder rejects.
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    /// Stored checksum does not match the computed one.
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData {
                needed,
                offset,
                actual,
            } => write!(
                f,
                "insufficient data: need {needed} bytes at offset {offset}, got {actual}"
            ),
            Self::InvalidMagic { expected, actual } => {
                write!(f, "bad magic: expected {expected:#x}, got {actual:#x}")
            }
            Self::InvalidField { field, reason } => {
                write!(f, "invalid field {field}: {reason}")
            }
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Borrow `len` bytes at `offset`, or report how much data was available.
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset
        .checked_add(len)
        .ok_or(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        })?;
    if data.len() < end {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }
    Ok(&data[offset..end])
}

pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Read a fixed-size byte array at `offset`.
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_key_orders_by_objectid_then_kind_then_offset() {
        let a = TreeKey::new(1, 0, 100);
        let b = TreeKey::new(1, 1, 0);
        let c = TreeKey::new(2, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(TreeKey::new(1, 1, 5) < TreeKey::new(1, 1, 6));
    }

    #[test]
    fn orphan_key_layout() {
        let key = TreeKey::orphan(SubvolId(300));
        assert_eq!(key.objectid, ORPHAN_OBJECTID);
        assert_eq!(key.kind, ORPHAN_ITEM_KEY);
        assert_eq!(key.offset, 300);
    }

    #[test]
    fn recovery_link_name_is_prefix_plus_decimal_id() {
        assert_eq!(SubvolId(300).recovery_link_name(), "sub300");
        assert_eq!(SubvolId(7).recovery_link_name(), "sub7");
    }

    #[test]
    fn orphan_objectid_is_minus_five() {
        // -5 in two's complement.
        assert_eq!(ORPHAN_OBJECTID, (-5_i64) as u64);
    }

    #[test]
    fn readers_reject_short_input() {
        let data = [1_u8, 2, 3];
        assert!(matches!(
            read_le_u32(&data, 0),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 0,
                actual: 3
            })
        ));
        assert_eq!(read_le_u16(&data, 1).unwrap(), u16::from_le_bytes([2, 3]));
    }

    #[test]
    fn read_fixed_round_trip() {
        let data = [9_u8, 8, 7, 6, 5];
        let got: [u8; 3] = read_fixed(&data, 1).unwrap();
        assert_eq!(got, [8, 7, 6]);
        assert!(read_fixed::<8>(&data, 0).is_err());
    }
}
