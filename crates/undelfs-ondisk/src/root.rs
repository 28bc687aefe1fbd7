//! Root descriptor layout.

use crate::key::{parse_key, write_key, DISK_KEY_SIZE};
use serde::{Deserialize, Serialize};
use undelfs_types::{
    ensure_slice, read_le_u64, ParseError, TreeKey, ROOT_SUBVOL_DEAD,
};

/// Per-subvolume tree root metadata.
///
/// ```text
/// Offset  Size  Field
/// 0       8     generation (le)
/// 8       8     root_dirid (le)
/// 16      8     flags (le)
/// 24      17    drop_progress (disk key)
/// 41      1     drop_level
/// 42      1     level
/// 43      5     reserved (zero)
/// ```
///
/// `drop_progress` records how far a destructive deletion traversal has
/// advanced through the subvolume's data tree. An all-zero leading
/// objectid means the traversal never started; that is the sole intactness
/// signal the recovery engine uses. The engine mutates only `flags`
/// (clearing [`ROOT_SUBVOL_DEAD`]) and never touches the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootItem {
    pub generation: u64,
    pub root_dirid: u64,
    pub flags: u64,
    pub drop_progress: TreeKey,
    pub drop_level: u8,
    pub level: u8,
}

impl RootItem {
    /// Serialized size of the descriptor in bytes.
    pub const SIZE: usize = 48;

    /// A fresh descriptor for an untouched subvolume tree.
    #[must_use]
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            root_dirid: undelfs_types::FIRST_FREE_OBJECTID,
            flags: 0,
            drop_progress: TreeKey::zero(),
            drop_level: 0,
            level: 0,
        }
    }

    /// Serialize to a 48-byte buffer.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0_u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.generation.to_le_bytes());
        buf[8..16].copy_from_slice(&self.root_dirid.to_le_bytes());
        buf[16..24].copy_from_slice(&self.flags.to_le_bytes());
        write_key(&mut buf, 24, self.drop_progress);
        buf[24 + DISK_KEY_SIZE] = self.drop_level;
        buf[25 + DISK_KEY_SIZE] = self.level;
        // buf[43..48] remains zero (reserved)
        buf
    }

    /// Parse a descriptor from a 48-byte slice.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < Self::SIZE {
            return Err(ParseError::InsufficientData {
                needed: Self::SIZE,
                offset: 0,
                actual: data.len(),
            });
        }
        let tail = ensure_slice(data, 24 + DISK_KEY_SIZE, 2)?;
        Ok(Self {
            generation: read_le_u64(data, 0)?,
            root_dirid: read_le_u64(data, 8)?,
            flags: read_le_u64(data, 16)?,
            drop_progress: parse_key(data, 24)?,
            drop_level: tail[0],
            level: tail[1],
        })
    }

    /// Whether the subvolume is marked dead (deletion pending).
    #[must_use]
    pub fn is_dead(&self) -> bool {
        (self.flags & ROOT_SUBVOL_DEAD) != 0
    }

    /// Mark the subvolume dead.
    pub fn set_dead(&mut self) {
        self.flags |= ROOT_SUBVOL_DEAD;
    }

    /// Clear the dead flag; the descriptor is otherwise untouched.
    pub fn clear_dead(&mut self) {
        self.flags &= !ROOT_SUBVOL_DEAD;
    }

    /// Whether the deletion traversal never advanced past initialization.
    #[must_use]
    pub fn drop_never_started(&self) -> bool {
        self.drop_progress.objectid == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_item_round_trip() {
        let mut item = RootItem::new(17);
        item.set_dead();
        item.drop_progress = TreeKey::new(12, 1, 9000);
        item.drop_level = 2;
        item.level = 3;

        let bytes = item.to_bytes();
        let parsed = RootItem::parse(&bytes).expect("parse");
        assert_eq!(parsed, item);
        assert!(parsed.is_dead());
        assert!(!parsed.drop_never_started());
    }

    #[test]
    fn clear_dead_preserves_other_flags() {
        let mut item = RootItem::new(1);
        item.flags = ROOT_SUBVOL_DEAD | 0x3;
        item.clear_dead();
        assert_eq!(item.flags, 0x3);
        assert!(!item.is_dead());
    }

    #[test]
    fn fresh_descriptor_is_intact() {
        let item = RootItem::new(5);
        assert!(item.drop_never_started());
        assert!(!item.is_dead());
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let err = RootItem::parse(&[0_u8; 20]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InsufficientData {
                needed: RootItem::SIZE,
                ..
            }
        ));
    }
}
