//! Directory entry and root reference payloads.

use serde::{Deserialize, Serialize};
use undelfs_types::{ensure_slice, read_le_u16, read_le_u64, ParseError};

/// What a directory entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A directory inode within the same tree.
    Directory,
    /// A subvolume tree root.
    SubvolRoot,
}

impl EntryKind {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Directory => 1,
            Self::SubvolRoot => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, ParseError> {
        match byte {
            1 => Ok(Self::Directory),
            2 => Ok(Self::SubvolRoot),
            _ => Err(ParseError::InvalidField {
                field: "entry_kind",
                reason: "unknown directory entry kind",
            }),
        }
    }
}

/// Payload of a directory entry record.
///
/// ```text
/// Offset  Size  Field
/// 0       8     target (le) — child inode number or subvolume id
/// 8       1     entry kind
/// 9       2     name_len (le)
/// 11      n     name bytes (UTF-8)
/// ```
///
/// The record key's offset is the CRC32C of the name; the payload carries
/// the full name so hash collisions are detectable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub target: u64,
    pub kind: EntryKind,
    pub name: String,
}

impl DirEntry {
    /// Key offset for an entry with this name (CRC32C, the on-disk
    /// directory hash convention).
    #[must_use]
    pub fn name_hash(name: &str) -> u64 {
        u64::from(crc32c::crc32c(name.as_bytes()))
    }

    /// Serialize the payload.
    ///
    /// # Panics
    ///
    /// Panics if the name exceeds `u16::MAX` bytes; the length field
    /// cannot represent it and truncating would corrupt the record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let Ok(name_len) = u16::try_from(name.len()) else {
            panic!("directory entry name of {} bytes exceeds the u16 limit", name.len());
        };
        let mut buf = Vec::with_capacity(11 + name.len());
        buf.extend_from_slice(&self.target.to_le_bytes());
        buf.push(self.kind.to_byte());
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name);
        buf
    }

    /// Parse a payload.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let target = read_le_u64(data, 0)?;
        let kind = EntryKind::from_byte(ensure_slice(data, 8, 1)?[0])?;
        let name_len = usize::from(read_le_u16(data, 9)?);
        let name_bytes = ensure_slice(data, 11, name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| ParseError::InvalidField {
                field: "name",
                reason: "not valid UTF-8",
            })?
            .to_owned();
        Ok(Self { target, kind, name })
    }
}

/// Payload of a root reference / back-reference record.
///
/// ```text
/// Offset  Size  Field
/// 0       8     dirid (le) — directory holding the namespace link
/// 8       2     name_len (le)
/// 10      n     name bytes (UTF-8)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRef {
    pub dirid: u64,
    pub name: String,
}

impl RootRef {
    /// Serialize the payload.
    ///
    /// # Panics
    ///
    /// Panics if the name exceeds `u16::MAX` bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let Ok(name_len) = u16::try_from(name.len()) else {
            panic!("root ref name of {} bytes exceeds the u16 limit", name.len());
        };
        let mut buf = Vec::with_capacity(10 + name.len());
        buf.extend_from_slice(&self.dirid.to_le_bytes());
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name);
        buf
    }

    /// Parse a payload.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let dirid = read_le_u64(data, 0)?;
        let name_len = usize::from(read_le_u16(data, 8)?);
        let name_bytes = ensure_slice(data, 10, name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| ParseError::InvalidField {
                field: "name",
                reason: "not valid UTF-8",
            })?
            .to_owned();
        Ok(Self { dirid, name })
    }
}
