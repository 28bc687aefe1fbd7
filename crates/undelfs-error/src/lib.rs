#![forbid(unsafe_code)]
//! Primary error type for UNDELFS operations.

use thiserror::Error;
use undelfs_types::{ParseError, SubvolId, TreeKey};

/// Convenience alias used across the workspace.
pub type Result<T, E = UndelfsError> = std::result::Result<T, E>;

/// Errors surfaced by the storage contract and the recovery engine.
#[derive(Error, Debug)]
pub enum UndelfsError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-layout record failed to decode.
    #[error("record decode failed: {0}")]
    Parse(#[from] ParseError),

    /// The snapshot container is structurally damaged.
    #[error("snapshot corrupt: {detail}")]
    SnapshotCorrupt { detail: String },

    /// The storage engine could not service a lookup or write.
    #[error("storage error: {detail}")]
    Storage { detail: String },

    /// Exact-key root descriptor lookup found nothing.
    #[error("root descriptor for subvol {0} is missing")]
    RootMissing(SubvolId),

    /// Orphan marker deletion found nothing to delete.
    #[error("orphan marker for subvol {0} is missing")]
    OrphanMissing(SubvolId),

    /// Namespace link creation hit an existing entry with the same name.
    #[error("link {name:?} already exists in directory {dir}")]
    LinkExists { dir: u64, name: String },

    /// Two distinct names hashed to the same directory-entry key.
    #[error("directory entry name collision at {key}: {existing:?} vs {requested:?}")]
    DirNameCollision {
        key: TreeKey,
        existing: String,
        requested: String,
    },

    /// A transaction tried to stage more mutations than it reserved.
    #[error("transaction reservation exhausted: {reserved} units reserved")]
    ReservationExhausted { reserved: u32 },
}

impl UndelfsError {
    /// Shorthand for a storage-level failure with a formatted detail.
    #[must_use]
    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
        }
    }
}
