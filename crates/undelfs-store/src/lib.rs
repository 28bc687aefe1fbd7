#![forbid(unsafe_code)]
//! Storage contract and reference store for the UNDELFS recovery engine.
//!
//! The recovery engine consumes two traits:
//!
//! - [`MetaStore`]: positioned lookups over the key-ordered metadata index
//!   and the transaction entry point.
//! - [`StoreTxn`]: the mutation surface of one open transaction. Every
//!   mutation is staged and invisible to readers until [`StoreTxn::commit`]
//!   applies the whole set atomically; dropping an uncommitted transaction
//!   leaves no trace.
//!
//! [`MemoryMetaStore`] is the reference implementation: a single
//! `BTreeMap` keyed by [`TreeKey`], persisted through the `USNP` snapshot
//! container. It is what the CLI and the test suites run against.

mod memory;

pub use memory::MemoryMetaStore;

use undelfs_error::Result;
use undelfs_ondisk::RootItem;
use undelfs_types::{InodeNumber, SubvolId, TreeKey};

/// Read-side contract of the metadata index plus the transaction entry
/// point.
///
/// The index has no persistent cursor abstraction; traversal is driven by
/// re-issuing bounded [`MetaStore::prev_in_range`] lookups.
pub trait MetaStore {
    /// Nearest record with the given objectid and kind whose offset is
    /// `<= upto`, or `None` when the range is exhausted.
    fn prev_in_range(&self, objectid: u64, kind: u8, upto: u64) -> Result<Option<TreeKey>>;

    /// Resolve the subvolume's root descriptor at the latest generation
    /// (open-ended offset match). `Ok(None)` means no root resolves — the
    /// subvolume is gone, which is distinct from a storage failure.
    fn resolve_root(&self, subvol: SubvolId) -> Result<Option<RootItem>>;

    /// Open a transaction with a pre-reserved mutation budget.
    ///
    /// At most one transaction is outstanding at a time; the mutable
    /// borrow enforces that statically. Each staged mutation consumes one
    /// reservation unit and exceeding the budget fails the transaction.
    fn begin(&mut self, reservation_units: u32) -> Result<Box<dyn StoreTxn + '_>>;
}

/// Mutation surface of one open transaction.
///
/// Reads issued through the transaction observe its own staged mutations
/// on top of committed state.
pub trait StoreTxn {
    /// Create-if-absent a subdirectory of `parent`; returns the inode of
    /// the existing directory when it is already present.
    fn ensure_dir(&mut self, parent: InodeNumber, name: &str) -> Result<InodeNumber>;

    /// Create a namespace link `name` under `dir` pointing at the
    /// subvolume root, together with the root ref/backref record pair.
    /// An existing entry with the same name is a failure.
    fn create_link(&mut self, dir: InodeNumber, name: &str, target: SubvolId) -> Result<()>;

    /// Exact-key load of the subvolume's root descriptor (no "nearest").
    fn lookup_root_exact(&self, subvol: SubvolId) -> Result<RootItem>;

    /// Replace the root descriptor payload in place and mark it dirty for
    /// write-out at commit.
    fn write_root(&mut self, subvol: SubvolId, item: &RootItem) -> Result<()>;

    /// Delete the subvolume's orphan marker.
    fn delete_orphan(&mut self, subvol: SubvolId) -> Result<()>;

    /// Apply every staged mutation atomically.
    fn commit(self: Box<Self>) -> Result<()>;
}
