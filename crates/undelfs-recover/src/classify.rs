//! Intactness classification.

use undelfs_error::Result;
use undelfs_store::MetaStore;
use undelfs_types::SubvolId;

/// Whether the subvolume's data tree was left untouched by a prior
/// partial deletion.
///
/// Resolves the root at the latest generation. A subvolume whose root no
/// longer resolves is not intact; one that resolves is intact iff its
/// deletion progress cursor never advanced past initialization (leading
/// objectid still zero).
///
/// Read-only and side-effect free; storage-level failures propagate
/// because they are structural, not a classification result.
pub fn is_intact<S: MetaStore>(store: &S, subvol: SubvolId) -> Result<bool> {
    match store.resolve_root(subvol)? {
        None => Ok(false),
        Some(item) => Ok(item.drop_never_started()),
    }
}
