//! Transactional subvolume recovery.

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use undelfs_error::UndelfsError;
use undelfs_store::MetaStore;
use undelfs_types::{InodeNumber, SubvolId, FIRST_FREE_OBJECTID, RECOVERY_DIR_NAME};

/// Pre-reserved mutation budget for one recovery transaction: two units
/// for the recovery directory's linkage into its parent, two for its
/// self-descriptor, two for the namespace-link entry pair, two for the
/// subvolume ref/backref pair.
pub const RESERVATION_UNITS: u32 = 8;

/// The step of the recovery transaction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    Begin,
    EnsureDir,
    CreateLink,
    LoadRoot,
    WriteRoot,
    DeleteOrphan,
    Commit,
}

impl std::fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Begin => "transaction begin",
            Self::EnsureDir => "recovery directory creation",
            Self::CreateLink => "namespace link creation",
            Self::LoadRoot => "root descriptor lookup",
            Self::WriteRoot => "root descriptor write",
            Self::DeleteOrphan => "orphan marker deletion",
            Self::Commit => "transaction commit",
        };
        f.write_str(name)
    }
}

/// A recovery attempt that failed, identifying the failing step.
///
/// The transaction was abandoned without commit; no partial state became
/// visible. The caller must not retry automatically.
#[derive(Debug, Error)]
#[error("recovery of subvol {subvol} failed during {step}: {source}")]
pub struct RecoverError {
    pub subvol: SubvolId,
    pub step: RecoveryStep,
    #[source]
    pub source: UndelfsError,
}

/// Reattach an intact orphaned subvolume and consume its orphan marker.
///
/// The caller has already established intactness via
/// [`crate::classify::is_intact`]; this routine does not re-check it.
/// All steps are staged inside one transaction with a budget of
/// [`RESERVATION_UNITS`]; commit is the irreversible decision point.
pub fn recover_subvol<S: MetaStore>(
    store: &mut S,
    subvol: SubvolId,
) -> Result<(), RecoverError> {
    let fail = |step: RecoveryStep| {
        move |source: UndelfsError| RecoverError {
            subvol,
            step,
            source,
        }
    };

    let mut txn = store
        .begin(RESERVATION_UNITS)
        .map_err(fail(RecoveryStep::Begin))?;

    let dir = txn
        .ensure_dir(InodeNumber(FIRST_FREE_OBJECTID), RECOVERY_DIR_NAME)
        .map_err(fail(RecoveryStep::EnsureDir))?;

    let link_name = subvol.recovery_link_name();
    txn.create_link(dir, &link_name, subvol)
        .map_err(fail(RecoveryStep::CreateLink))?;

    let mut root = txn
        .lookup_root_exact(subvol)
        .map_err(fail(RecoveryStep::LoadRoot))?;
    root.clear_dead();
    txn.write_root(subvol, &root)
        .map_err(fail(RecoveryStep::WriteRoot))?;

    txn.delete_orphan(subvol)
        .map_err(fail(RecoveryStep::DeleteOrphan))?;

    txn.commit().map_err(fail(RecoveryStep::Commit))?;

    info!(
        target: "undelfs::recover",
        subvol = subvol.0,
        link = %link_name,
        "subvol_recovered"
    );
    Ok(())
}
