//! Orphan marker scan.

use crate::classify::is_intact;
use crate::recover::{recover_subvol, RecoverError, RecoveryStep};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use undelfs_error::UndelfsError;
use undelfs_store::MetaStore;
use undelfs_types::{SubvolId, ORPHAN_ITEM_KEY, ORPHAN_OBJECTID};

/// Scan failures that stop the whole invocation.
///
/// Per-candidate recovery failures are isolated inside the report and do
/// not appear here, except when the scan was filtered to that single
/// candidate.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The storage engine could not service an index lookup; the scan
    /// halts immediately without processing further candidates.
    #[error("orphan index scan failed: {0}")]
    Storage(#[from] UndelfsError),

    /// A specific subvolume was requested but is not among the orphans.
    #[error("subvol {0} not found among orphans")]
    SubvolNotFound(SubvolId),

    /// The single requested candidate's recovery failed.
    #[error(transparent)]
    Candidate(#[from] RecoverError),
}

/// Per-candidate result, in visit order (descending subvolume id).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CandidateOutcome {
    /// The subvolume was reattached and its orphan marker consumed.
    Recovered { subvol: SubvolId, link: String },
    /// The recovery transaction failed and was abandoned without commit.
    Failed {
        subvol: SubvolId,
        step: RecoveryStep,
        detail: String,
    },
}

/// Outcome of one scan invocation.
///
/// `found` counts intact orphaned subvolumes; `recovered` counts
/// successful recoveries. The two are distinct metrics: a candidate whose
/// recovery fails is found but not recovered. Zero of either is success.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UndeleteReport {
    pub found: u64,
    pub recovered: u64,
    pub outcomes: Vec<CandidateOutcome>,
}

/// Walk the orphan-marker key range in descending subvolume-id order and
/// recover every intact candidate.
///
/// With `filter` set, only that subvolume is considered: a miss is
/// [`ScanError::SubvolNotFound`], a damaged target is success with zero
/// counts, and a failed recovery is the scan's result. With `dry_run`,
/// candidates are classified and counted but no transaction is opened.
pub fn undelete_subvols<S: MetaStore>(
    store: &mut S,
    filter: Option<SubvolId>,
    dry_run: bool,
) -> Result<UndeleteReport, ScanError> {
    let mut report = UndeleteReport::default();
    let mut upto = filter.map_or(u64::MAX, |id| id.0);

    loop {
        let Some(key) = store.prev_in_range(ORPHAN_OBJECTID, ORPHAN_ITEM_KEY, upto)? else {
            // With a filter the range is consulted exactly once, so an
            // empty result here means the target has no marker.
            if let Some(id) = filter {
                return Err(ScanError::SubvolNotFound(id));
            }
            break;
        };
        let subvol = SubvolId(key.offset);

        if let Some(id) = filter {
            if subvol != id {
                // The nearest marker is already below the requested id.
                return Err(ScanError::SubvolNotFound(id));
            }
        }

        if is_intact(store, subvol)? {
            report.found += 1;
            if dry_run {
                info!(
                    target: "undelfs::scan",
                    subvol = subvol.0,
                    "candidate_recoverable"
                );
            } else {
                match recover_subvol(store, subvol) {
                    Ok(()) => {
                        report.recovered += 1;
                        report.outcomes.push(CandidateOutcome::Recovered {
                            subvol,
                            link: subvol.recovery_link_name(),
                        });
                    }
                    Err(err) => {
                        warn!(
                            target: "undelfs::scan",
                            subvol = subvol.0,
                            step = %err.step,
                            error = %err.source,
                            "candidate_recovery_failed"
                        );
                        if filter.is_some() {
                            return Err(ScanError::Candidate(err));
                        }
                        report.outcomes.push(CandidateOutcome::Failed {
                            subvol,
                            step: err.step,
                            detail: err.source.to_string(),
                        });
                    }
                }
            }
        } else {
            debug!(
                target: "undelfs::scan",
                subvol = subvol.0,
                "candidate_damaged_skipped"
            );
        }

        if filter == Some(subvol) {
            break;
        }
        let Some(next) = key.offset.checked_sub(1) else {
            break;
        };
        upto = next;
    }

    info!(
        target: "undelfs::scan",
        found = report.found,
        recovered = report.recovered,
        dry_run,
        "scan_complete"
    );
    Ok(report)
}
