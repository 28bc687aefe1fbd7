#![forbid(unsafe_code)]
//! Recovery engine for orphaned subvolumes.
//!
//! A subvolume deletion that began but never finished leaves an orphan
//! marker in the metadata index. This crate walks those markers in
//! descending subvolume-id order, classifies each candidate as intact or
//! damaged, and reattaches every intact candidate under the `lost+found`
//! recovery directory inside one bounded, all-or-nothing transaction.
//!
//! - [`classify::is_intact`]: pure read-only intactness query.
//! - [`recover::recover_subvol`]: the per-candidate recovery transaction.
//! - [`scan::undelete_subvols`]: the driving scan.

pub mod classify;
pub mod recover;
pub mod scan;

pub use classify::is_intact;
pub use recover::{recover_subvol, RecoverError, RecoveryStep, RESERVATION_UNITS};
pub use scan::{undelete_subvols, CandidateOutcome, ScanError, UndeleteReport};
