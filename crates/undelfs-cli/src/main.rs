#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::env::VarError;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;
use undelfs_recover::{undelete_subvols, CandidateOutcome, ScanError, UndeleteReport};
use undelfs_store::MemoryMetaStore;
use undelfs_types::{InodeNumber, SubvolId, FIRST_FREE_OBJECTID, RECOVERY_DIR_NAME};

// ── Logging bootstrap ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "UNDELFS_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(log_format_override: Option<LogFormat>) -> Result<LogFormat> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_env_filter(default_env_filter())
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }

    Ok(format)
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "undelfs", about = "UNDELFS — orphaned subvolume undelete toolkit")]
struct Cli {
    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `UNDELFS_LOG_FORMAT` > `human`.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a metadata snapshot.
    Inspect {
        /// Path to the metadata snapshot.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List orphan markers and their intactness classification.
    Orphans {
        /// Path to the metadata snapshot.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Recover intact orphaned subvolumes into lost+found.
    Undelete {
        /// Path to the metadata snapshot.
        image: PathBuf,
        /// Recover only this subvolume id; fails if it has no orphan marker.
        #[arg(long)]
        subvol_id: Option<u64>,
        /// Classify candidates without performing any recovery.
        #[arg(long)]
        dry_run: bool,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Inspect { .. } => "inspect",
            Self::Orphans { .. } => "orphans",
            Self::Undelete { .. } => "undelete",
        }
    }
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    records: usize,
    orphans: usize,
    recovery_dir_present: bool,
}

#[derive(Debug, Serialize)]
struct OrphanOutput {
    subvol: u64,
    intact: bool,
}

#[derive(Debug, Serialize)]
struct UndeleteOutput {
    found: u64,
    recovered: u64,
    dry_run: bool,
    outcomes: Vec<CandidateOutcome>,
}

impl UndeleteOutput {
    fn from_report(report: UndeleteReport, dry_run: bool) -> Self {
        Self {
            found: report.found,
            recovered: report.recovered,
            dry_run,
            outcomes: report.outcomes,
        }
    }
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let log_format = init_logging(cli.log_format)?;
    let command_name = cli.command.name();
    let run_span = info_span!(
        target: "undelfs::cli",
        "command",
        command = command_name,
        log_format = log_format.as_str()
    );
    let _run_guard = run_span.enter();
    let started = Instant::now();

    info!(
        target: "undelfs::cli",
        command = command_name,
        log_format = log_format.as_str(),
        "command_start"
    );

    let result = match cli.command {
        Command::Inspect { image, json } => inspect_cmd(&image, json),
        Command::Orphans { image, json } => orphans_cmd(&image, json),
        Command::Undelete {
            image,
            subvol_id,
            dry_run,
            json,
        } => undelete_cmd(&image, subvol_id.map(SubvolId), dry_run, json),
    };

    let duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    if let Err(err) = &result {
        error!(
            target: "undelfs::cli",
            command = command_name,
            duration_us,
            error = %err,
            "command_failed"
        );
    } else {
        info!(
            target: "undelfs::cli",
            command = command_name,
            duration_us,
            "command_succeeded"
        );
    }

    result
}

// ── Commands ────────────────────────────────────────────────────────────────

fn load_store(path: &Path) -> Result<MemoryMetaStore> {
    MemoryMetaStore::load(path)
        .with_context(|| format!("failed to load metadata snapshot {}", path.display()))
}

fn build_inspect_output(path: &Path) -> Result<InspectOutput> {
    let store = load_store(path)?;
    let recovery_dir_present = store
        .dir_entry(InodeNumber(FIRST_FREE_OBJECTID), RECOVERY_DIR_NAME)
        .context("read recovery directory entry")?
        .is_some();
    Ok(InspectOutput {
        records: store.record_count(),
        orphans: store.orphan_ids().len(),
        recovery_dir_present,
    })
}

fn inspect_cmd(path: &Path, json: bool) -> Result<()> {
    let output = build_inspect_output(path)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("UNDELFS snapshot: {}", path.display());
        println!("  records:      {}", output.records);
        println!("  orphans:      {}", output.orphans);
        println!(
            "  lost+found:   {}",
            if output.recovery_dir_present {
                "present"
            } else {
                "absent"
            }
        );
    }
    Ok(())
}

fn build_orphans_output(path: &Path) -> Result<Vec<OrphanOutput>> {
    let store = load_store(path)?;
    let mut orphans: Vec<OrphanOutput> = store
        .orphan_ids()
        .into_iter()
        .map(|id| {
            let intact = undelfs_recover::is_intact(&store, id)?;
            Ok(OrphanOutput {
                subvol: id.0,
                intact,
            })
        })
        .collect::<Result<_, undelfs_error::UndelfsError>>()
        .context("classify orphans")?;
    // Report in the order the scanner would visit them.
    orphans.sort_by(|a, b| b.subvol.cmp(&a.subvol));
    Ok(orphans)
}

fn orphans_cmd(path: &Path, json: bool) -> Result<()> {
    let orphans = build_orphans_output(path)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&orphans).context("serialize output")?
        );
    } else if orphans.is_empty() {
        println!("no orphan markers");
    } else {
        for orphan in &orphans {
            println!(
                "subvol {} — {}",
                orphan.subvol,
                if orphan.intact { "intact" } else { "damaged" }
            );
        }
    }
    Ok(())
}

fn run_undelete(
    path: &Path,
    filter: Option<SubvolId>,
    dry_run: bool,
) -> Result<UndeleteOutput> {
    let mut store = load_store(path)?;

    let report = match undelete_subvols(&mut store, filter, dry_run) {
        Ok(report) => report,
        Err(err @ ScanError::SubvolNotFound(_)) => {
            return Err(anyhow::Error::new(err))
                .context("requested subvolume is not recoverable");
        }
        Err(err) => return Err(anyhow::Error::new(err)).context("orphan scan failed"),
    };

    if !dry_run && report.recovered > 0 {
        store
            .save(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    }

    Ok(UndeleteOutput::from_report(report, dry_run))
}

fn undelete_cmd(
    path: &Path,
    filter: Option<SubvolId>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let output = run_undelete(path, filter, dry_run)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        for outcome in &output.outcomes {
            match outcome {
                CandidateOutcome::Recovered { subvol, link } => {
                    println!("recovered subvol {subvol} as {RECOVERY_DIR_NAME}/{link}");
                }
                CandidateOutcome::Failed {
                    subvol,
                    step,
                    detail,
                } => {
                    println!("subvol {subvol}: {step} failed: {detail}");
                }
            }
        }
        println!("{} intact orphaned subvolume(s) found", output.found);
        println!("{} subvolume(s) recovered", output.recovered);
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use undelfs_types::TreeKey;

    fn write_snapshot(ids_intact: &[u64], ids_damaged: &[u64]) -> (tempfile::TempDir, PathBuf) {
        let mut store = MemoryMetaStore::new();
        for &id in ids_intact {
            store.create_subvol(SubvolId(id), 1);
            store.begin_deletion(SubvolId(id));
        }
        for &id in ids_damaged {
            store.create_subvol(SubvolId(id), 1);
            store.begin_deletion(SubvolId(id));
            store.set_drop_progress(SubvolId(id), TreeKey::new(257, 1, 0));
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta.usnp");
        store.save(&path).expect("save snapshot");
        (dir, path)
    }

    #[test]
    fn inspect_reports_counts() {
        let (_dir, path) = write_snapshot(&[300], &[301]);
        let output = build_inspect_output(&path).expect("inspect");
        assert_eq!(output.orphans, 2);
        assert!(!output.recovery_dir_present);
        assert!(output.records > 2);
    }

    #[test]
    fn orphans_listed_descending_with_classification() {
        let (_dir, path) = write_snapshot(&[10], &[11]);
        let orphans = build_orphans_output(&path).expect("orphans");
        assert_eq!(orphans.len(), 2);
        assert_eq!(orphans[0].subvol, 11);
        assert!(!orphans[0].intact);
        assert_eq!(orphans[1].subvol, 10);
        assert!(orphans[1].intact);
    }

    #[test]
    fn undelete_persists_the_updated_snapshot() {
        let (_dir, path) = write_snapshot(&[300], &[]);

        let output = run_undelete(&path, None, false).expect("undelete");
        assert_eq!(output.found, 1);
        assert_eq!(output.recovered, 1);

        let store = MemoryMetaStore::load(&path).expect("reload");
        assert!(store.orphan_ids().is_empty());
        let lost_found = store
            .dir_entry(InodeNumber(FIRST_FREE_OBJECTID), RECOVERY_DIR_NAME)
            .unwrap()
            .expect("recovery dir");
        assert!(store
            .dir_entry(InodeNumber(lost_found.target), "sub300")
            .unwrap()
            .is_some());
    }

    #[test]
    fn dry_run_leaves_the_snapshot_untouched() {
        let (_dir, path) = write_snapshot(&[300], &[]);
        let before = std::fs::read(&path).expect("read before");

        let output = run_undelete(&path, None, true).expect("dry run");
        assert_eq!(output.found, 1);
        assert_eq!(output.recovered, 0);

        let after = std::fs::read(&path).expect("read after");
        assert_eq!(before, after);
    }

    #[test]
    fn missing_filter_target_fails_the_invocation() {
        let (_dir, path) = write_snapshot(&[5], &[]);
        let err = run_undelete(&path, Some(SubvolId(999)), false).unwrap_err();
        assert!(format!("{err:#}").contains("not found among orphans"));
    }

    #[test]
    fn damaged_filter_target_succeeds_with_zero_counts() {
        let (_dir, path) = write_snapshot(&[], &[42]);
        let output = run_undelete(&path, Some(SubvolId(42)), false).expect("scan");
        assert_eq!(output.found, 0);
        assert_eq!(output.recovered, 0);

        let store = MemoryMetaStore::load(&path).expect("reload");
        assert_eq!(store.orphan_ids(), vec![SubvolId(42)]);
    }

    #[test]
    fn undelete_json_shape_is_stable() {
        let (_dir, path) = write_snapshot(&[7], &[]);
        let output = run_undelete(&path, None, false).expect("undelete");
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&output).expect("serialize"))
                .expect("reparse");
        assert_eq!(value["found"], 1);
        assert_eq!(value["recovered"], 1);
        assert_eq!(value["outcomes"][0]["result"], "recovered");
        assert_eq!(value["outcomes"][0]["subvol"], 7);
        assert_eq!(value["outcomes"][0]["link"], "sub7");
    }

    #[test]
    fn log_format_parses_strictly() {
        assert_eq!(LogFormat::parse("human").unwrap(), LogFormat::Human);
        assert_eq!(LogFormat::parse(" JSON ").unwrap(), LogFormat::Json);
        assert!(LogFormat::parse("verbose").is_err());
    }
}
