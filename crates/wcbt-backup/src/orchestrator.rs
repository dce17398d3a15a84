use std::path::{Path, PathBuf};

use tracing::info;
use wcbt_core::atomic_io::write_text_atomic;
use wcbt_core::clock::{Clock, format_run_id};
use wcbt_core::error::{execution_failed, safety_violation};
use wcbt_core::manifest::{RunManifest, RunStatus};
use wcbt_core::paths::{ProfilePaths, ensure_profile_directories, validate_source_path};
use wcbt_lock::{AcquireFlags, ProfileLock};

use crate::compress::{CompressionFormat, compress_run};
use crate::execute::{ExecuteOptions, execute};
use crate::materialize::{materialize, write_manifest};
use crate::plan::{plan, render_plan_report};
use crate::scan::{ScanRules, scan};

/// A planning-or-materialization mode for a single backup invocation
/// (spec §4.14, §6 CLI surface: `--dry-run | --materialize | --execute`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Plan only; never creates a run directory.
    DryRun,
    /// Plan and materialize the run directory, but never copy files.
    Materialize,
    /// Plan, materialize, and copy files.
    Execute,
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source: PathBuf,
    pub mode: BackupMode,
    pub scan_rules: ScanRules,
    pub max_items: Option<usize>,
    pub write_plan: bool,
    pub plan_path: Option<PathBuf>,
    pub overwrite_plan: bool,
    pub lock_flags: AcquireFlags,
    pub compression: CompressionFormat,
    pub command: String,
}

/// The outcome of a backup orchestration call.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub run_id: String,
    pub archive_root: PathBuf,
    pub manifest: Option<RunManifest>,
    pub compressed_artifact: Option<PathBuf>,
}

/// Composes the scanner, planner, materializer, and executor under the
/// profile lock (spec §4.14).
pub fn run_backup(
    paths: &ProfilePaths,
    clock: &dyn Clock,
    request: BackupRequest,
) -> Result<BackupOutcome, anyhow::Error> {
    if request.mode == BackupMode::DryRun && request.compression != CompressionFormat::None {
        return Err(safety_violation("--compress requires --execute or --materialize, not --dry-run").into());
    }

    let source = validate_source_path(&request.source)?;
    let run_id = format_run_id(clock.now());
    let archive_root = paths.archives_root.join(&run_id);

    let scan_result = scan(&source, &request.scan_rules);
    let plan_result = plan(&scan_result, &archive_root)?;
    let report = render_plan_report(&plan_result, &paths.profile_name, &source, &archive_root);

    info!(
        profile = %paths.profile_name,
        run_id,
        operations = plan_result.operations.len(),
        mode = ?request.mode,
        "backup plan computed"
    );

    if request.mode == BackupMode::DryRun {
        if request.write_plan {
            write_plan_report(&request, &report)?;
        }
        return Ok(BackupOutcome {
            run_id,
            archive_root,
            manifest: None,
            compressed_artifact: None,
        });
    }

    ensure_profile_directories(paths)?;
    let guard = ProfileLock::acquire(
        paths,
        clock,
        &request.command,
        Some(run_id.clone()),
        request.lock_flags,
    )?;

    let result = (|| -> Result<BackupOutcome, anyhow::Error> {
        let mut manifest = materialize(&archive_root, &run_id, &paths.profile_name, &source, &plan_result, &report, clock)?;

        if request.mode == BackupMode::Materialize {
            return Ok(BackupOutcome {
                run_id: run_id.clone(),
                archive_root: archive_root.clone(),
                manifest: Some(manifest),
                compressed_artifact: None,
            });
        }

        let execution = execute(&archive_root, &manifest, ExecuteOptions { max_items: request.max_items });
        let failed = execution.status == RunStatus::Failed;
        manifest.execution = Some(execution);
        write_manifest(&archive_root, &manifest)?;

        if failed {
            return Err(execution_failed(format!("backup run {run_id} failed during execution")).into());
        }

        let compressed_artifact = compress_run(&archive_root, &run_id, request.compression)?;

        Ok(BackupOutcome {
            run_id: run_id.clone(),
            archive_root: archive_root.clone(),
            manifest: Some(manifest),
            compressed_artifact,
        })
    })();

    drop(guard);
    result
}

fn write_plan_report(request: &BackupRequest, report: &str) -> Result<(), anyhow::Error> {
    let Some(path) = request.plan_path.as_deref() else {
        return Ok(());
    };
    if path.exists() && !request.overwrite_plan {
        return Err(safety_violation(format!(
            "plan path already exists and --overwrite-plan was not given: {}",
            path.display()
        ))
        .into());
    }
    write_text_atomic(path, report)
}
