use std::fs::{self, File};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use wcbt_core::error::invariant_violation;
use wcbt_core::manifest::{ExecutionBlock, OperationResult, OperationType, Outcome, RunManifest, RunStatus};
use wcbt_core::paths::assert_within;

/// Run-directory-relative paths the executor must never overwrite with a
/// payload copy (spec §4.8, §9 "Reserved path").
const RESERVED_FILE_NAMES: &[&str] = &["plan.txt", "manifest.json"];

const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Caps how many `copy_file_to_archive` operations are actually attempted
/// this pass (spec §4.14): operations beyond the cap are left with no
/// result at all, not `skipped_non_copy_operation`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub max_items: Option<usize>,
}

/// Copies planned files into the run directory with strict safety
/// invariants, fail-fast on the first failing operation (spec §4.8).
pub fn execute(run_dir: &Path, manifest: &RunManifest, options: ExecuteOptions) -> ExecutionBlock {
    let reserved_paths: Vec<PathBuf> = RESERVED_FILE_NAMES.iter().map(|n| run_dir.join(n)).collect();

    let mut results = Vec::new();
    let mut status = RunStatus::Success;
    let mut copy_budget = options.max_items;

    for (index, op) in manifest.operations.iter().enumerate() {
        if op.operation_type != OperationType::CopyFileToArchive {
            results.push(OperationResult {
                operation_index: index,
                operation_type: op.operation_type,
                relative_path: op.relative_path.clone(),
                source_path: op.source_path.clone(),
                destination_path: op.destination_path.clone(),
                outcome: Outcome::SkippedNonCopyOperation,
                message: "operation type is not copy_file_to_archive".to_string(),
                verification_outcome: None,
                verification: None,
            });
            continue;
        }

        if let Some(remaining) = copy_budget {
            if remaining == 0 {
                // Budget exhausted: leave this and all later copy
                // operations with no result at all (spec §4.14), matching
                // the "never attempted" state rather than a recorded skip.
                break;
            }
            copy_budget = Some(remaining - 1);
        }

        let outcome = copy_one(&op.source_path, &op.destination_path, run_dir, &reserved_paths);
        let failed = matches!(outcome.0, Outcome::FailedInvariant | Outcome::FailedIo);

        results.push(OperationResult {
            operation_index: index,
            operation_type: op.operation_type,
            relative_path: op.relative_path.clone(),
            source_path: op.source_path.clone(),
            destination_path: op.destination_path.clone(),
            outcome: outcome.0,
            message: outcome.1,
            verification_outcome: None,
            verification: None,
        });

        if failed {
            status = RunStatus::Failed;
            warn!(
                run_id = %manifest.run_id,
                relative_path = %op.relative_path,
                "operation failed; stopping execution pass"
            );
            break;
        }
    }

    info!(
        run_id = %manifest.run_id,
        results = results.len(),
        status = ?status,
        "execution pass complete"
    );
    ExecutionBlock { status, results }
}

fn copy_one(
    source: &Path,
    destination: &Path,
    run_root: &Path,
    reserved_paths: &[PathBuf],
) -> (Outcome, String) {
    if let Err(err) = assert_within(run_root, destination) {
        return (Outcome::FailedInvariant, err.to_string());
    }
    if reserved_paths.iter().any(|p| p == destination) {
        return (
            Outcome::FailedInvariant,
            invariant_violation(format!(
                "destination collides with a reserved artifact path: {}",
                destination.display()
            ))
            .to_string(),
        );
    }
    if destination.exists() {
        return (
            Outcome::FailedInvariant,
            invariant_violation(format!("destination already exists: {}", destination.display())).to_string(),
        );
    }

    let source_meta = match fs::symlink_metadata(source) {
        Ok(meta) => meta,
        Err(err) => {
            return (
                Outcome::FailedInvariant,
                invariant_violation(format!("source does not exist: {}: {err}", source.display())).to_string(),
            );
        }
    };
    if source_meta.file_type().is_symlink() {
        return (
            Outcome::FailedInvariant,
            invariant_violation(format!("source is a symlink: {}", source.display())).to_string(),
        );
    }
    if !source_meta.is_file() {
        return (
            Outcome::FailedInvariant,
            invariant_violation(format!("source is not a regular file: {}", source.display())).to_string(),
        );
    }

    if let Some(parent) = destination.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return (Outcome::FailedIo, format!("creating parent directory: {err}"));
        }
    }

    if let Err(err) = copy_file_contents(source, destination) {
        let _ = fs::remove_file(destination);
        return (Outcome::FailedIo, format!("copying file: {err}"));
    }

    if let Err(err) = preserve_timestamps(source, destination, &source_meta) {
        warn!(
            source = %source.display(),
            destination = %destination.display(),
            error = %err,
            "failed to preserve timestamps on copied file"
        );
    }

    (Outcome::Copied, "copied".to_string())
}

fn copy_file_contents(source: &Path, destination: &Path) -> Result<(), std::io::Error> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(destination)?;
    let mut buf = vec![0_u8; COPY_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    writer.flush()?;
    writer.sync_all()?;
    Ok(())
}

fn preserve_timestamps(
    _source: &Path,
    destination: &Path,
    source_meta: &fs::Metadata,
) -> Result<(), std::io::Error> {
    let modified = source_meta.modified()?;
    let accessed = source_meta.accessed().unwrap_or(modified);
    let times = fs::FileTimes::new().set_modified(modified).set_accessed(accessed);
    File::options().write(true).open(destination)?.set_times(times)
}
