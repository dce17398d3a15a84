use std::fs;
use std::path::{Path, PathBuf};

use wcbt_backup::compress::extract_archive;
use wcbt_core::error::{restore_manifest_error, safety_violation};
use wcbt_core::hashing::sha256_hex;
use wcbt_core::manifest::{OperationType, RunManifest, SCHEMA_RUN_MANIFEST_V2};
use wcbt_core::paths::{assert_within, validate_restore_target};

use crate::model::{
    CandidateOperation, EXECUTION_STRATEGY_STAGED_ATOMIC_REPLACE, RestoreCandidate, RestoreMode, RestorePlan,
    SCHEMA_RESTORE_PLAN_V1, VerificationMode,
};

fn is_archive_path(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_ascii_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".tar.zst") || lower.ends_with(".tarzst")
}

/// If `manifest_path` names a compressed run archive rather than a bare
/// `manifest.json`, extracts it into a sibling `<archive name>.wcbt_extracted`
/// directory and returns the path to the `manifest.json` found inside it.
/// Otherwise returns `manifest_path` unchanged (spec §4.16).
fn resolve_manifest_source(manifest_path: &Path) -> Result<PathBuf, anyhow::Error> {
    if !is_archive_path(manifest_path) {
        return Ok(manifest_path.to_path_buf());
    }

    let extraction_dir = PathBuf::from(format!("{}.wcbt_extracted", manifest_path.display()));
    if extraction_dir.exists() {
        fs::remove_dir_all(&extraction_dir).map_err(|e| {
            restore_manifest_error(format!("clearing stale extraction at {}: {e}", extraction_dir.display()))
        })?;
    }
    extract_archive(manifest_path, &extraction_dir)?;
    locate_manifest_in_extracted(&extraction_dir)
}

/// A compressed run archive nests exactly one top-level directory (the
/// run_id) holding the run's files, including `manifest.json`.
fn locate_manifest_in_extracted(extraction_dir: &Path) -> Result<PathBuf, anyhow::Error> {
    let mut run_dirs: Vec<PathBuf> = fs::read_dir(extraction_dir)
        .map_err(|e| restore_manifest_error(format!("listing {}: {e}", extraction_dir.display())))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    if run_dirs.len() != 1 {
        return Err(restore_manifest_error(format!(
            "expected exactly one run directory inside extracted archive {}, found {}",
            extraction_dir.display(),
            run_dirs.len()
        ))
        .into());
    }

    let run_dir = run_dirs.remove(0);
    let manifest_path = run_dir.join("manifest.json");
    if !manifest_path.is_file() {
        return Err(
            restore_manifest_error(format!("no manifest.json found in extracted run directory {}", run_dir.display()))
                .into(),
        );
    }
    Ok(manifest_path)
}

/// Reads and parses a source run manifest, also returning the SHA-256 over
/// its raw bytes for the restore plan's audit trail (spec §4.10 step 3).
///
/// `manifest_path` may also point at a `.zip`/`.tar.zst` run archive
/// produced by `--compress`; it is transparently extracted first, and the
/// manifest's `archive_root` is rewritten to the extracted run directory so
/// restore planning reads files from where they actually landed on disk
/// rather than the (now stale) path baked in at backup time.
pub fn read_source_manifest(manifest_path: &Path) -> Result<(RunManifest, String), anyhow::Error> {
    let resolved_path = resolve_manifest_source(manifest_path)?;

    let bytes = fs::read(&resolved_path)
        .map_err(|e| restore_manifest_error(format!("reading {}: {e}", resolved_path.display())))?;
    let digest = sha256_hex(&bytes);

    let mut manifest: RunManifest = serde_json::from_slice(&bytes)
        .map_err(|e| restore_manifest_error(format!("parsing {}: {e}", resolved_path.display())))?;

    if manifest.schema_version != SCHEMA_RUN_MANIFEST_V2 {
        return Err(restore_manifest_error(format!(
            "unsupported manifest schema_version: {} (expected {})",
            manifest.schema_version, SCHEMA_RUN_MANIFEST_V2
        ))
        .into());
    }

    if resolved_path != manifest_path {
        manifest.archive_root = resolved_path
            .parent()
            .ok_or_else(|| {
                restore_manifest_error(format!("resolved manifest path has no parent: {}", resolved_path.display()))
            })?
            .to_path_buf();
    }

    Ok((manifest, digest))
}

/// Builds a [`RestorePlan`] and its ordered [`RestoreCandidate`]s from a
/// source run manifest (spec §4.10). Validates schema, resolves and
/// disjoint-checks `archive_root`/`destination_root`, and classifies every
/// `copy_file_to_archive` operation by current destination existence and `mode`.
pub fn build_restore_plan(
    manifest_path: &Path,
    destination_root: &Path,
    mode: RestoreMode,
    verification: VerificationMode,
) -> Result<(RestorePlan, Vec<RestoreCandidate>), anyhow::Error> {
    let (manifest, source_manifest_sha256) = read_source_manifest(manifest_path)?;

    let archive_root = manifest.archive_root.clone();
    let archive_metadata = fs::metadata(&archive_root)
        .map_err(|e| restore_manifest_error(format!("archive_root does not exist: {}: {e}", archive_root.display())))?;
    if !archive_metadata.is_dir() {
        return Err(restore_manifest_error(format!("archive_root is not a directory: {}", archive_root.display())).into());
    }

    validate_restore_target(destination_root)?;
    if destination_root.exists() && !destination_root.is_dir() {
        return Err(restore_manifest_error(format!(
            "destination root exists and is not a directory: {}",
            destination_root.display()
        ))
        .into());
    }

    if archive_root.starts_with(destination_root) || destination_root.starts_with(&archive_root) {
        return Err(safety_violation(format!(
            "archive_root and destination_root must not contain one another: archive_root={} destination_root={}",
            archive_root.display(),
            destination_root.display()
        ))
        .into());
    }

    let mut candidates = Vec::new();
    for (index, op) in manifest.operations.iter().enumerate() {
        if op.operation_type != OperationType::CopyFileToArchive {
            continue;
        }

        let segments: Vec<&str> = op.relative_path.split(['/', '\\']).collect();
        let is_valid = !segments.is_empty()
            && segments.iter().all(|seg| {
                !seg.is_empty() && *seg != "." && *seg != ".." && !seg.contains(':')
            });
        if !is_valid {
            return Err(restore_manifest_error(format!(
                "source manifest operation {index} has an unsafe relative path: {:?}",
                op.relative_path
            ))
            .into());
        }

        let source_path = archive_root.join(&op.relative_path);
        assert_within(&archive_root, &source_path)?;
        let destination_path = destination_root.join(&op.relative_path);
        assert_within(destination_root, &destination_path)?;

        let exists = destination_path.exists();
        let (operation_type, reason) = match (exists, mode) {
            (false, _) => (CandidateOperation::CopyNew, "destination does not exist".to_string()),
            (true, RestoreMode::AddOnly) => (
                CandidateOperation::SkipExisting,
                "destination exists and mode is add-only".to_string(),
            ),
            (true, RestoreMode::Overwrite) => (
                CandidateOperation::OverwriteExisting,
                "destination exists and mode is overwrite".to_string(),
            ),
        };

        candidates.push(RestoreCandidate {
            operation_index: index,
            relative_path: op.relative_path.clone(),
            source_path,
            destination_path,
            operation_type,
            reason,
        });
    }

    let plan = RestorePlan {
        schema_version: SCHEMA_RESTORE_PLAN_V1.to_string(),
        execution_strategy: EXECUTION_STRATEGY_STAGED_ATOMIC_REPLACE.to_string(),
        run_id: manifest.run_id.clone(),
        archive_root,
        destination_root: destination_root.to_path_buf(),
        profile_name: manifest.profile_name.clone(),
        mode,
        verification,
        source_manifest_sha256,
        source_operation_count: manifest.operations.len(),
    };

    Ok((plan, candidates))
}
