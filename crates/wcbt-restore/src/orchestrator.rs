use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use wcbt_core::atomic_io::{JsonStyle, append_jsonl, write_json_atomic};
use wcbt_core::error::{downcast_kind, restore_artifact_error, restore_conflict_error};

use crate::model::{
    CandidateOperation, RestoreCandidate, RestoreMode, RestorePlan, VerificationMode, dry_run_artifacts_root,
    stage_root_path, staged_artifacts_root,
};
use crate::plan::build_restore_plan;
use crate::promote::promote;
use crate::stage::stage_candidates;
use crate::verify::verify_stage;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub manifest_path: PathBuf,
    pub destination_root: PathBuf,
    pub mode: RestoreMode,
    pub verification: VerificationMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub run_id: String,
    pub destination_root: PathBuf,
    pub staged_count: usize,
    pub skipped_existing_count: usize,
}

/// Composes the restore planner, stager, verifier, and promoter with
/// journaling and an add-only conflict gate (spec §4.15). On any failure, a
/// best-effort `restore_summary.json` with `result = "error"` is written
/// before the error is re-raised.
pub fn run_restore(request: RestoreRequest) -> Result<RestoreOutcome, anyhow::Error> {
    let (plan, candidates) = build_restore_plan(
        &request.manifest_path,
        &request.destination_root,
        request.mode,
        request.verification,
    )?;
    let run_id = plan.run_id.clone();

    let artifacts_root = if request.dry_run {
        dry_run_artifacts_root(&request.destination_root, &run_id)
    } else {
        staged_artifacts_root(&request.destination_root, &run_id)
    };
    let journal_path = artifacts_root.join("execution_journal.jsonl");

    let result = run_inner(&request, &plan, &candidates, &artifacts_root, &journal_path, &run_id);

    if let Err(err) = &result {
        let kind = downcast_kind(err).map(|k| k.as_str()).unwrap_or("unknown");
        let _ = write_restore_summary(
            &artifacts_root,
            "error",
            &serde_json::json!({
                "run_id": run_id,
                "error_kind": kind,
                "error_message": err.to_string(),
            }),
        );
    }

    result
}

fn run_inner(
    request: &RestoreRequest,
    plan: &RestorePlan,
    candidates: &[RestoreCandidate],
    artifacts_root: &Path,
    journal_path: &Path,
    run_id: &str,
) -> Result<RestoreOutcome, anyhow::Error> {
    append_jsonl(
        journal_path,
        &serde_json::json!({
            "event": "restore_started",
            "run_id": run_id,
            "destination_root": request.destination_root,
            "mode": plan.mode,
            "verification": plan.verification,
            "dry_run": request.dry_run,
        }),
    )
    .map_err(|e| restore_artifact_error(format!("writing execution journal: {e}")))?;

    write_json_atomic(&artifacts_root.join("restore_plan.json"), &serde_json::to_value(plan)?, JsonStyle::Pretty)
        .map_err(|e| restore_artifact_error(format!("writing restore_plan.json: {e}")))?;

    let candidates_path = artifacts_root.join("restore_candidates.jsonl");
    let _ = fs::remove_file(&candidates_path);
    for candidate in candidates {
        append_jsonl(&candidates_path, &serde_json::to_value(candidate)?)
            .map_err(|e| restore_artifact_error(format!("writing restore_candidates.jsonl: {e}")))?;
    }

    let conflicts: Vec<&RestoreCandidate> = candidates
        .iter()
        .filter(|c| c.operation_type == CandidateOperation::SkipExisting)
        .collect();

    if plan.mode == RestoreMode::AddOnly && !conflicts.is_empty() {
        let conflicts_path = artifacts_root.join("restore_conflicts.jsonl");
        let _ = fs::remove_file(&conflicts_path);
        for conflict in &conflicts {
            append_jsonl(&conflicts_path, &serde_json::to_value(conflict)?)?;
        }
        write_restore_summary(
            artifacts_root,
            "conflict",
            &serde_json::json!({
                "run_id": run_id,
                "conflict_count": conflicts.len(),
            }),
        )?;
        return Err(restore_conflict_error(format!(
            "{} file(s) already exist at the destination in add-only mode",
            conflicts.len()
        ))
        .into());
    }

    let actionable: Vec<RestoreCandidate> = candidates
        .iter()
        .filter(|c| c.operation_type != CandidateOperation::SkipExisting)
        .cloned()
        .collect();

    let stage_root = stage_root_path(&request.destination_root, run_id);
    let stage_summary = stage_candidates(&actionable, &stage_root, artifacts_root, journal_path, request.dry_run)?;
    let staged_count = stage_summary.results.len();

    if !request.dry_run {
        verify_stage(&actionable, &stage_root, artifacts_root, journal_path, plan.verification)?;
        promote(&stage_root, &request.destination_root, run_id)?;
    }

    write_restore_summary(
        artifacts_root,
        "ok",
        &serde_json::json!({
            "run_id": run_id,
            "staged_count": staged_count,
            "skipped_existing_count": conflicts.len(),
            "dry_run": request.dry_run,
        }),
    )?;

    info!(run_id, staged_count, dry_run = request.dry_run, "restore complete");
    Ok(RestoreOutcome {
        run_id: run_id.to_string(),
        destination_root: request.destination_root.clone(),
        staged_count,
        skipped_existing_count: conflicts.len(),
    })
}

fn write_restore_summary(artifacts_root: &Path, result: &str, extra: &serde_json::Value) -> Result<(), anyhow::Error> {
    let mut value = serde_json::json!({ "result": result });
    if let (Some(map), Some(extra_map)) = (value.as_object_mut(), extra.as_object()) {
        for (key, v) in extra_map {
            map.insert(key.clone(), v.clone());
        }
    }
    write_json_atomic(&artifacts_root.join("restore_summary.json"), &value, JsonStyle::Pretty)
}

#[cfg(test)]
mod tests {
    use wcbt_core::atomic_io::{JsonStyle as CoreJsonStyle, write_json_atomic as core_write_json_atomic};
    use wcbt_core::manifest::{OperationType, PlannedOperation, RunManifest, SCHEMA_RUN_MANIFEST_V2};

    use super::*;

    fn write_source_manifest(archive_root: &Path, operations: Vec<PlannedOperation>) {
        fs::create_dir_all(archive_root).unwrap();
        let manifest = RunManifest {
            schema_version: SCHEMA_RUN_MANIFEST_V2.to_string(),
            run_id: "20250101_000000Z".to_string(),
            created_at_utc: "2025-01-01T00:00:00Z".to_string(),
            archive_root: archive_root.to_path_buf(),
            plan_text_path: archive_root.join("plan.txt"),
            profile_name: "p".to_string(),
            source_root: Path::new("/s").to_path_buf(),
            operations,
            scan_issues: vec![],
            execution: None,
            verification: None,
        };
        let value = serde_json::to_value(&manifest).unwrap();
        core_write_json_atomic(&archive_root.join("manifest.json"), &value, CoreJsonStyle::Pretty).unwrap();
    }

    #[test]
    fn run_restore_overwrite_mode_promotes_into_fresh_destination() {
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_root = archive_dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&archive_root).unwrap();
        fs::write(archive_root.join("a.txt"), "alpha").unwrap();
        write_source_manifest(
            &archive_root,
            vec![PlannedOperation {
                operation_type: OperationType::CopyFileToArchive,
                source_path: Path::new("/s/a.txt").to_path_buf(),
                destination_path: archive_root.join("a.txt"),
                relative_path: "a.txt".to_string(),
                reason: "copy into archive".to_string(),
            }],
        );

        let dest_dir = tempfile::tempdir().unwrap();
        let destination = dest_dir.path().join("restored/target/dir");

        let outcome = run_restore(RestoreRequest {
            manifest_path: archive_root.join("manifest.json"),
            destination_root: destination.clone(),
            mode: RestoreMode::Overwrite,
            verification: VerificationMode::Size,
            dry_run: false,
        })
        .unwrap();

        assert_eq!(outcome.staged_count, 1);
        assert_eq!(fs::read(destination.join("a.txt")).unwrap(), b"alpha");
        assert!(destination.join(".wcbt_restore").exists());
    }

    #[test]
    fn run_restore_add_only_conflict_fails_before_staging() {
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_root = archive_dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&archive_root).unwrap();
        fs::write(archive_root.join("a.txt"), "alpha").unwrap();
        write_source_manifest(
            &archive_root,
            vec![PlannedOperation {
                operation_type: OperationType::CopyFileToArchive,
                source_path: Path::new("/s/a.txt").to_path_buf(),
                destination_path: archive_root.join("a.txt"),
                relative_path: "a.txt".to_string(),
                reason: "copy into archive".to_string(),
            }],
        );

        let dest_dir = tempfile::tempdir().unwrap();
        let destination = dest_dir.path().join("restored/target/dir");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("a.txt"), "already here").unwrap();

        let result = run_restore(RestoreRequest {
            manifest_path: archive_root.join("manifest.json"),
            destination_root: destination.clone(),
            mode: RestoreMode::AddOnly,
            verification: VerificationMode::None,
            dry_run: false,
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(destination.join("a.txt")).unwrap(), "already here");
    }

    #[test]
    fn run_restore_dry_run_leaves_destination_untouched() {
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_root = archive_dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&archive_root).unwrap();
        fs::write(archive_root.join("a.txt"), "alpha").unwrap();
        write_source_manifest(
            &archive_root,
            vec![PlannedOperation {
                operation_type: OperationType::CopyFileToArchive,
                source_path: Path::new("/s/a.txt").to_path_buf(),
                destination_path: archive_root.join("a.txt"),
                relative_path: "a.txt".to_string(),
                reason: "copy into archive".to_string(),
            }],
        );

        let dest_dir = tempfile::tempdir().unwrap();
        let destination = dest_dir.path().join("restored/target/dir");

        let outcome = run_restore(RestoreRequest {
            manifest_path: archive_root.join("manifest.json"),
            destination_root: destination.clone(),
            mode: RestoreMode::Overwrite,
            verification: VerificationMode::None,
            dry_run: true,
        })
        .unwrap();

        assert_eq!(outcome.staged_count, 1);
        assert!(!destination.join("a.txt").exists());
    }
}
