use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Conflict policy when a candidate's destination already exists (spec §3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreMode {
    AddOnly,
    Overwrite,
}

/// Staged-tree verification strategy (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    None,
    Size,
}

/// Per-candidate disposition, decided by destination existence and [`RestoreMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOperation {
    CopyNew,
    OverwriteExisting,
    SkipExisting,
}

/// One file to stage, derived from a source run manifest operation (spec §3 `RestoreCandidate`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreCandidate {
    pub operation_index: usize,
    pub relative_path: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub operation_type: CandidateOperation,
    pub reason: String,
}

/// `restore_plan.json`, schema `wcbt_restore_plan_v1` (spec §3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestorePlan {
    pub schema_version: String,
    pub execution_strategy: String,
    pub run_id: String,
    pub archive_root: PathBuf,
    pub destination_root: PathBuf,
    pub profile_name: String,
    pub mode: RestoreMode,
    pub verification: VerificationMode,
    pub source_manifest_sha256: String,
    pub source_operation_count: usize,
}

pub const SCHEMA_RESTORE_PLAN_V1: &str = wcbt_core::manifest::SCHEMA_RESTORE_PLAN_V1;
pub const EXECUTION_STRATEGY_STAGED_ATOMIC_REPLACE: &str = "staged_atomic_replace";

/// The scratch directory siblings `destination_root` that holds everything
/// for one restore attempt: `<destination>.parent>/<destination.name>.wcbt_stage/<run_id>/`.
pub fn stage_scratch_dir(destination_root: &Path, run_id: &str) -> PathBuf {
    let name = destination_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "restore".to_string());
    let parent = destination_root.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.wcbt_stage")).join(run_id)
}

/// The directory that mirrors `destination_root` while staging; this exact
/// directory is what gets renamed onto `destination_root` at promotion time
/// (spec §4.11, §4.13).
pub fn stage_root_path(destination_root: &Path, run_id: &str) -> PathBuf {
    stage_scratch_dir(destination_root, run_id).join("stage_root")
}

/// Restore artifacts directory for a non-dry-run attempt. Deliberately lives
/// *inside* the stage root so promotion's single rename carries the journal
/// and summaries into the destination along with the restored data (spec §4.15).
pub fn staged_artifacts_root(destination_root: &Path, run_id: &str) -> PathBuf {
    stage_root_path(destination_root, run_id)
        .join(".wcbt_restore")
        .join(run_id)
}

/// Restore artifacts directory for a dry-run attempt, which never creates a
/// stage tree at all.
pub fn dry_run_artifacts_root(destination_root: &Path, run_id: &str) -> PathBuf {
    destination_root.join(".wcbt_restore").join(run_id)
}

/// Where the previous contents of `target_root` are preserved during
/// promotion, so a crash mid-promotion never silently destroys prior data
/// (spec §4.13).
pub fn previous_root_path(target_root: &Path, run_id: &str) -> PathBuf {
    let name = target_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "restore".to_string());
    let parent = target_root.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".wcbt_restore_previous_{name}_{run_id}"))
}
