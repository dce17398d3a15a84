use std::fs::{self, File};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wcbt_core::atomic_io::{JsonStyle, append_jsonl, write_json_atomic};
use wcbt_core::error::restore_stage_error;
use wcbt_core::manifest::RunStatus;

use crate::model::RestoreCandidate;

const COPY_CHUNK_SIZE: usize = 1024 * 1024;
/// Journal progress at the first, every 250th, and last candidate (spec §4.11).
const JOURNAL_STRIDE: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Copied,
    SkippedDryRun,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFileResult {
    pub operation_index: usize,
    pub relative_path: String,
    pub outcome: StageOutcome,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StageSummary {
    pub status: RunStatus,
    pub results: Vec<StageFileResult>,
}

/// Copies every candidate into `stage_root`, fail-fast on the first failure
/// (spec §4.11). Assumes the caller has already removed `skip_existing`
/// candidates (the add-only conflict policy is enforced upstream).
pub fn stage_candidates(
    candidates: &[RestoreCandidate],
    stage_root: &Path,
    artifacts_root: &Path,
    journal_path: &Path,
    dry_run: bool,
) -> Result<StageSummary, anyhow::Error> {
    let mut results = Vec::with_capacity(candidates.len());
    let mut status = RunStatus::Success;

    for (position, candidate) in candidates.iter().enumerate() {
        if should_journal(position, candidates.len()) {
            append_jsonl(
                journal_path,
                &serde_json::json!({
                    "event": "stage_progress",
                    "position": position,
                    "total": candidates.len(),
                    "relative_path": candidate.relative_path,
                }),
            )?;
        }

        if dry_run {
            results.push(StageFileResult {
                operation_index: candidate.operation_index,
                relative_path: candidate.relative_path.clone(),
                outcome: StageOutcome::SkippedDryRun,
                message: "dry run: no file copied".to_string(),
            });
            continue;
        }

        let stage_destination = stage_root.join(&candidate.relative_path);
        match copy_one(&candidate.source_path, &stage_destination) {
            Ok(()) => {
                results.push(StageFileResult {
                    operation_index: candidate.operation_index,
                    relative_path: candidate.relative_path.clone(),
                    outcome: StageOutcome::Copied,
                    message: "copied".to_string(),
                });
            }
            Err(err) => {
                warn!(
                    relative_path = %candidate.relative_path,
                    error = %err,
                    "stage copy failed; stopping"
                );
                results.push(StageFileResult {
                    operation_index: candidate.operation_index,
                    relative_path: candidate.relative_path.clone(),
                    outcome: StageOutcome::Failed,
                    message: err.to_string(),
                });
                status = RunStatus::Failed;
                break;
            }
        }
    }

    let summary = StageSummary { status, results };
    write_stage_artifacts(artifacts_root, &summary)?;

    info!(
        staged = summary.results.len(),
        total = candidates.len(),
        status = ?summary.status,
        "restore stage pass complete"
    );

    if summary.status == RunStatus::Failed {
        return Err(restore_stage_error("one or more candidates failed to stage; see stage_copy_results.jsonl").into());
    }
    Ok(summary)
}

fn should_journal(position: usize, total: usize) -> bool {
    position == 0 || (position + 1) % JOURNAL_STRIDE == 0 || position + 1 == total
}

fn copy_one(source: &Path, destination: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(destination);
    let _ = fs::remove_file(&tmp_path);

    {
        let mut reader = File::open(source)?;
        let mut writer = File::create(&tmp_path)?;
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
    }

    fs::rename(&tmp_path, destination)
}

fn tmp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".wcbt_tmp");
    destination.with_file_name(name)
}

fn write_stage_artifacts(artifacts_root: &Path, summary: &StageSummary) -> Result<(), anyhow::Error> {
    let results_path = artifacts_root.join("stage_copy_results.jsonl");
    let _ = fs::remove_file(&results_path);
    for result in &summary.results {
        append_jsonl(&results_path, &serde_json::to_value(result)?)?;
    }

    let summary_value = serde_json::json!({
        "status": summary.status,
        "staged_count": summary.results.iter().filter(|r| r.outcome == StageOutcome::Copied).count(),
        "failed_count": summary.results.iter().filter(|r| r.outcome == StageOutcome::Failed).count(),
        "skipped_dry_run_count": summary.results.iter().filter(|r| r.outcome == StageOutcome::SkippedDryRun).count(),
    });
    write_json_atomic(&artifacts_root.join("stage_copy_summary.json"), &summary_value, JsonStyle::Pretty)
}
