use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wcbt_core::atomic_io::{JsonStyle, append_jsonl, write_json_atomic};
use wcbt_core::error::restore_verification_error;
use wcbt_core::manifest::RunStatus;

use crate::model::{RestoreCandidate, VerificationMode};

/// Journal progress at the first, every 500th, and last candidate (spec §4.12).
const JOURNAL_STRIDE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Verified,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageVerifyResult {
    pub operation_index: usize,
    pub relative_path: String,
    pub outcome: VerifyOutcome,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StageVerifySummary {
    pub status: RunStatus,
    pub results: Vec<StageVerifyResult>,
}

/// Verifies the staged tree against the archive source (spec §4.12). Mode
/// `none` records every candidate as `skipped` without touching the
/// filesystem; mode `size` compares byte sizes and aborts immediately on a
/// missing file on either side or a size mismatch.
pub fn verify_stage(
    candidates: &[RestoreCandidate],
    stage_root: &Path,
    artifacts_root: &Path,
    journal_path: &Path,
    mode: VerificationMode,
) -> Result<StageVerifySummary, anyhow::Error> {
    let mut results = Vec::with_capacity(candidates.len());
    let mut status = RunStatus::Success;

    for (position, candidate) in candidates.iter().enumerate() {
        if should_journal(position, candidates.len()) {
            append_jsonl(
                journal_path,
                &serde_json::json!({
                    "event": "verify_progress",
                    "position": position,
                    "total": candidates.len(),
                    "relative_path": candidate.relative_path,
                }),
            )?;
        }

        let outcome = match mode {
            VerificationMode::None => (VerifyOutcome::Skipped, "verification mode is none".to_string()),
            VerificationMode::Size => {
                let staged_path = stage_root.join(&candidate.relative_path);
                match (fs::metadata(&staged_path), fs::metadata(&candidate.source_path)) {
                    (Ok(staged_meta), Ok(source_meta)) if staged_meta.len() == source_meta.len() => {
                        (VerifyOutcome::Verified, "size matches archive source".to_string())
                    }
                    (Ok(staged_meta), Ok(source_meta)) => (
                        VerifyOutcome::Failed,
                        format!("size mismatch: staged={} source={}", staged_meta.len(), source_meta.len()),
                    ),
                    (Err(err), _) => (VerifyOutcome::Failed, format!("staged file missing or unreadable: {err}")),
                    (_, Err(err)) => (VerifyOutcome::Failed, format!("archive source missing or unreadable: {err}")),
                }
            }
        };

        let failed = outcome.0 == VerifyOutcome::Failed;
        results.push(StageVerifyResult {
            operation_index: candidate.operation_index,
            relative_path: candidate.relative_path.clone(),
            outcome: outcome.0,
            message: outcome.1,
        });

        if failed {
            warn!(relative_path = %candidate.relative_path, "stage verification failed; stopping");
            status = RunStatus::Failed;
            break;
        }
    }

    let summary = StageVerifySummary { status, results };
    write_verify_artifacts(artifacts_root, &summary)?;

    info!(
        verified = summary.results.len(),
        total = candidates.len(),
        status = ?summary.status,
        "restore verification pass complete"
    );

    if summary.status == RunStatus::Failed {
        return Err(restore_verification_error("staged tree failed verification; see stage_verify_results.jsonl").into());
    }
    Ok(summary)
}

fn should_journal(position: usize, total: usize) -> bool {
    position == 0 || (position + 1) % JOURNAL_STRIDE == 0 || position + 1 == total
}

fn write_verify_artifacts(artifacts_root: &Path, summary: &StageVerifySummary) -> Result<(), anyhow::Error> {
    let results_path = artifacts_root.join("stage_verify_results.jsonl");
    let _ = fs::remove_file(&results_path);
    for result in &summary.results {
        append_jsonl(&results_path, &serde_json::to_value(result)?)?;
    }

    let summary_value = serde_json::json!({
        "status": summary.status,
        "verified_count": summary.results.iter().filter(|r| r.outcome == VerifyOutcome::Verified).count(),
        "failed_count": summary.results.iter().filter(|r| r.outcome == VerifyOutcome::Failed).count(),
        "skipped_count": summary.results.iter().filter(|r| r.outcome == VerifyOutcome::Skipped).count(),
    });
    write_json_atomic(&artifacts_root.join("stage_verify_summary.json"), &summary_value, JsonStyle::Pretty)
}

#[cfg(test)]
mod tests {
    use crate::model::CandidateOperation;

    use super::*;

    fn candidate(relative_path: &str, source: &Path) -> RestoreCandidate {
        RestoreCandidate {
            operation_index: 0,
            relative_path: relative_path.to_string(),
            source_path: source.to_path_buf(),
            destination_path: std::path::PathBuf::from("/dest").join(relative_path),
            operation_type: CandidateOperation::CopyNew,
            reason: "destination does not exist".to_string(),
        }
    }

    #[test]
    fn verify_stage_mode_none_skips_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts_root = dir.path().join("artifacts");
        let journal_path = artifacts_root.join("journal.jsonl");
        let candidates = vec![candidate("a.txt", Path::new("/s/a.txt"))];

        let summary = verify_stage(&candidates, dir.path(), &artifacts_root, &journal_path, VerificationMode::None).unwrap();
        assert_eq!(summary.results[0].outcome, VerifyOutcome::Skipped);
    }

    #[test]
    fn verify_stage_mode_size_succeeds_for_matching_sizes() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("a.txt");
        fs::write(&source, b"alpha").unwrap();

        let stage_dir = tempfile::tempdir().unwrap();
        fs::write(stage_dir.path().join("a.txt"), b"alpha").unwrap();

        let artifacts_root = stage_dir.path().join("artifacts");
        let journal_path = artifacts_root.join("journal.jsonl");
        let candidates = vec![candidate("a.txt", &source)];

        let summary =
            verify_stage(&candidates, stage_dir.path(), &artifacts_root, &journal_path, VerificationMode::Size).unwrap();
        assert_eq!(summary.results[0].outcome, VerifyOutcome::Verified);
    }

    #[test]
    fn verify_stage_mode_size_fails_for_mismatched_sizes() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("a.txt");
        fs::write(&source, b"alpha").unwrap();

        let stage_dir = tempfile::tempdir().unwrap();
        fs::write(stage_dir.path().join("a.txt"), b"a").unwrap();

        let artifacts_root = stage_dir.path().join("artifacts");
        let journal_path = artifacts_root.join("journal.jsonl");
        let candidates = vec![candidate("a.txt", &source)];

        let result = verify_stage(&candidates, stage_dir.path(), &artifacts_root, &journal_path, VerificationMode::Size);
        assert!(result.is_err());
    }
}
