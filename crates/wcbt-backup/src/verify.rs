use std::path::Path;

use tracing::info;
use wcbt_core::atomic_io::{JsonStyle, append_jsonl, write_json_atomic, write_text_atomic};
use wcbt_core::error::verify_failed;
use wcbt_core::hashing::{DigestOutcome, digest_file};
use wcbt_core::manifest::{
    HashAlgorithm, OperationType, Outcome, RunManifest, RunStatus, SCHEMA_VERIFY_RECORD_V1,
    SCHEMA_VERIFY_REPORT_V1, VerificationDetail, VerificationOutcome, VerificationSummary, VerifyStatus,
};

use crate::materialize::write_manifest;

/// Digest-hashes every successfully copied archive payload against the
/// execution record, appends additive verification fields to the manifest,
/// and emits the three verify artifacts (spec §4.9).
pub fn verify(run_dir: &Path, manifest: &mut RunManifest) -> Result<(), anyhow::Error> {
    let results_by_index = manifest.execution_results_by_index();
    let algorithm = HashAlgorithm::Sha256;

    let mut verified_count = 0_usize;
    let mut failed_count = 0_usize;
    let mut not_applicable_count = 0_usize;
    let mut status_counts: std::collections::HashMap<VerifyStatus, usize> = std::collections::HashMap::new();
    let mut jsonl_records: Vec<(VerifyStatus, String)> = Vec::new();
    let mut verification_by_index: std::collections::HashMap<usize, (VerificationOutcome, VerificationDetail)> =
        std::collections::HashMap::new();

    for (index, op) in manifest.operations.iter().enumerate() {
        let exec_result = results_by_index.get(&index);
        let applicable =
            op.operation_type == OperationType::CopyFileToArchive && matches!(exec_result, Some(r) if r.outcome == Outcome::Copied);

        if !applicable {
            not_applicable_count += 1;
            verification_by_index.insert(
                index,
                (
                    VerificationOutcome::NotApplicable,
                    VerificationDetail {
                        hash_algorithm: algorithm,
                        digest_hex: None,
                        size_bytes: None,
                        error: None,
                    },
                ),
            );
            continue;
        }

        match digest_file(&op.destination_path, algorithm) {
            DigestOutcome::Ok { digest_hex, size_bytes } => {
                verified_count += 1;
                *status_counts.entry(VerifyStatus::Ok).or_insert(0) += 1;
                jsonl_records.push((VerifyStatus::Ok, op.relative_path.clone()));
                verification_by_index.insert(
                    index,
                    (
                        VerificationOutcome::Verified,
                        VerificationDetail {
                            hash_algorithm: algorithm,
                            digest_hex: Some(digest_hex),
                            size_bytes: Some(size_bytes),
                            error: None,
                        },
                    ),
                );
            }
            DigestOutcome::Missing => {
                failed_count += 1;
                *status_counts.entry(VerifyStatus::Missing).or_insert(0) += 1;
                jsonl_records.push((VerifyStatus::Missing, op.relative_path.clone()));
                verification_by_index.insert(
                    index,
                    (
                        VerificationOutcome::Failed,
                        VerificationDetail {
                            hash_algorithm: algorithm,
                            digest_hex: None,
                            size_bytes: None,
                            error: Some("archived file is missing".to_string()),
                        },
                    ),
                );
            }
            DigestOutcome::Unreadable(err) => {
                failed_count += 1;
                *status_counts.entry(VerifyStatus::Unreadable).or_insert(0) += 1;
                jsonl_records.push((VerifyStatus::Unreadable, op.relative_path.clone()));
                verification_by_index.insert(
                    index,
                    (
                        VerificationOutcome::Failed,
                        VerificationDetail {
                            hash_algorithm: algorithm,
                            digest_hex: None,
                            size_bytes: None,
                            error: Some(err.to_string()),
                        },
                    ),
                );
            }
        }
    }

    // Fold verification results into the manifest's execution results
    // rather than the plan operations: verification is additive to the
    // executor's per-operation record (spec §3 "Operation result").
    if let Some(execution) = manifest.execution.as_mut() {
        for result in execution.results.iter_mut() {
            if let Some((outcome, detail)) = verification_by_index.remove(&result.operation_index) {
                result.verification_outcome = Some(outcome);
                result.verification = Some(detail);
            }
        }
    }

    let total_verifiable_count = verified_count + failed_count;
    manifest.verification = Some(VerificationSummary {
        status: if failed_count == 0 { RunStatus::Success } else { RunStatus::Failed },
        hash_algorithm: algorithm,
        verified_count,
        failed_count,
        not_applicable_count,
        total_verifiable_count,
    });

    write_manifest(run_dir, manifest)?;

    write_verify_report(run_dir, manifest, &status_counts, verified_count, failed_count, not_applicable_count)?;
    write_verify_jsonl(run_dir, manifest, &jsonl_records)?;
    write_verify_summary(run_dir, manifest, verified_count, failed_count, not_applicable_count)?;

    info!(
        run_id = %manifest.run_id,
        verified = verified_count,
        failed = failed_count,
        not_applicable = not_applicable_count,
        "verification pass complete"
    );

    if failed_count > 0 {
        return Err(verify_failed(format!("{failed_count} file(s) failed verification")).into());
    }
    Ok(())
}

fn write_verify_report(
    run_dir: &Path,
    manifest: &RunManifest,
    status_counts: &std::collections::HashMap<VerifyStatus, usize>,
    verified: usize,
    failed: usize,
    not_applicable: usize,
) -> Result<(), anyhow::Error> {
    let value = serde_json::json!({
        "schema": SCHEMA_VERIFY_REPORT_V1,
        "run_id": manifest.run_id,
        "algorithm": HashAlgorithm::Sha256.as_str(),
        "verified": verified,
        "failed": failed,
        "not_applicable": not_applicable,
        "status_counts": {
            "ok": status_counts.get(&VerifyStatus::Ok).copied().unwrap_or(0),
            "missing": status_counts.get(&VerifyStatus::Missing).copied().unwrap_or(0),
            "unreadable": status_counts.get(&VerifyStatus::Unreadable).copied().unwrap_or(0),
            "hash_mismatch": status_counts.get(&VerifyStatus::HashMismatch).copied().unwrap_or(0),
        },
    });
    write_json_atomic(&run_dir.join("verify_report.json"), &value, JsonStyle::Pretty)
}

fn write_verify_jsonl(
    run_dir: &Path,
    manifest: &RunManifest,
    records: &[(VerifyStatus, String)],
) -> Result<(), anyhow::Error> {
    let path = run_dir.join("verify_report.jsonl");
    let _ = std::fs::remove_file(&path);
    for (status, relative_path) in records {
        let record = serde_json::json!({
            "schema": SCHEMA_VERIFY_RECORD_V1,
            "run_id": manifest.run_id,
            "status": status,
            "path": relative_path,
        });
        append_jsonl(&path, &record)?;
    }
    Ok(())
}

fn write_verify_summary(
    run_dir: &Path,
    manifest: &RunManifest,
    verified: usize,
    failed: usize,
    not_applicable: usize,
) -> Result<(), anyhow::Error> {
    let text = format!(
        "run_id: {}\nverified: {verified}\nfailed: {failed}\nnot_applicable: {not_applicable}\nstatus: {}\n",
        manifest.run_id,
        if failed == 0 { "success" } else { "failed" }
    );
    write_text_atomic(&run_dir.join("verify_summary.txt"), &text)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use wcbt_core::manifest::{ExecutionBlock, OperationResult, PlannedOperation, SCHEMA_RUN_MANIFEST_V2};

    use super::*;

    fn base_manifest(run_dir: &Path, relative_path: &str, destination: &Path) -> RunManifest {
        RunManifest {
            schema_version: SCHEMA_RUN_MANIFEST_V2.to_string(),
            run_id: "20250101_000000Z".to_string(),
            created_at_utc: "2025-01-01T00:00:00Z".to_string(),
            archive_root: run_dir.to_path_buf(),
            plan_text_path: run_dir.join("plan.txt"),
            profile_name: "p".to_string(),
            source_root: Path::new("/s").to_path_buf(),
            operations: vec![PlannedOperation {
                operation_type: OperationType::CopyFileToArchive,
                source_path: Path::new("/s").join(relative_path),
                destination_path: destination.to_path_buf(),
                relative_path: relative_path.to_string(),
                reason: "copy into archive".to_string(),
            }],
            scan_issues: vec![],
            execution: Some(ExecutionBlock {
                status: RunStatus::Success,
                results: vec![OperationResult {
                    operation_index: 0,
                    operation_type: OperationType::CopyFileToArchive,
                    relative_path: relative_path.to_string(),
                    source_path: Path::new("/s").join(relative_path),
                    destination_path: destination.to_path_buf(),
                    outcome: Outcome::Copied,
                    message: "copied".to_string(),
                    verification_outcome: None,
                    verification: None,
                }],
            }),
            verification: None,
        }
    }

    #[test]
    fn verify_succeeds_for_intact_file() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&run_dir).unwrap();
        let destination = run_dir.join("a.txt");
        fs::write(&destination, b"alpha").unwrap();

        let mut manifest = base_manifest(&run_dir, "a.txt", &destination);
        let result = verify(&run_dir, &mut manifest);
        assert!(result.is_ok());
        assert_eq!(manifest.verification.as_ref().unwrap().verified_count, 1);
        assert_eq!(manifest.verification.as_ref().unwrap().failed_count, 0);
        assert!(run_dir.join("verify_report.json").exists());
        assert!(run_dir.join("verify_report.jsonl").exists());
        assert!(run_dir.join("verify_summary.txt").exists());
    }

    #[test]
    fn verify_fails_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&run_dir).unwrap();
        let destination = run_dir.join("a.txt");
        // Intentionally never written to disk.

        let mut manifest = base_manifest(&run_dir, "a.txt", &destination);
        let result = verify(&run_dir, &mut manifest);
        assert!(result.is_err());
        assert_eq!(manifest.verification.as_ref().unwrap().failed_count, 1);

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join("verify_report.json")).unwrap()).unwrap();
        assert_eq!(report["status_counts"]["missing"], 1);
    }

    #[test]
    fn verify_marks_non_copy_and_failed_operations_not_applicable() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&run_dir).unwrap();

        let manifest = RunManifest {
            schema_version: SCHEMA_RUN_MANIFEST_V2.to_string(),
            run_id: "20250101_000000Z".to_string(),
            created_at_utc: "2025-01-01T00:00:00Z".to_string(),
            archive_root: run_dir.to_path_buf(),
            plan_text_path: run_dir.join("plan.txt"),
            profile_name: "p".to_string(),
            source_root: Path::new("/s").to_path_buf(),
            operations: vec![PlannedOperation {
                operation_type: OperationType::SkipUnsafePath,
                source_path: Path::new("/s/../evil").to_path_buf(),
                destination_path: run_dir.clone(),
                relative_path: "../evil".to_string(),
                reason: "unsafe".to_string(),
            }],
            scan_issues: vec![],
            execution: Some(ExecutionBlock {
                status: RunStatus::Success,
                results: vec![OperationResult {
                    operation_index: 0,
                    operation_type: OperationType::SkipUnsafePath,
                    relative_path: "../evil".to_string(),
                    source_path: Path::new("/s/../evil").to_path_buf(),
                    destination_path: run_dir.clone(),
                    outcome: Outcome::SkippedNonCopyOperation,
                    message: "operation type is not copy_file_to_archive".to_string(),
                    verification_outcome: None,
                    verification: None,
                }],
            }),
            verification: None,
        };
        let mut manifest = manifest;

        let result = verify(&run_dir, &mut manifest);
        assert!(result.is_ok());
        assert_eq!(manifest.verification.as_ref().unwrap().not_applicable_count, 1);
    }

    /// `VerifyStatus::HashMismatch` is part of the serialized taxonomy but is
    /// never produced by `verify()` in this schema version: no expected
    /// digest is recorded at plan/execute time to compare against, so a copy
    /// can only come back `ok`, `missing`, or `unreadable` (see DESIGN.md).
    /// This only exercises the type's round-trip, not `verify()` itself.
    #[test]
    fn hash_mismatch_status_is_constructible_but_unreachable_from_verify() {
        let value = serde_json::to_value(VerifyStatus::HashMismatch).unwrap();
        assert_eq!(value, serde_json::json!("hash_mismatch"));

        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("archives/20250101_000000Z");
        fs::create_dir_all(&run_dir).unwrap();
        let destination = run_dir.join("a.txt");
        fs::write(&destination, b"alpha").unwrap();

        let mut manifest = base_manifest(&run_dir, "a.txt", &destination);
        verify(&run_dir, &mut manifest).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join("verify_report.json")).unwrap()).unwrap();
        assert_eq!(report["status_counts"]["hash_mismatch"], 0);
    }
}
