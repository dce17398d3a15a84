use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Schema identifier embedded in every run manifest (`manifest.json`).
pub const SCHEMA_RUN_MANIFEST_V2: &str = "wcbt_run_manifest_v2";
/// Schema identifier embedded in `verify_report.json`.
pub const SCHEMA_VERIFY_REPORT_V1: &str = "wcbt_verify_report_v1";
/// Schema identifier embedded in each line of `verify_report.jsonl`.
pub const SCHEMA_VERIFY_RECORD_V1: &str = "wcbt_verify_record_v1";
/// Schema identifier embedded in `restore_plan.json`.
pub const SCHEMA_RESTORE_PLAN_V1: &str = "wcbt_restore_plan_v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

/// The type of a single planned file operation (spec §3, `PlannedOperation`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CopyFileToArchive,
    SkipUnsafePath,
}

/// The per-operation outcome recorded by the executor (spec §3, "Operation result").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Copied,
    SkippedNonCopyOperation,
    FailedInvariant,
    FailedIo,
}

/// Overall status of an execution or verification pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Per-operation verification outcome, additive to [`Outcome`] (spec §4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Failed,
    NotApplicable,
}

/// Fine-grained status behind a [`VerificationOutcome`], also used as the
/// per-line `status` field of `verify_report.jsonl`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Ok,
    Missing,
    Unreadable,
    HashMismatch,
}

/// One entry in a [`Plan`] (spec §3 `PlannedOperation`, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedOperation {
    pub operation_type: OperationType,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub relative_path: String,
    pub reason: String,
}

/// A non-fatal problem observed during traversal (spec §4.5 `ScanIssue`).
/// Serializes with exactly `path` and `message`; no further classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

/// The deterministic output of the planner, ready to be materialized or
/// embedded into a run manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Plan {
    pub operations: Vec<PlannedOperation>,
    pub scan_issues: Vec<ScanIssue>,
}

/// Additive per-operation verification detail (spec §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationDetail {
    pub hash_algorithm: HashAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of `manifest.json.operations` after execution (and, additively,
/// after verification). Spec §3 "Operation result".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResult {
    pub operation_index: usize,
    pub operation_type: OperationType,
    pub relative_path: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub outcome: Outcome,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_outcome: Option<VerificationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationDetail>,
}

/// `manifest.json.execution`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionBlock {
    pub status: RunStatus,
    pub results: Vec<OperationResult>,
}

/// `manifest.json.verification`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationSummary {
    pub status: RunStatus,
    pub hash_algorithm: HashAlgorithm,
    pub verified_count: usize,
    pub failed_count: usize,
    pub not_applicable_count: usize,
    pub total_verifiable_count: usize,
}

/// The canonical run manifest, schema `wcbt_run_manifest_v2` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunManifest {
    pub schema_version: String,
    pub run_id: String,
    pub created_at_utc: String,
    pub archive_root: PathBuf,
    pub plan_text_path: PathBuf,
    pub profile_name: String,
    pub source_root: PathBuf,
    pub operations: Vec<PlannedOperation>,
    pub scan_issues: Vec<ScanIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSummary>,
}

impl RunManifest {
    /// Rebuilds an index from `operation_index` to the execution result for
    /// that operation, used by the verifier (spec §4.9 step 2).
    pub fn execution_results_by_index(&self) -> std::collections::HashMap<usize, &OperationResult> {
        self.execution
            .iter()
            .flat_map(|execution| execution.results.iter())
            .map(|result| (result.operation_index, result))
            .collect()
    }
}
