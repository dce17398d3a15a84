use std::fs;
use std::path::Path;

use tracing::info;
use wcbt_core::atomic_io::{JsonStyle, write_json_atomic, write_text_atomic};
use wcbt_core::clock::{Clock, format_created_at_utc};
use wcbt_core::error::materialization_error;
use wcbt_core::manifest::{Plan, RunManifest, SCHEMA_RUN_MANIFEST_V2};

/// Creates the run directory and writes `plan.txt` then `manifest.json`
/// (spec §4.7). `manifest.json` is guaranteed to never exist without
/// `plan.txt` already present, because it is always written second.
pub fn materialize(
    run_dir: &Path,
    run_id: &str,
    profile_name: &str,
    source_root: &Path,
    plan: &Plan,
    plan_report: &str,
    clock: &dyn Clock,
) -> Result<RunManifest, anyhow::Error> {
    if run_dir.exists() {
        return Err(materialization_error(format!(
            "run directory already exists: {}",
            run_dir.display()
        ))
        .into());
    }

    fs::create_dir_all(run_dir)
        .map_err(|e| materialization_error(format!("creating run directory {}: {e}", run_dir.display())))?;

    let plan_text_path = run_dir.join("plan.txt");
    write_text_atomic(&plan_text_path, plan_report)?;

    let manifest = RunManifest {
        schema_version: SCHEMA_RUN_MANIFEST_V2.to_string(),
        run_id: run_id.to_string(),
        created_at_utc: format_created_at_utc(clock.now()),
        archive_root: run_dir.to_path_buf(),
        plan_text_path,
        profile_name: profile_name.to_string(),
        source_root: source_root.to_path_buf(),
        operations: plan.operations.clone(),
        scan_issues: plan.scan_issues.clone(),
        execution: None,
        verification: None,
    };

    write_manifest(run_dir, &manifest)?;

    info!(
        run_id,
        operations = manifest.operations.len(),
        scan_issues = manifest.scan_issues.len(),
        "run materialized"
    );
    Ok(manifest)
}

/// Writes `manifest.json` atomically using the normative pretty form (spec
/// §4.3, §6): sorted keys, 2-space indent, trailing newline.
pub fn write_manifest(run_dir: &Path, manifest: &RunManifest) -> Result<(), anyhow::Error> {
    let value = serde_json::to_value(manifest)?;
    write_json_atomic(&run_dir.join("manifest.json"), &value, JsonStyle::Pretty)
}

/// Reads and parses `manifest.json` from a run directory.
pub fn read_manifest(run_dir: &Path) -> Result<RunManifest, anyhow::Error> {
    let value = wcbt_core::atomic_io::read_manifest_json(&run_dir.join("manifest.json"))?;
    Ok(serde_json::from_value(value)?)
}
