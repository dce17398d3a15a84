use std::path::Path;

use wcbt_core::error::safety_violation;
use wcbt_core::manifest::{OperationType, Plan, PlannedOperation};
use wcbt_core::paths::assert_within;

use crate::scan::ScanResult;

/// Transforms a [`ScanResult`] into a deterministic, ordered [`Plan`] (spec
/// §4.6). Entries are sorted by `to_ascii_lowercase` of their relative path
/// (spec §9 design note: ASCII-only, matching the reference implementation)
/// so the plan order is stable even across filesystems with differing case
/// sensitivity.
pub fn plan(scan: &ScanResult, archive_root: &Path) -> Result<Plan, anyhow::Error> {
    let mut entries = scan.entries.clone();
    entries.sort_by(|a, b| {
        a.relative_path
            .to_ascii_lowercase()
            .cmp(&b.relative_path.to_ascii_lowercase())
    });

    let mut operations = Vec::with_capacity(entries.len());
    for entry in entries {
        let is_unsafe = Path::new(&entry.relative_path).is_absolute()
            || entry
                .relative_path
                .split('/')
                .any(|seg| seg == "." || seg == "..");

        if is_unsafe {
            operations.push(PlannedOperation {
                operation_type: OperationType::SkipUnsafePath,
                source_path: entry.absolute_path,
                destination_path: archive_root.to_path_buf(),
                relative_path: entry.relative_path,
                reason: "relative path is absolute or contains a traversal segment".to_string(),
            });
            continue;
        }

        let destination_path = archive_root.join(&entry.relative_path);
        assert_within(archive_root, &destination_path).map_err(|_| {
            safety_violation(format!(
                "planned destination escapes archive root: {}",
                destination_path.display()
            ))
        })?;

        operations.push(PlannedOperation {
            operation_type: OperationType::CopyFileToArchive,
            source_path: entry.absolute_path,
            destination_path,
            relative_path: entry.relative_path,
            reason: "copy into archive".to_string(),
        });
    }

    Ok(Plan {
        operations,
        scan_issues: scan.issues.clone(),
    })
}

/// Renders a human-readable plan report (the `plan.txt` artifact body; spec
/// §4.7). This is deliberately plain text, not the CLI's final rendering
/// surface, which the core treats as an external collaborator (spec §1).
pub fn render_plan_report(plan: &Plan, profile_name: &str, source_root: &Path, archive_root: &Path) -> String {
    let mut out = String::new();
    out.push_str(&format!("profile: {profile_name}\n"));
    out.push_str(&format!("source: {}\n", source_root.display()));
    out.push_str(&format!("archive: {}\n", archive_root.display()));
    out.push_str(&format!("operations: {}\n", plan.operations.len()));
    out.push_str(&format!("scan_issues: {}\n", plan.scan_issues.len()));
    out.push('\n');

    for op in &plan.operations {
        let verb = match op.operation_type {
            OperationType::CopyFileToArchive => "copy",
            OperationType::SkipUnsafePath => "skip",
        };
        out.push_str(&format!("{verb}\t{}\t{}\n", op.relative_path, op.reason));
    }

    if !plan.scan_issues.is_empty() {
        out.push_str("\nissues:\n");
        for issue in &plan.scan_issues {
            out.push_str(&format!("{}\t{}\n", issue.path, issue.message));
        }
    }

    out
}
