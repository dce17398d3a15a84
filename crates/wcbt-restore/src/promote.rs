use std::fs;
use std::path::Path;

use tracing::info;
use wcbt_core::error::promotion_error;

use crate::model::previous_root_path;

/// Atomically replaces `target_root` with `stage_root`, preserving any prior
/// contents of `target_root` at a sibling `.wcbt_restore_previous_*` path
/// (spec §4.13). Both renames are expected to be atomic within the same
/// parent directory.
pub fn promote(stage_root: &Path, target_root: &Path, run_id: &str) -> Result<(), anyhow::Error> {
    if !stage_root.is_dir() {
        return Err(promotion_error(format!("stage root is not a directory: {}", stage_root.display())).into());
    }
    if target_root.exists() && !target_root.is_dir() {
        return Err(promotion_error(format!("target root exists and is not a directory: {}", target_root.display())).into());
    }

    let previous_root = previous_root_path(target_root, run_id);
    if previous_root.exists() {
        return Err(promotion_error(format!(
            "previous-root path already exists, refusing to promote: {}",
            previous_root.display()
        ))
        .into());
    }

    let target_existed = target_root.exists();
    if target_existed {
        fs::rename(target_root, &previous_root).map_err(|e| {
            promotion_error(format!(
                "failed to move aside existing target {} -> {}: {e} (stage={} target={} previous=absent)",
                target_root.display(),
                previous_root.display(),
                stage_root.display(),
                target_root.display(),
            ))
        })?;
    }

    if let Err(err) = fs::rename(stage_root, target_root) {
        let previous_state = if previous_root.exists() { "present" } else { "absent" };
        return Err(promotion_error(format!(
            "failed to promote stage {} -> {}: {err} (stage=present target=absent previous={previous_state})",
            stage_root.display(),
            target_root.display(),
        ))
        .into());
    }

    info!(
        target = %target_root.display(),
        previous_preserved = target_existed,
        "restore promoted stage into target"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_into_fresh_target_renames_stage() {
        let dir = tempfile::tempdir().unwrap();
        let stage_root = dir.path().join("stage_root");
        std::fs::create_dir_all(&stage_root).unwrap();
        std::fs::write(stage_root.join("a.txt"), "alpha").unwrap();

        let target_root = dir.path().join("target");
        promote(&stage_root, &target_root, "run1").unwrap();

        assert!(target_root.join("a.txt").exists());
        assert!(!stage_root.exists());
    }

    #[test]
    fn promote_preserves_existing_target_contents() {
        let dir = tempfile::tempdir().unwrap();
        let stage_root = dir.path().join("stage_root");
        std::fs::create_dir_all(&stage_root).unwrap();
        std::fs::write(stage_root.join("new.txt"), "new").unwrap();

        let target_root = dir.path().join("target");
        std::fs::create_dir_all(&target_root).unwrap();
        std::fs::write(target_root.join("old.txt"), "old").unwrap();

        promote(&stage_root, &target_root, "run1").unwrap();

        assert!(target_root.join("new.txt").exists());
        assert!(!target_root.join("old.txt").exists());

        let previous_root = previous_root_path(&target_root, "run1");
        assert!(previous_root.join("old.txt").exists());
    }

    #[test]
    fn promote_fails_when_previous_root_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let stage_root = dir.path().join("stage_root");
        std::fs::create_dir_all(&stage_root).unwrap();

        let target_root = dir.path().join("target");
        std::fs::create_dir_all(&target_root).unwrap();

        let previous_root = previous_root_path(&target_root, "run1");
        std::fs::create_dir_all(&previous_root).unwrap();

        let result = promote(&stage_root, &target_root, "run1");
        assert!(result.is_err());
    }
}
