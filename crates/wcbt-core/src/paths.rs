use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rand::Rng as _;

use crate::error::safety_violation;

const MIN_RESTORE_TARGET_DEPTH: usize = 3;

#[cfg(windows)]
const WINDOWS_SYSTEM_PREFIXES: &[&str] = &[
    r"c:\windows",
    r"c:\program files",
    r"c:\program files (x86)",
];

/// The fixed, per-profile directory layout. Every field is an absolute,
/// already-validated path; nothing downstream should re-derive these from
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePaths {
    pub profile_name: String,
    pub profile_root: PathBuf,
    pub work_root: PathBuf,
    pub manifests_root: PathBuf,
    pub archives_root: PathBuf,
    pub index_root: PathBuf,
    pub logs_root: PathBuf,
    pub live_snapshots_root: PathBuf,
}

/// Validates a profile name: non-empty, not `.`/`..`, no path separators,
/// no colons, no other reserved characters.
pub fn validate_profile_name(name: &str) -> Result<(), anyhow::Error> {
    if name.is_empty() {
        return Err(safety_violation("profile name must not be empty").into());
    }
    if name == "." || name == ".." {
        return Err(safety_violation("profile name must not be '.' or '..'").into());
    }
    if name.contains(['/', '\\', ':']) {
        return Err(safety_violation(format!(
            "profile name contains a path separator or colon: {name:?}"
        ))
        .into());
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(safety_violation(format!("profile name contains a control character: {name:?}")).into());
    }
    Ok(())
}

/// Resolves the data root: `LOCALAPPDATA` then `APPDATA` on Windows, an
/// explicit override wins over everything, otherwise a platform
/// project-directories convention, and finally a directory beside the
/// running executable as a last resort.
pub fn default_data_root() -> Result<PathBuf, anyhow::Error> {
    #[cfg(windows)]
    {
        if let Ok(p) = env::var("LOCALAPPDATA") {
            return Ok(PathBuf::from(p).join("wcbt"));
        }
        if let Ok(p) = env::var("APPDATA") {
            return Ok(PathBuf::from(p).join("wcbt"));
        }
    }

    if let Some(dirs) = ProjectDirs::from("io", "wcbt", "wcbt") {
        return Ok(dirs.data_local_dir().to_path_buf());
    }

    let exe = env::current_exe()?;
    let exe_dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;
    Ok(exe_dir.join("data"))
}

/// Resolves the fixed path set for a profile, given an optional data-root
/// override (tests always supply one explicitly).
pub fn resolve_profile_paths(
    profile_name: &str,
    data_root: Option<&Path>,
) -> Result<ProfilePaths, anyhow::Error> {
    validate_profile_name(profile_name)?;

    let data_root = match data_root {
        Some(p) => p.to_path_buf(),
        None => default_data_root()?,
    };

    let profile_root = data_root.join("profiles").join(profile_name);
    assert_within(&data_root, &profile_root)?;

    let work_root = profile_root.join("work");
    let manifests_root = profile_root.join("manifests");
    let archives_root = profile_root.join("archives");
    let index_root = profile_root.join("index");
    let logs_root = profile_root.join("logs");
    let live_snapshots_root = profile_root.join("live_snapshots");

    for child in [
        &work_root,
        &manifests_root,
        &archives_root,
        &index_root,
        &logs_root,
        &live_snapshots_root,
    ] {
        assert_within(&profile_root, child)?;
    }

    Ok(ProfilePaths {
        profile_name: profile_name.to_string(),
        profile_root,
        work_root,
        manifests_root,
        archives_root,
        index_root,
        logs_root,
        live_snapshots_root,
    })
}

/// Creates every directory in the profile layout, idempotently.
pub fn ensure_profile_directories(paths: &ProfilePaths) -> Result<(), anyhow::Error> {
    for dir in [
        &paths.work_root,
        &paths.manifests_root,
        &paths.archives_root,
        &paths.index_root,
        &paths.logs_root,
        &paths.live_snapshots_root,
    ] {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Asserts that `candidate` resolves to a path within `base`, without
/// requiring either to exist on disk (lexical containment check, since the
/// candidate frequently does not exist yet).
pub fn assert_within(base: &Path, candidate: &Path) -> Result<(), anyhow::Error> {
    let lexical_candidate = lexically_normalize(candidate);
    let lexical_base = lexically_normalize(base);
    if lexical_candidate.starts_with(&lexical_base) {
        Ok(())
    } else {
        Err(safety_violation(format!(
            "path escapes its base: base={} candidate={}",
            base.display(),
            candidate.display()
        ))
        .into())
    }
}

/// Lexically collapses `.` and `..` components without touching the
/// filesystem (unlike [`Path::canonicalize`], which requires the path to
/// exist).
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Validates a source directory for a backup run: must exist, must be a
/// directory, must not be a filesystem root.
pub fn validate_source_path(source: &Path) -> Result<PathBuf, anyhow::Error> {
    let metadata = fs::metadata(source)
        .map_err(|e| safety_violation(format!("source path does not exist: {}: {e}", source.display())))?;
    if !metadata.is_dir() {
        return Err(safety_violation(format!("source path is not a directory: {}", source.display())).into());
    }

    let resolved = source.canonicalize()?;
    if resolved.parent().is_none() {
        return Err(safety_violation(format!(
            "source path must not be a filesystem root: {}",
            resolved.display()
        ))
        .into());
    }
    Ok(resolved)
}

/// Validates a restore destination: absolute, minimum depth, not a
/// known-sensitive system prefix, not containing traversal segments.
pub fn validate_restore_target(target: &Path) -> Result<(), anyhow::Error> {
    if !target.is_absolute() {
        return Err(safety_violation(format!("restore destination must be absolute: {}", target.display())).into());
    }

    if target
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(safety_violation(format!(
            "restore destination contains traversal segments: {}",
            target.display()
        ))
        .into());
    }

    let depth = target
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .count();
    if depth < MIN_RESTORE_TARGET_DEPTH {
        return Err(safety_violation(format!(
            "restore destination is too shallow (minimum depth {MIN_RESTORE_TARGET_DEPTH}): {}",
            target.display()
        ))
        .into());
    }

    assert_not_system_path(target)?;
    Ok(())
}

#[cfg(windows)]
fn assert_not_system_path(target: &Path) -> Result<(), anyhow::Error> {
    let lower = target.to_string_lossy().to_ascii_lowercase();
    let trimmed = lower.trim_end_matches(['\\', '/']);

    if WINDOWS_SYSTEM_PREFIXES
        .iter()
        .any(|prefix| trimmed == *prefix || trimmed.starts_with(&format!("{prefix}\\")))
    {
        return Err(safety_violation(format!(
            "restore destination is a protected system path: {}",
            target.display()
        ))
        .into());
    }

    // Bare drive root, e.g. "c:\" or "c:".
    if trimmed.len() <= 2 && trimmed.ends_with(':') {
        return Err(safety_violation(format!(
            "restore destination is a bare drive root: {}",
            target.display()
        ))
        .into());
    }

    Ok(())
}

#[cfg(not(windows))]
fn assert_not_system_path(_target: &Path) -> Result<(), anyhow::Error> {
    // No POSIX system-prefix denylist is specified; depth and traversal
    // checks above still apply on every platform.
    Ok(())
}

/// Verifies a directory is writable by creating and removing a randomly
/// named probe file, without leaving anything behind on success or failure.
pub fn ensure_writable(dir: &Path) -> Result<(), anyhow::Error> {
    fs::create_dir_all(dir)?;

    let mut name = [0_u8; 16];
    rand::rng().fill_bytes(&mut name);
    let probe = dir.join(format!(".wcbt_write_test_{}", hex::encode(name)));

    OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&probe)?;
    fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_dot_profile_names() {
        assert!(validate_profile_name("").is_err());
        assert!(validate_profile_name(".").is_err());
        assert!(validate_profile_name("..").is_err());
    }

    #[test]
    fn rejects_separators_and_colons_in_profile_names() {
        assert!(validate_profile_name("a/b").is_err());
        assert!(validate_profile_name("a\\b").is_err());
        assert!(validate_profile_name("a:b").is_err());
    }

    #[test]
    fn resolve_profile_paths_derives_fixed_children() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve_profile_paths("home-laptop", Some(dir.path())).unwrap();
        assert_eq!(
            paths.archives_root,
            dir.path().join("profiles/home-laptop/archives")
        );
        assert_eq!(paths.work_root, dir.path().join("profiles/home-laptop/work"));
    }

    #[test]
    fn assert_within_rejects_escape_via_traversal() {
        let base = Path::new("/data/profiles/p");
        let escaped = Path::new("/data/profiles/p/../../../etc");
        assert!(assert_within(base, escaped).is_err());
    }

    #[test]
    fn assert_within_accepts_nested_child() {
        let base = Path::new("/data/profiles/p");
        let child = Path::new("/data/profiles/p/work/locks");
        assert!(assert_within(base, child).is_ok());
    }

    #[test]
    fn validate_restore_target_rejects_relative_path() {
        assert!(validate_restore_target(Path::new("relative/dest")).is_err());
    }

    #[test]
    fn validate_restore_target_rejects_shallow_path() {
        assert!(validate_restore_target(Path::new("/a")).is_err());
    }

    #[test]
    fn validate_restore_target_accepts_deep_absolute_path() {
        assert!(validate_restore_target(Path::new("/home/user/restore-dest")).is_ok());
    }

    #[cfg(windows)]
    #[test]
    fn validate_restore_target_rejects_windows_system_paths() {
        assert!(validate_restore_target(Path::new(r"C:\Windows\System32")).is_err());
        assert!(validate_restore_target(Path::new(r"C:\Program Files\App")).is_err());
        assert!(validate_restore_target(Path::new(r"C:\")).is_err());
    }

    #[test]
    fn ensure_writable_leaves_no_probe_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        ensure_writable(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
