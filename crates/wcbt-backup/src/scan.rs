use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use wcbt_core::manifest::ScanIssue;

/// Directory names pruned from traversal by default (spec §4.5).
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".venv",
    ".git",
    "__pycache__",
    ".ruff_cache",
    ".mypy_cache",
    ".pytest_cache",
    ".idea",
    ".vscode",
    ".vs",
];

/// One file discovered by the scanner (spec §3 `SourceFileEntry`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileEntry {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub modified_epoch_secs: i64,
}

/// Caller-configurable exclusion rules for a single scan.
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub excluded_dirs: HashSet<String>,
    pub excluded_files: HashSet<String>,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            excluded_files: HashSet::new(),
        }
    }
}

/// The result of a traversal: deterministic entries plus non-fatal issues
/// (spec §4.5). The scanner never returns `Err`; callers that need to fail
/// fast inspect `issues` themselves.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub entries: Vec<SourceFileEntry>,
    pub issues: Vec<ScanIssue>,
}

/// Recursively walks `source_root`, producing entries and issues in
/// deterministic, lexicographically sorted order (spec §4.5): directory
/// entries are sorted at every level, never followed through symlinks, and
/// each symlink becomes an issue rather than an entry.
pub fn scan(source_root: &Path, rules: &ScanRules) -> ScanResult {
    let mut result = ScanResult::default();

    let mut walker = WalkDir::new(source_root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter();

    loop {
        let next = match walker.next() {
            Some(next) => next,
            None => break,
        };

        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| source_root.display().to_string());
                result.issues.push(ScanIssue {
                    path,
                    message: format!("Failed to stat: {err}"),
                });
                continue;
            }
        };

        if entry.path() == source_root {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();

        if entry.path_is_symlink() {
            result.issues.push(ScanIssue {
                path: entry.path().display().to_string(),
                message: "Skipped symlink/reparse point.".to_string(),
            });
            continue;
        }

        if entry.file_type().is_dir() {
            if rules.excluded_dirs.contains(&file_name) {
                walker.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        if rules.excluded_files.contains(&file_name) {
            continue;
        }

        let relative = match entry.path().strip_prefix(source_root) {
            Ok(rel) => rel,
            Err(_) => {
                result.issues.push(ScanIssue {
                    path: entry.path().display().to_string(),
                    message: "Computed relative path is not under the source root.".to_string(),
                });
                continue;
            }
        };
        let relative_path = relative.to_string_lossy().replace('\\', "/");

        if Path::new(&relative_path).is_absolute()
            || relative_path.split('/').any(|seg| seg == "." || seg == "..")
        {
            result.issues.push(ScanIssue {
                path: entry.path().display().to_string(),
                message: "Computed relative path is unsafe (absolute or contains '..').".to_string(),
            });
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                result.issues.push(ScanIssue {
                    path: entry.path().display().to_string(),
                    message: format!("Failed to stat: {err}"),
                });
                continue;
            }
        };

        let modified_epoch_secs = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        result.entries.push(SourceFileEntry {
            relative_path,
            absolute_path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified_epoch_secs,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn scan_finds_nested_files_in_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("b.txt"), "b");
        write_file(&dir.path().join("a.txt"), "a");
        write_file(&dir.path().join("nested/c.txt"), "c");

        let result = scan(dir.path(), &ScanRules::default());
        let paths: Vec<&str> = result.entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "nested/c.txt"]);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn scan_prunes_default_excluded_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(".git/HEAD"), "ref: refs/heads/main");
        write_file(&dir.path().join("keep.txt"), "keep");

        let result = scan(dir.path(), &ScanRules::default());
        let paths: Vec<&str> = result.entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn scan_skips_excluded_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("skip.log"), "noisy");
        write_file(&dir.path().join("keep.txt"), "keep");

        let mut rules = ScanRules::default();
        rules.excluded_files.insert("skip.log".to_string());

        let result = scan(dir.path(), &rules);
        let paths: Vec<&str> = result.entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn scan_reports_symlinks_as_issues_not_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("real.txt"), "real");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();

        let result = scan(dir.path(), &ScanRules::default());
        let paths: Vec<&str> = result.entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["real.txt"]);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].message.contains("symlink"));
    }
}
