use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::{info, warn};
use wcbt_core::clock::Clock;
use wcbt_core::error::lock_error;
use wcbt_core::paths::ProfilePaths;

const SCHEMA_LOCK_V1: &str = "wcbt_lock_v1";

/// On-disk contents of `work/locks/backup.lock` (spec §3 "Lock file").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    pub schema_version: String,
    pub profile_name: String,
    pub created_at_utc: String,
    pub hostname: String,
    pub pid: u32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Caller-supplied override flags for lock acquisition (spec §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireFlags {
    /// Break a lock that is provably stale (same host, dead PID).
    pub force: bool,
    /// Break any lock regardless of whether it is provably stale.
    pub break_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LockState {
    Absent,
    Held(LockFile),
    Stale(LockFile),
    Indeterminate,
}

fn lock_path(paths: &ProfilePaths) -> PathBuf {
    paths.work_root.join("locks").join("backup.lock")
}

fn read_lock_state(path: &Path, hostname: &str) -> LockState {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return LockState::Absent,
        Err(_) => return LockState::Indeterminate,
    };

    let lock: LockFile = match serde_json::from_str(&text) {
        Ok(lock) => lock,
        Err(_) => return LockState::Indeterminate,
    };

    if lock.hostname == hostname && pid_is_provably_dead(lock.pid) {
        LockState::Stale(lock)
    } else {
        LockState::Held(lock)
    }
}

/// Returns `true` only when the PID is provably not running. Any ambiguous
/// outcome (platform without a lookup mechanism, or a transient failure)
/// returns `false` so a lock is never mistakenly broken (spec §4.4).
fn pid_is_provably_dead(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_none()
}

fn current_hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string())
}

/// Coordinates exclusive access to a single profile's mutating pipeline
/// (backup, verify). See spec §4.4.
pub struct ProfileLock;

impl ProfileLock {
    /// Acquires the lock at `paths`, applying the state machine and
    /// acquisition policy table from spec §4.4. On success, returns a guard
    /// that releases the lock on every exit path, including panics that
    /// unwind through it.
    pub fn acquire(
        paths: &ProfilePaths,
        clock: &dyn Clock,
        command: &str,
        run_id: Option<String>,
        flags: AcquireFlags,
    ) -> Result<ProfileLockGuard, anyhow::Error> {
        let path = lock_path(paths);
        let hostname = current_hostname();

        match read_lock_state(&path, &hostname) {
            LockState::Absent => {}
            LockState::Stale(existing) => {
                if flags.force || flags.break_lock {
                    warn!(
                        profile = %paths.profile_name,
                        stale_pid = existing.pid,
                        "breaking stale profile lock"
                    );
                    let _ = fs::remove_file(&path);
                } else {
                    return Err(lock_error(format!(
                        "profile '{}' has a stale lock held by pid {} on {}; retry with --force",
                        paths.profile_name, existing.pid, existing.hostname
                    ))
                    .into());
                }
            }
            LockState::Held(existing) => {
                if flags.break_lock {
                    warn!(
                        profile = %paths.profile_name,
                        holder_pid = existing.pid,
                        "breaking held profile lock"
                    );
                    let _ = fs::remove_file(&path);
                } else {
                    return Err(lock_error(format!(
                        "profile '{}' is locked by pid {} on {} (command: {}); retry with --break-lock if you are certain it is not running",
                        paths.profile_name, existing.pid, existing.hostname, existing.command
                    ))
                    .into());
                }
            }
            LockState::Indeterminate => {
                if flags.break_lock {
                    warn!(profile = %paths.profile_name, "breaking unreadable profile lock");
                    let _ = fs::remove_file(&path);
                } else {
                    return Err(lock_error(format!(
                        "profile '{}' has an unreadable lock file; retry with --break-lock if you are certain no process holds it",
                        paths.profile_name
                    ))
                    .into());
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| lock_error(format!("creating lock directory: {e}")))?;
        }

        let lock = LockFile {
            schema_version: SCHEMA_LOCK_V1.to_string(),
            profile_name: paths.profile_name.clone(),
            created_at_utc: wcbt_core::clock::format_created_at_utc(clock.now()),
            hostname: hostname.clone(),
            pid: std::process::id(),
            command: command.to_string(),
            run_id,
        };

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                lock_error(format!(
                    "failed to acquire profile lock at {}: {e}",
                    path.display()
                ))
            })?;
        let bytes = serde_json::to_vec_pretty(&lock)
            .map_err(|e| lock_error(format!("serializing lock file: {e}")))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| lock_error(format!("writing lock file: {e}")))?;

        info!(profile = %paths.profile_name, pid = lock.pid, "profile lock acquired");
        Ok(ProfileLockGuard {
            path,
            holder: lock,
        })
    }
}

/// Releases the lock on drop. Holds the lock contents it wrote so release
/// can re-verify `(hostname, pid)` ownership before unlinking (spec §4.4).
pub struct ProfileLockGuard {
    path: PathBuf,
    holder: LockFile,
}

impl ProfileLockGuard {
    pub fn run_id(&self) -> Option<&str> {
        self.holder.run_id.as_deref()
    }

    fn release(&mut self) {
        let current = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return,
        };
        let Ok(current_lock) = serde_json::from_str::<LockFile>(&current) else {
            return;
        };
        if current_lock.hostname == self.holder.hostname && current_lock.pid == self.holder.pid {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for ProfileLockGuard {
    fn drop(&mut self) {
        self.release();
        info!(profile = %self.holder.profile_name, pid = self.holder.pid, "profile lock released");
    }
}

#[cfg(test)]
mod tests {
    use wcbt_core::clock::FixedClock;
    use wcbt_core::paths::resolve_profile_paths;

    use super::*;

    fn fixed_clock() -> FixedClock {
        FixedClock::new(time::macros::datetime!(2025-01-01 00:00:00 UTC))
    }

    #[test]
    fn acquire_then_release_leaves_no_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve_profile_paths("p", Some(dir.path())).unwrap();
        wcbt_core::paths::ensure_profile_directories(&paths).unwrap();

        let guard = ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, AcquireFlags::default())
            .unwrap();
        assert!(lock_path(&paths).exists());
        drop(guard);
        assert!(!lock_path(&paths).exists());
    }

    #[test]
    fn second_acquire_without_break_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve_profile_paths("p", Some(dir.path())).unwrap();
        wcbt_core::paths::ensure_profile_directories(&paths).unwrap();

        let _first = ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, AcquireFlags::default())
            .unwrap();
        let second = ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, AcquireFlags::default());
        assert!(second.is_err());
    }

    #[test]
    fn second_acquire_with_break_lock_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve_profile_paths("p", Some(dir.path())).unwrap();
        wcbt_core::paths::ensure_profile_directories(&paths).unwrap();

        let first = ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, AcquireFlags::default())
            .unwrap();
        let flags = AcquireFlags {
            force: false,
            break_lock: true,
        };
        let second = ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, flags);
        assert!(second.is_ok());
        // The first guard's drop must not unlink the second holder's lock:
        // it no longer owns the current file contents.
        drop(first);
        assert!(lock_path(&paths).exists());
    }

    #[test]
    fn stale_lock_with_dead_pid_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let paths = resolve_profile_paths("p", Some(dir.path())).unwrap();
        wcbt_core::paths::ensure_profile_directories(&paths).unwrap();

        let stale = LockFile {
            schema_version: SCHEMA_LOCK_V1.to_string(),
            profile_name: "p".to_string(),
            created_at_utc: "2020-01-01T00:00:00Z".to_string(),
            hostname: current_hostname(),
            pid: u32::MAX,
            command: "backup".to_string(),
            run_id: None,
        };
        let path = lock_path(&paths);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec_pretty(&stale).unwrap()).unwrap();

        let without_force =
            ProfileLock::acquire(&paths, &fixed_clock(), "backup", None, AcquireFlags::default());
        assert!(without_force.is_err());

        let with_force = ProfileLock::acquire(
            &paths,
            &fixed_clock(),
            "backup",
            None,
            AcquireFlags {
                force: true,
                break_lock: false,
            },
        );
        assert!(with_force.is_ok());
    }
}
