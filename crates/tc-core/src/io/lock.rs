//! Per-team, per-resource advisory file locking with backoff retry
//!
//! Lock files live at `teams/<team>/locks/<resource>.lock` and are created
//! on demand. Locks are exclusive, advisory, and scoped to this host; they
//! give no cross-host guarantee.
//!
//! When a critical section needs more than one resource, acquisition MUST
//! follow the global order `messages → events → acks → task-snapshots →
//! state-rehydrate → malformed-jsonl`. Inversion is forbidden. `dead-letter`
//! and `nudge-cooldown` sit outside the chain and are only ever nested inside
//! `messages` (dead-letter, by the delivery tick) or held alone.

use crate::io::error::StoreError;
use crate::paths::TeamPaths;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Contention attempts before giving up with `LockTimeout`.
pub const DEFAULT_LOCK_RETRIES: u32 = 5;

/// Longest single wait between acquisition attempts.
const BACKOFF_CAP: Duration = Duration::from_millis(1_000);

/// Lockable resources of one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResource {
    Messages,
    Events,
    Acks,
    TaskSnapshots,
    StateRehydrate,
    MalformedJsonl,
    DeadLetter,
    NudgeCooldown,
}

impl LockResource {
    pub fn file_name(self) -> &'static str {
        match self {
            LockResource::Messages => "messages.lock",
            LockResource::Events => "events.lock",
            LockResource::Acks => "acks.lock",
            LockResource::TaskSnapshots => "task-snapshots.lock",
            LockResource::StateRehydrate => "state-rehydrate.lock",
            LockResource::MalformedJsonl => "malformed-jsonl.lock",
            LockResource::DeadLetter => "dead-letter.lock",
            LockResource::NudgeCooldown => "nudge-cooldown.lock",
        }
    }
}

/// File lock guard that automatically releases on drop
pub struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Use fully qualified syntax to avoid unstable name collision warning
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquire the exclusive lock for one of a team's resources.
///
/// Creates `locks/` and the lock file on demand. Contended acquisition
/// retries with capped doubling waits (40ms, 80ms, ... up to 1s) and fails
/// with `StoreError::LockTimeout` once the retry budget is spent.
pub fn lock_resource(paths: &TeamPaths, resource: LockResource) -> Result<FileLock, StoreError> {
    let locks_dir = paths.locks_dir();
    std::fs::create_dir_all(&locks_dir).map_err(|e| StoreError::io(&locks_dir, e))?;
    acquire(&locks_dir.join(resource.file_name()), DEFAULT_LOCK_RETRIES)
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    let mut options = std::fs::OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    options.open(path).map_err(|e| StoreError::io(path, e))
}

/// One non-blocking probe of the advisory lock. `None` means contended.
fn probe_exclusive(file: &File) -> Option<std::io::Result<()>> {
    match file.try_lock_exclusive() {
        Ok(()) => Some(Ok(())),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
        Err(e) => Some(Err(e)),
    }
}

/// Wait before acquisition attempt `attempt`: doubles from 40ms, capped.
fn contention_backoff(attempt: u32) -> Duration {
    let doubled = Duration::from_millis(40u64.saturating_mul(1u64 << attempt.min(16)));
    doubled.min(BACKOFF_CAP)
}

fn acquire(path: &Path, max_retries: u32) -> Result<FileLock, StoreError> {
    let file = open_lock_file(path)?;

    let mut attempt = 0;
    loop {
        match probe_exclusive(&file) {
            Some(Ok(())) => return Ok(FileLock { file }),
            Some(Err(e)) => return Err(StoreError::io(path, e)),
            None => {
                if attempt == max_retries {
                    return Err(StoreError::LockTimeout {
                        path: path.to_path_buf(),
                        retries: max_retries,
                    });
                }
                std::thread::sleep(contention_backoff(attempt));
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn team(tmp: &TempDir) -> TeamPaths {
        TeamPaths::new(tmp.path(), "demo").unwrap()
    }

    #[test]
    fn test_lock_resource_creates_lock_file() {
        let tmp = TempDir::new().unwrap();
        let paths = team(&tmp);

        {
            let _lock = lock_resource(&paths, LockResource::Messages).unwrap();
            assert!(paths.locks_dir().join("messages.lock").exists());
        }

        // Released on drop; reacquire immediately
        let _lock = lock_resource(&paths, LockResource::Messages).unwrap();
    }

    #[test]
    fn test_lock_resource_file_names() {
        assert_eq!(LockResource::Messages.file_name(), "messages.lock");
        assert_eq!(LockResource::TaskSnapshots.file_name(), "task-snapshots.lock");
        assert_eq!(
            LockResource::StateRehydrate.file_name(),
            "state-rehydrate.lock"
        );
        assert_eq!(LockResource::NudgeCooldown.file_name(), "nudge-cooldown.lock");
    }

    #[test]
    fn test_distinct_resources_do_not_block_each_other() {
        let tmp = TempDir::new().unwrap();
        let paths = team(&tmp);

        // Holding messages must not delay events or acks
        let _messages = lock_resource(&paths, LockResource::Messages).unwrap();
        let _events = lock_resource(&paths, LockResource::Events).unwrap();
        let _acks = lock_resource(&paths, LockResource::Acks).unwrap();
    }

    #[test]
    fn test_contended_resource_waits_for_release() {
        let tmp = TempDir::new().unwrap();
        let paths = Arc::new(team(&tmp));
        let barrier = Arc::new(Barrier::new(2));

        let holder_paths = Arc::clone(&paths);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let _lock = lock_resource(&holder_paths, LockResource::TaskSnapshots).unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(100));
        });

        let waiter = thread::spawn(move || {
            barrier.wait();
            // Contended at first, then granted once the holder drops
            lock_resource(&paths, LockResource::TaskSnapshots).is_ok()
        });

        holder.join().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_contended_resource_times_out_while_held() {
        let tmp = TempDir::new().unwrap();
        let paths = team(&tmp);

        // Same process, separate file descriptions: the second acquisition
        // sees the advisory lock as contended and burns its retry budget
        let _held = lock_resource(&paths, LockResource::Events).unwrap();
        let result = lock_resource(&paths, LockResource::Events);
        match result {
            Err(StoreError::LockTimeout { path, retries }) => {
                assert!(path.ends_with("events.lock"));
                assert_eq!(retries, DEFAULT_LOCK_RETRIES);
            }
            Err(other) => panic!("expected LockTimeout, got {other:?}"),
            Ok(_) => panic!("expected LockTimeout, lock was granted"),
        }
    }

    #[test]
    fn test_contention_backoff_doubles_and_caps() {
        assert_eq!(contention_backoff(0), Duration::from_millis(40));
        assert_eq!(contention_backoff(1), Duration::from_millis(80));
        assert_eq!(contention_backoff(4), Duration::from_millis(640));
        // Capped from attempt 5 onward, and immune to shift overflow
        assert_eq!(contention_backoff(5), BACKOFF_CAP);
        assert_eq!(contention_backoff(63), BACKOFF_CAP);
    }
}
