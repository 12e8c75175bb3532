//! Cross-process manifest lock.
//!
//! An advisory `fs2` lock on `manifest.json.lock` next to the manifest (the
//! project directory hosts the lockfile even before the manifest itself
//! exists). A holder that dies releases the OS lock automatically; a
//! lockfile whose mtime is past the staleness window is treated as
//! abandoned and broken.

use crate::error::{EngramError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Initial retry backoff.
const BACKOFF_START: Duration = Duration::from_millis(100);

/// Acquisition policy for the manifest file lock.
#[derive(Debug, Clone)]
pub struct ManifestLock {
    staleness: Duration,
    retries: u32,
}

impl Default for ManifestLock {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(30),
            retries: 5,
        }
    }
}

impl ManifestLock {
    pub fn new(staleness: Duration, retries: u32) -> Self {
        Self { staleness, retries }
    }

    /// Acquire the exclusive lock for a manifest path. Retries with
    /// exponential backoff; a stale lockfile is broken between attempts.
    pub async fn acquire(&self, manifest_path: &Path) -> Result<ManifestLockGuard> {
        let lock_path = lockfile_path(manifest_path);
        let parent = lock_path
            .parent()
            .ok_or_else(|| EngramError::ValidationFailed {
                reason: format!("manifest path has no parent: {}", manifest_path.display()),
            })?;
        if !parent.is_dir() {
            return Err(EngramError::FileNotFound { path: parent.to_path_buf() });
        }

        let mut backoff = BACKOFF_START;
        for attempt in 0..=self.retries {
            match self.try_acquire(&lock_path)? {
                Some(guard) => {
                    if attempt > 0 {
                        tracing::debug!(
                            path = %lock_path.display(),
                            attempt,
                            "manifest lock acquired after retry"
                        );
                    }
                    return Ok(guard);
                }
                None => {
                    self.break_if_stale(&lock_path);
                    if attempt < self.retries {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        tracing::warn!(path = %lock_path.display(), "manifest lock acquisition timed out");
        Err(EngramError::LockTimeout {
            what: format!("manifest at {}", manifest_path.display()),
        })
    }

    /// One non-blocking attempt. `Ok(None)` means the lock is held elsewhere.
    fn try_acquire(&self, lock_path: &Path) -> Result<Option<ManifestLockGuard>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| EngramError::io(lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                // Refresh mtime so other processes see a live holder.
                let _ = file.set_len(0);
                Ok(Some(ManifestLockGuard {
                    file,
                    path: lock_path.to_path_buf(),
                }))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(EngramError::io(lock_path, e)),
        }
    }

    /// Remove an abandoned lockfile so the next attempt can take over.
    fn break_if_stale(&self, lock_path: &Path) {
        let Ok(meta) = std::fs::metadata(lock_path) else {
            return;
        };
        let Ok(modified) = meta.modified() else {
            return;
        };
        let Ok(age) = modified.elapsed() else {
            return;
        };
        if age > self.staleness {
            tracing::warn!(
                path = %lock_path.display(),
                age_secs = age.as_secs(),
                "breaking stale manifest lockfile"
            );
            let _ = std::fs::remove_file(lock_path);
        }
    }
}

/// Held manifest lock; dropping unlocks.
#[derive(Debug)]
pub struct ManifestLockGuard {
    file: File,
    path: PathBuf,
}

impl ManifestLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "failed to unlock manifest lockfile: {e}");
        }
    }
}

/// `manifest.json` → `manifest.json.lock`.
fn lockfile_path(manifest_path: &Path) -> PathBuf {
    let mut name = manifest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "manifest.json".into());
    name.push(".lock");
    manifest_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        let lock = ManifestLock::default();

        let guard = lock.acquire(&manifest).await.unwrap();
        assert!(guard.path().ends_with("manifest.json.lock"));
        drop(guard);

        // Reacquirable after release.
        lock.acquire(&manifest).await.unwrap();
    }

    #[tokio::test]
    async fn missing_project_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("nope").join("manifest.json");
        let err = ManifestLock::default().acquire(&manifest).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
    }

    #[tokio::test]
    async fn contended_lock_times_out_within_process() {
        // Same-process contention uses a second file handle; fs2 locks are
        // per-handle, so this models a second process.
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");

        let holder = ManifestLock::default().acquire(&manifest).await.unwrap();

        let fast = ManifestLock::new(Duration::from_secs(120), 1);
        let err = fast.acquire(&manifest).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockTimeout);
        drop(holder);
    }

    #[tokio::test]
    async fn lockfile_lives_next_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        let _guard = ManifestLock::default().acquire(&manifest).await.unwrap();
        assert!(dir.path().join("manifest.json.lock").exists());
    }
}
