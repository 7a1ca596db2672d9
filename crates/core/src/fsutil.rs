//! Filesystem discipline shared by configuration and registry persistence
//!
//! Two primitives live here: advisory file locks on a `<path>.lock`
//! sibling, and atomic writes (temp file, fsync, rename). Every
//! persistence path in the configuration store and the project registry
//! goes through these so that concurrent invocations serialize their
//! writes and a crash can never leave a half-written file behind.

use crate::errors::{ClawkerError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long to keep retrying lock acquisition before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between lock acquisition attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An acquired advisory lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive advisory lock on `<path>.lock`.
    ///
    /// Retries every 100 ms for up to 10 seconds, then fails with
    /// [`ClawkerError::LockTimeout`]. The caller may retry the whole
    /// operation.
    pub fn acquire(path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %lock_path.display(), "Acquired file lock");
                    return Ok(Self { file, lock_path });
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(_) => {
                    return Err(ClawkerError::LockTimeout {
                        path: lock_path.display().to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.lock_path.display(), error = %e, "Failed to release file lock");
        }
    }
}

/// The `<path>.lock` sibling used for advisory locking.
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".lock");
    path.with_file_name(name)
}

/// Write `contents` to `path` atomically: temp sibling, fsync, rename.
///
/// After a crash at any point the destination holds either its previous
/// content or the complete new content, never a partial write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(contents)?;
    tmp.sync_all()?;
    drop(tmp);

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Leave no stray temp file behind on failure.
            let _ = fs::remove_file(&tmp_path);
            Err(e.into())
        }
    }
}

/// Lock `path`, then run `f`. The lock is held for the duration of `f`
/// and released afterwards even if `f` errors.
pub fn with_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _lock = FileLock::acquire(path)?;
    f()
}
