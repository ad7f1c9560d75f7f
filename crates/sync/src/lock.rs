//! Cross-process sync lock and the debounce gate.

use crate::Result;
use anyhow::Context;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

/// Exclusive advisory lock on the sync lock file. Released on drop.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
    path: PathBuf,
}

#[derive(Debug)]
pub enum LockAttempt {
    Acquired(SyncLock),
    /// Another holder has the lock.
    Held,
}

impl LockAttempt {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

impl SyncLock {
    /// Takes the lock without blocking.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<LockAttempt> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "acquired sync lock");
                Ok(LockAttempt::Acquired(Self { file, path }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || is_contended(&e) => {
                tracing::debug!(path = %path.display(), "sync lock held elsewhere");
                Ok(LockAttempt::Held)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release sync lock");
        }
    }
}

/// True when the last sync finished less than `window` ago.
///
/// No recorded sync, or a timestamp in the future, never debounces.
pub fn should_debounce(last_sync: Option<OffsetDateTime>, window: Duration) -> bool {
    let Some(last) = last_sync else {
        return false;
    };
    let elapsed = OffsetDateTime::now_utc() - last;
    if elapsed.is_negative() {
        return false;
    }
    elapsed < window
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_reports_held_until_drop() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/sync.lock");

        let first = SyncLock::try_acquire(&path).unwrap();
        assert!(first.is_acquired());
        assert!(matches!(SyncLock::try_acquire(&path).unwrap(), LockAttempt::Held));

        drop(first);
        assert!(SyncLock::try_acquire(&path).unwrap().is_acquired());
    }

    #[test]
    fn debounce_window() {
        let window = Duration::from_secs(3);
        let now = OffsetDateTime::now_utc();
        assert!(!should_debounce(None, window));
        assert!(should_debounce(Some(now - time::Duration::seconds(1)), window));
        assert!(!should_debounce(Some(now - time::Duration::seconds(10)), window));
        assert!(!should_debounce(Some(now + time::Duration::seconds(60)), window));
    }
}
