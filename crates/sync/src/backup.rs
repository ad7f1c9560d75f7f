//! Timestamped backups of target files with LIFO rollback and retention.
//!
//! Layout: `<root>/<target>/<name>_<YYYYmmdd_HHMMSS>_<micros>/<name>`.

use crate::links::copy_tree;
use crate::result::CleanupReport;
use crate::Result;
use anyhow::Context;
use harnessync_state::{now, timestamp_slug};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One backed-up path and where its copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub original: PathBuf,
    /// Timestamped directory holding the copy under the original's name.
    pub backup_dir: PathBuf,
}

impl BackupEntry {
    fn content_path(&self) -> Option<PathBuf> {
        self.original.file_name().map(|n| self.backup_dir.join(n))
    }
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `path` (file or directory) into a fresh timestamped directory.
    /// Symlinks inside directories are kept as links.
    pub fn backup_target(&self, path: &Path, target: &str) -> Result<BackupEntry> {
        let name = path
            .file_name()
            .with_context(|| format!("Cannot back up {}: no file name", path.display()))?;
        let ts = now();
        let dir_name = format!(
            "{}_{}_{:06}",
            name.to_string_lossy(),
            timestamp_slug(ts),
            ts.microsecond()
        );
        let backup_dir = self.root.join(target).join(dir_name);
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed to create backup dir {}", backup_dir.display()))?;
        copy_tree(path, &backup_dir.join(name), true)
            .with_context(|| format!("Failed to back up {}", path.display()))?;
        tracing::debug!(
            target = %target,
            path = %path.display(),
            backup = %backup_dir.display(),
            "backed up"
        );
        Ok(BackupEntry {
            original: path.to_path_buf(),
            backup_dir,
        })
    }

    /// Restores entries newest first. Each failure is logged and reported;
    /// the remaining entries are still restored.
    pub fn rollback(&self, entries: &[BackupEntry]) -> Vec<String> {
        let mut warnings = Vec::new();
        for entry in entries.iter().rev() {
            if let Err(e) = restore(entry) {
                tracing::error!(
                    path = %entry.original.display(),
                    error = %format!("{e:#}"),
                    "rollback failed"
                );
                warnings.push(format!("{}: {e:#}", entry.original.display()));
            }
        }
        warnings
    }

    /// Keeps the `keep` newest backups for `target` by modification time and
    /// deletes the rest.
    pub fn cleanup_old_backups(&self, target: &str, keep: usize) -> CleanupReport {
        let mut report = CleanupReport::default();
        let dir = self.root.join(target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return report,
        };
        let mut backups: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| {
                let mtime = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (mtime, e.path())
            })
            .collect();
        // Names embed the timestamp, so they break mtime ties.
        backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        for (_, path) in backups.into_iter().skip(keep) {
            match fs::remove_dir_all(&path) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "could not delete old backup"
                    );
                    report.warnings.push(format!("{}: {e}", path.display()));
                }
            }
        }
        report
    }

    pub fn session(&self, target: impl Into<String>) -> BackupSession<'_> {
        BackupSession {
            manager: self,
            target: target.into(),
            entries: Vec::new(),
        }
    }
}

fn restore(entry: &BackupEntry) -> Result<()> {
    let content = entry
        .content_path()
        .with_context(|| format!("{} has no file name", entry.original.display()))?;
    if fs::symlink_metadata(&content).is_err() {
        tracing::warn!(backup = %content.display(), "backup content missing; skipping");
        return Ok(());
    }
    if let Ok(meta) = fs::symlink_metadata(&entry.original) {
        if meta.is_dir() {
            fs::remove_dir_all(&entry.original)
        } else {
            fs::remove_file(&entry.original)
        }
        .with_context(|| format!("Failed to remove {}", entry.original.display()))?;
    }
    copy_tree(&content, &entry.original, true)
        .with_context(|| format!("Failed to restore {}", entry.original.display()))?;
    tracing::info!(path = %entry.original.display(), "restored from backup");
    Ok(())
}

/// Backups taken for one target during one sync.
///
/// Dropping a session without calling [`BackupSession::rollback`] keeps the
/// files as they are.
pub struct BackupSession<'a> {
    manager: &'a BackupManager,
    target: String,
    entries: Vec<BackupEntry>,
}

impl BackupSession<'_> {
    /// Backs up `path` if it exists.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(());
        }
        let entry = self.manager.backup_target(path, &self.target)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    pub fn rollback(self) -> Vec<String> {
        tracing::warn!(target = %self.target, entries = self.entries.len(), "rolling back");
        self.manager.rollback(&self.entries)
    }

    /// Runs `f`; an `Err` restores every backup before being returned.
    pub fn run<T>(self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match f() {
            Ok(value) => Ok(value),
            Err(e) => {
                for warning in self.rollback() {
                    tracing::error!(warning = %warning, "rollback incomplete");
                }
                Err(e)
            }
        }
    }
}
