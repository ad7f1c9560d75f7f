//! Linking source directories into targets, with copy fallback and cleanup.
//!
//! A link is attempted first (symlink, then a directory junction on
//! Windows). When neither works the source is copied and a sibling marker
//! `.harnesssync-source-<name>.txt` records where the copy came from, so
//! later runs can tell a managed copy apart from user content.

use crate::result::CleanupReport;
use crate::Result;
use anyhow::Context;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MARKER_PREFIX: &str = ".harnesssync-source-";
const MARKER_SUFFIX: &str = ".txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// `dst` already resolved to `src`.
    Unchanged,
    Symlink,
    Junction,
    Copied,
}

impl LinkOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Symlink => "symlink",
            Self::Junction => "junction",
            Self::Copied => "copy",
        }
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker file path recording the source of a copied `dst`.
pub fn marker_path(dst: &Path) -> Option<PathBuf> {
    let name = dst.file_name()?.to_string_lossy();
    Some(dst.with_file_name(format!("{MARKER_PREFIX}{name}{MARKER_SUFFIX}")))
}

fn same_target(src: &Path, dst: &Path) -> bool {
    match (src.canonicalize(), dst.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Makes `dst` point at (or hold a copy of) `src`.
pub fn link_with_fallback(src: &Path, dst: &Path) -> Result<LinkOutcome> {
    let exists = fs::symlink_metadata(dst).is_ok();
    if exists {
        if fs::symlink_metadata(dst)?.file_type().is_symlink() && same_target(src, dst) {
            return Ok(LinkOutcome::Unchanged);
        }
        remove_any(dst).with_context(|| format!("Failed to replace {}", dst.display()))?;
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    match create_symlink(src, dst) {
        Ok(()) => {
            clear_marker(dst);
            return Ok(LinkOutcome::Symlink);
        }
        Err(e) => tracing::debug!(
            src = %src.display(),
            dst = %dst.display(),
            error = %e,
            "symlink failed"
        ),
    }

    if src.is_dir() && create_junction(src, dst).is_ok() {
        clear_marker(dst);
        return Ok(LinkOutcome::Junction);
    }

    copy_tree(src, dst, false)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    if let Some(marker) = marker_path(dst) {
        let canonical = src.canonicalize().unwrap_or_else(|_| src.to_path_buf());
        fs::write(&marker, canonical.to_string_lossy().as_bytes())
            .with_context(|| format!("Failed to write marker {}", marker.display()))?;
    }
    tracing::debug!(src = %src.display(), dst = %dst.display(), "linked by copy");
    Ok(LinkOutcome::Copied)
}

fn clear_marker(dst: &Path) {
    if let Some(marker) = marker_path(dst) {
        if marker.exists() {
            let _ = fs::remove_file(marker);
        }
    }
}

#[cfg(unix)]
fn create_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn create_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_src: &Path, _dst: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks not supported on this platform",
    ))
}

#[cfg(windows)]
fn create_junction(src: &Path, dst: &Path) -> std::io::Result<()> {
    let status = std::process::Command::new("cmd")
        .arg("/C")
        .arg("mklink")
        .arg("/J")
        .arg(dst)
        .arg(src)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other("mklink /J failed"))
    }
}

#[cfg(not(windows))]
fn create_junction(_src: &Path, _dst: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "junctions are Windows-only",
    ))
}

/// Copies `src` (file or directory) to `dst`.
///
/// With `preserve_links`, symlinks are recreated as links instead of being
/// followed.
pub(crate) fn copy_tree(src: &Path, dst: &Path, preserve_links: bool) -> std::io::Result<()> {
    let src_meta = if preserve_links {
        fs::symlink_metadata(src)?
    } else {
        fs::metadata(src)?
    };
    if !src_meta.is_dir() {
        if preserve_links && src_meta.file_type().is_symlink() {
            return copy_link(src, dst);
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(!preserve_links) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            copy_link(entry.path(), &target)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    let target = fs::read_link(src)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    create_symlink(&target, dst)
}

/// Removes broken symlinks and orphaned copy markers under `dir`, recursively.
pub fn cleanup_stale_links(dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    if !dir.is_dir() {
        return report;
    }
    let mut stale = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                report.warnings.push(format!("scan {}: {e}", dir.display()));
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_symlink() {
            if fs::metadata(path).is_err() {
                stale.push(path.to_path_buf());
            }
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(copied) = name
            .strip_prefix(MARKER_PREFIX)
            .and_then(|n| n.strip_suffix(MARKER_SUFFIX))
        {
            if fs::symlink_metadata(path.with_file_name(copied)).is_err() {
                stale.push(path.to_path_buf());
            }
        }
    }

    for path in stale {
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed stale link");
                report.removed += 1;
            }
            Err(e) => report
                .warnings
                .push(format!("{}: {e}", path.display())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn skill(root: &Path, name: &str) -> PathBuf {
        let dir = root.join("src").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SKILL.md"), format!("# {name}")).unwrap();
        dir
    }

    #[cfg(unix)]
    #[test]
    fn second_link_is_unchanged() {
        let tmp = tempdir().unwrap();
        let src = skill(tmp.path(), "alpha");
        let dst = tmp.path().join("out/alpha");

        assert_eq!(link_with_fallback(&src, &dst).unwrap(), LinkOutcome::Symlink);
        assert_eq!(link_with_fallback(&src, &dst).unwrap(), LinkOutcome::Unchanged);
        assert_eq!(fs::read_to_string(dst.join("SKILL.md")).unwrap(), "# alpha");
    }

    #[cfg(unix)]
    #[test]
    fn existing_directory_is_replaced() {
        let tmp = tempdir().unwrap();
        let src = skill(tmp.path(), "alpha");
        let dst = tmp.path().join("out/alpha");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale.txt"), "x").unwrap();

        assert_eq!(link_with_fallback(&src, &dst).unwrap(), LinkOutcome::Symlink);
        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
    }

    #[test]
    fn copy_tree_follows_links_when_asked() {
        let tmp = tempdir().unwrap();
        let src = skill(tmp.path(), "alpha");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/ref.md"), "ref").unwrap();
        let dst = tmp.path().join("copy");

        copy_tree(&src, &dst, false).unwrap();
        assert_eq!(fs::read_to_string(dst.join("nested/ref.md")).unwrap(), "ref");
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_preserves_links_when_asked() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("tree");
        fs::create_dir_all(&src).unwrap();
        fs::write(tmp.path().join("outside.md"), "o").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("outside.md"), src.join("link.md")).unwrap();

        let dst = tmp.path().join("copy");
        copy_tree(&src, &dst, true).unwrap();
        assert!(fs::symlink_metadata(dst.join("link.md"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_removes_broken_links_and_orphan_markers() {
        let tmp = tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(out.join("nested")).unwrap();

        let gone = skill(tmp.path(), "gone");
        std::os::unix::fs::symlink(&gone, out.join("gone")).unwrap();
        let kept = skill(tmp.path(), "kept");
        std::os::unix::fs::symlink(&kept, out.join("nested/kept")).unwrap();
        fs::remove_dir_all(&gone).unwrap();

        fs::write(out.join(".harnesssync-source-orphan.txt"), "/nowhere").unwrap();
        fs::create_dir_all(out.join("copied")).unwrap();
        fs::write(out.join(".harnesssync-source-copied.txt"), "/src/copied").unwrap();

        let report = cleanup_stale_links(&out);
        assert_eq!(report.removed, 2);
        assert!(report.warnings.is_empty());
        assert!(fs::symlink_metadata(out.join("gone")).is_err());
        assert!(out.join("nested/kept").exists());
        assert!(out.join(".harnesssync-source-copied.txt").exists());
        assert!(!out.join(".harnesssync-source-orphan.txt").exists());
    }

    #[test]
    fn marker_sits_next_to_destination() {
        assert_eq!(
            marker_path(Path::new("/t/.agents/skills/alpha")).unwrap(),
            PathBuf::from("/t/.agents/skills/.harnesssync-source-alpha.txt")
        );
    }
}
