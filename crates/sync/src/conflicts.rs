//! Detects tracked files that changed since the last recorded sync.

use crate::hashing::hash_file;
use harnessync_state::StateManager;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub file_path: String,
    pub stored_hash: String,
    /// Empty when the file is gone.
    pub current_hash: String,
    pub target: String,
    pub kind: ConflictKind,
}

/// Compares stored per-target baselines against the files on disk.
pub struct ConflictDetector<'a> {
    state: &'a StateManager,
    account: Option<&'a str>,
}

fn digests_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl<'a> ConflictDetector<'a> {
    pub fn new(state: &'a StateManager, account: Option<&'a str>) -> Self {
        Self { state, account }
    }

    /// Conflicts for one target. A target never synced has none.
    pub fn check(&self, target: &str) -> Vec<Conflict> {
        let Some(stored) = self.state.target_state(target, self.account) else {
            return Vec::new();
        };
        let mut conflicts = Vec::new();
        for (path, stored_hash) in &stored.file_hashes {
            let current = hash_file(Path::new(path));
            let kind = if current.is_empty() {
                ConflictKind::Deleted
            } else if digests_equal(stored_hash, &current) {
                continue;
            } else {
                ConflictKind::Modified
            };
            conflicts.push(Conflict {
                file_path: path.clone(),
                stored_hash: stored_hash.clone(),
                current_hash: current,
                target: target.to_string(),
                kind,
            });
        }
        if !conflicts.is_empty() {
            tracing::info!(
                target = %target,
                count = conflicts.len(),
                "tracked files changed since last sync"
            );
        }
        conflicts
    }

    /// Conflicts per target; targets without any are omitted.
    pub fn check_all<S: AsRef<str>>(&self, targets: &[S]) -> BTreeMap<String, Vec<Conflict>> {
        targets
            .iter()
            .filter_map(|t| {
                let found = self.check(t.as_ref());
                (!found.is_empty()).then(|| (t.as_ref().to_string(), found))
            })
            .collect()
    }
}

pub fn format_warnings(conflicts: &BTreeMap<String, Vec<Conflict>>) -> String {
    let mut lines = Vec::new();
    for (target, found) in conflicts {
        if found.is_empty() {
            continue;
        }
        lines.push(format!(
            "\n⚠ {}: {} file(s) modified outside HarnessSync:",
            target.to_uppercase(),
            found.len()
        ));
        for c in found {
            let note = match c.kind {
                ConflictKind::Deleted => "deleted",
                ConflictKind::Modified => "modified",
            };
            lines.push(format!("  · {} ({note})", c.file_path));
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    lines.join("\n") + "\n\nThese changes will be overwritten. Run with --dry-run to preview changes."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_str;
    use harnessync_state::ItemCounts;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reports_modified_and_deleted_files() {
        let tmp = tempdir().unwrap();
        let kept = tmp.path().join("kept.md");
        let edited = tmp.path().join("edited.md");
        let removed = tmp.path().join("removed.md");
        for p in [&kept, &edited, &removed] {
            fs::write(p, "v1").unwrap();
        }
        let mut state = StateManager::open(tmp.path().join("state")).unwrap();
        let hashes = [&kept, &edited, &removed]
            .iter()
            .map(|p| (p.to_string_lossy().into_owned(), hash_str("v1")))
            .collect();
        state
            .record_sync("codex", "all", hashes, ItemCounts::default(), None)
            .unwrap();

        fs::write(&edited, "v2").unwrap();
        fs::remove_file(&removed).unwrap();

        let detector = ConflictDetector::new(&state, None);
        let found = detector.check("codex");
        assert_eq!(found.len(), 2);
        let by_path: BTreeMap<_, _> = found.iter().map(|c| (c.file_path.clone(), c)).collect();
        let deleted = by_path[&removed.to_string_lossy().into_owned()];
        assert_eq!(deleted.kind, ConflictKind::Deleted);
        assert_eq!(deleted.current_hash, "");
        assert_eq!(
            by_path[&edited.to_string_lossy().into_owned()].kind,
            ConflictKind::Modified
        );

        let all = detector.check_all(&["codex", "never-synced"]);
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["codex"]);
        let text = format_warnings(&all);
        assert!(text.contains("CODEX: 2 file(s) modified outside HarnessSync"));
        assert!(text.contains("(deleted)"));
        assert!(text.ends_with("Run with --dry-run to preview changes."));
    }

    #[test]
    fn no_baseline_means_no_conflicts() {
        let tmp = tempdir().unwrap();
        let state = StateManager::open(tmp.path()).unwrap();
        assert!(ConflictDetector::new(&state, None).check("codex").is_empty());
        assert_eq!(format_warnings(&BTreeMap::new()), "");
    }

    #[test]
    fn constant_time_compare_matches_equality() {
        assert!(digests_equal("abcd", "abcd"));
        assert!(!digests_equal("abcd", "abce"));
        assert!(!digests_equal("abcd", "abc"));
    }
}
