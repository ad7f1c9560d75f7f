//! Per-category sync outcome counters.

use harnessync_state::{ItemCounts, SyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Configuration category an adapter result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Rules,
    Skills,
    Agents,
    Commands,
    Mcp,
    Settings,
    /// Adapter-level failure not attributable to a single category.
    Error,
}

impl Category {
    /// Order in which `sync_all` visits categories.
    pub const SYNC_ORDER: [Category; 6] = [
        Category::Rules,
        Category::Skills,
        Category::Agents,
        Category::Commands,
        Category::Mcp,
        Category::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Skills => "skills",
            Self::Agents => "agents",
            Self::Commands => "commands",
            Self::Mcp => "mcp",
            Self::Settings => "settings",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters plus the paths/messages behind them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Items that needed a format translation on the way.
    pub adapted: usize,
    pub synced_files: Vec<String>,
    pub skipped_files: Vec<String>,
    pub failed_files: Vec<String>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single failure labelled with where it happened.
    pub fn failure(label: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self {
            failed: 1,
            failed_files: vec![format!("{label}: {message}")],
            ..Self::default()
        }
    }

    pub fn record_synced(&mut self, item: impl Into<String>) {
        self.synced += 1;
        self.synced_files.push(item.into());
    }

    pub fn record_skipped(&mut self, item: impl Into<String>) {
        self.skipped += 1;
        self.skipped_files.push(item.into());
    }

    pub fn record_failed(&mut self, item: impl Into<String>) {
        self.failed += 1;
        self.failed_files.push(item.into());
    }

    /// Field-wise sum of counters and concatenation of lists.
    pub fn merge(mut self, other: SyncResult) -> SyncResult {
        self.synced += other.synced;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.adapted += other.adapted;
        self.synced_files.extend(other.synced_files);
        self.skipped_files.extend(other.skipped_files);
        self.failed_files.extend(other.failed_files);
        self
    }

    pub fn total(&self) -> usize {
        self.synced + self.skipped + self.failed
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_counts(self.synced, self.skipped, self.failed)
    }

    pub fn counts(&self) -> ItemCounts {
        ItemCounts {
            synced: self.synced,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

/// Results of one target's run, keyed by category.
pub type TargetResults = BTreeMap<Category, SyncResult>;

/// Sums all categories of one target.
pub fn combine(results: &TargetResults) -> SyncResult {
    results
        .values()
        .cloned()
        .fold(SyncResult::default(), SyncResult::merge)
}

/// Outcome of a best-effort cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn absorb(&mut self, other: CleanupReport) {
        self.removed += other.removed;
        self.warnings.extend(other.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_result() -> impl Strategy<Value = SyncResult> {
        (
            0usize..50,
            0usize..50,
            0usize..50,
            0usize..50,
            proptest::collection::vec("[a-z]{1,6}", 0..3),
            proptest::collection::vec("[a-z]{1,6}", 0..3),
            proptest::collection::vec("[a-z]{1,6}", 0..3),
        )
            .prop_map(
                |(synced, skipped, failed, adapted, synced_files, skipped_files, failed_files)| {
                    SyncResult {
                        synced,
                        skipped,
                        failed,
                        adapted,
                        synced_files,
                        skipped_files,
                        failed_files,
                    }
                },
            )
    }

    fn sorted(mut r: SyncResult) -> SyncResult {
        r.synced_files.sort();
        r.skipped_files.sort();
        r.failed_files.sort();
        r
    }

    proptest! {
        #[test]
        fn merge_is_associative(a in arb_result(), b in arb_result(), c in arb_result()) {
            let left = a.clone().merge(b.clone()).merge(c.clone());
            let right = a.merge(b.merge(c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn merge_is_commutative_up_to_list_order(a in arb_result(), b in arb_result()) {
            let ab = a.clone().merge(b.clone());
            let ba = b.merge(a);
            prop_assert_eq!(ab.counts(), ba.counts());
            prop_assert_eq!(ab.adapted, ba.adapted);
            prop_assert_eq!(sorted(ab), sorted(ba));
        }

        #[test]
        fn default_is_identity(a in arb_result()) {
            prop_assert_eq!(a.clone().merge(SyncResult::default()), a.clone());
            prop_assert_eq!(SyncResult::default().merge(a.clone()), a);
        }
    }

    #[test]
    fn status_follows_counters() {
        assert_eq!(SyncResult::default().status(), SyncStatus::Nothing);
        let failed = SyncResult::failure(Category::Mcp, "boom");
        assert_eq!(failed.status(), SyncStatus::Failed);
        assert_eq!(failed.failed_files, vec!["mcp: boom".to_string()]);

        let mut partial = failed.clone();
        partial.record_synced("AGENTS.md");
        assert_eq!(partial.status(), SyncStatus::Partial);

        let mut skipped_only = SyncResult::new();
        skipped_only.record_skipped("x: already linked");
        assert_eq!(skipped_only.status(), SyncStatus::Success);
    }

    #[test]
    fn combine_sums_categories() {
        let mut results = TargetResults::new();
        let mut rules = SyncResult::new();
        rules.record_synced("AGENTS.md");
        results.insert(Category::Rules, rules);
        results.insert(Category::Mcp, SyncResult::failure(Category::Mcp, "bad"));
        let total = combine(&results);
        assert_eq!((total.synced, total.failed), (1, 1));
    }
}
