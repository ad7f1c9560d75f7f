//! Preview diffs for dry runs.
//!
//! Rules are shown as a unified line diff; every other category as the set
//! of added, removed and changed item names.

use crate::adapters::{ItemView, TargetAdapter};
use crate::result::Category;
use crate::snapshot::ConfigSnapshot;
use serde::Serialize;
use similar::TextDiff;
use std::collections::BTreeMap;

const NO_CHANGES: &str = "[no changes]";

/// Item names that differ between two views of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl KeyDiff {
    pub fn between(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Self {
        let mut diff = Self::default();
        for (key, value) in new {
            match old.get(key) {
                None => diff.added.push(key.clone()),
                Some(prev) if prev != value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        if self.is_empty() {
            return vec![NO_CHANGES.to_string()];
        }
        let mut lines = Vec::new();
        lines.extend(self.added.iter().map(|k| format!("  + added: {k}")));
        lines.extend(self.removed.iter().map(|k| format!("  - removed: {k}")));
        lines.extend(self.changed.iter().map(|k| format!("  ~ changed: {k}")));
        lines
    }
}

/// Accumulates labelled diff sections.
#[derive(Debug, Default)]
pub struct DiffFormatter {
    sections: Vec<String>,
}

impl DiffFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text_diff(&mut self, label: &str, old: &str, new: &str) {
        let body = unified_diff(label, old, new);
        self.sections.push(format!("--- {label} ---\n{body}"));
    }

    pub fn add_structural_diff(&mut self, label: &str, diff: &KeyDiff) {
        self.sections
            .push(format!("--- {label} ---\n{}", diff.lines().join("\n")));
    }

    pub fn format_output(&self) -> String {
        if self.sections.is_empty() {
            return "[no changes detected]".to_string();
        }
        self.sections.join("\n\n")
    }
}

/// Unified diff of `old` against `new`, or `[no changes]`.
pub fn unified_diff(label: &str, old: &str, new: &str) -> String {
    if old == new {
        return NO_CHANGES.to_string();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("current/{label}"), &format!("synced/{label}"))
        .to_string()
        .trim_end()
        .to_string()
}

/// What a sync would change in one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetPreview {
    pub target: String,
    pub changes: BTreeMap<Category, KeyDiff>,
    /// Human-readable rendering of every section.
    pub text: String,
}

impl TargetPreview {
    pub fn has_changes(&self) -> bool {
        self.changes.values().any(|d| !d.is_empty())
    }
}

/// Compares what `adapter` holds now with what syncing `snapshot` would leave.
/// Nothing is written.
pub fn preview<A: TargetAdapter + ?Sized>(adapter: &A, snapshot: &ConfigSnapshot) -> TargetPreview {
    let current = adapter.current_items();
    let mut planned = adapter.planned_items(snapshot);
    if !planned.contains_key(&Category::Rules) && !snapshot.rules.is_empty() {
        planned.insert(
            Category::Rules,
            BTreeMap::from([("rules".to_string(), snapshot.rules.clone())]),
        );
    }
    build_preview(adapter.target_name(), &current, &planned)
}

fn build_preview(target: &str, current: &ItemView, planned: &ItemView) -> TargetPreview {
    let empty = BTreeMap::new();
    let mut formatter = DiffFormatter::new();
    let mut changes = BTreeMap::new();

    for category in Category::SYNC_ORDER {
        let old = current.get(&category).unwrap_or(&empty);
        let new = planned.get(&category).unwrap_or(&empty);
        if old.is_empty() && new.is_empty() {
            continue;
        }
        let diff = KeyDiff::between(old, new);
        if category == Category::Rules {
            let mut labels: Vec<&String> = old.keys().chain(new.keys()).collect();
            labels.sort();
            labels.dedup();
            for label in labels {
                formatter.add_text_diff(
                    label,
                    old.get(label).map(String::as_str).unwrap_or(""),
                    new.get(label).map(String::as_str).unwrap_or(""),
                );
            }
        } else {
            formatter.add_structural_diff(category.as_str(), &diff);
        }
        changes.insert(category, diff);
    }

    TargetPreview {
        target: target.to_string(),
        changes,
        text: formatter.format_output(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(entries: &[(Category, &[(&str, &str)])]) -> ItemView {
        entries
            .iter()
            .map(|(c, items)| {
                (
                    *c,
                    items
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn key_diff_classifies_names() {
        let old = view(&[(Category::Mcp, &[("a", "1"), ("b", "1"), ("c", "1")])]);
        let new = view(&[(Category::Mcp, &[("b", "1"), ("c", "2"), ("d", "1")])]);
        let diff = KeyDiff::between(&old[&Category::Mcp], &new[&Category::Mcp]);
        assert_eq!(diff.added, vec!["d"]);
        assert_eq!(diff.removed, vec!["a"]);
        assert_eq!(diff.changed, vec!["c"]);
        assert_eq!(
            diff.lines(),
            vec!["  + added: d", "  - removed: a", "  ~ changed: c"]
        );
        assert_eq!(KeyDiff::default().lines(), vec!["[no changes]"]);
    }

    #[test]
    fn rules_render_as_unified_diff() {
        let current = view(&[(Category::Rules, &[("AGENTS.md", "keep\nold\n")])]);
        let planned = view(&[
            (Category::Rules, &[("AGENTS.md", "keep\nnew\n")]),
            (Category::Skills, &[("alpha", "h1")]),
        ]);
        let preview = build_preview("codex", &current, &planned);
        assert!(preview.has_changes());
        assert!(preview.text.contains("--- AGENTS.md ---"));
        assert!(preview.text.contains("-old"));
        assert!(preview.text.contains("+new"));
        assert!(preview.text.contains("--- skills ---\n  + added: alpha"));
        assert_eq!(preview.changes[&Category::Rules].changed, vec!["AGENTS.md"]);
    }

    #[test]
    fn identical_views_have_no_changes() {
        let same = view(&[
            (Category::Rules, &[("AGENTS.md", "x\n")]),
            (Category::Mcp, &[("srv", "h")]),
        ]);
        let preview = build_preview("codex", &same, &same);
        assert!(!preview.has_changes());
        assert!(preview.text.contains("--- AGENTS.md ---\n[no changes]"));
        assert!(preview.text.contains("--- mcp ---\n[no changes]"));

        let empty = build_preview("codex", &ItemView::new(), &ItemView::new());
        assert_eq!(empty.text, "[no changes detected]");
    }
}
