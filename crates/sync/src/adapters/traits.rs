//! Trait definition for target adapters.

use crate::result::{Category, SyncResult, TargetResults};
use crate::snapshot::{flatten_scoped, ConfigSnapshot, McpConfig, RuleFile, ScopedMcpEntry};
use crate::Result;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// Per-category view of items, keyed by item name, valued by a fingerprint.
///
/// Rules entries carry the full text instead of a fingerprint so previews
/// can show a line diff.
pub type ItemView = BTreeMap<Category, BTreeMap<String, String>>;

#[cfg(test)]
use mockall::automock;

/// Writes Claude Code configuration into one target CLI's native layout.
///
/// Per-category methods report item-level problems inside the returned
/// [`SyncResult`]; an `Err` means the whole category failed.
#[cfg_attr(test, automock)]
pub trait TargetAdapter: Send + Sync {
    /// Registry key, e.g. "codex".
    fn target_name(&self) -> &str;

    fn sync_rules(&self, rules: &[RuleFile]) -> Result<SyncResult>;

    fn sync_skills(&self, skills: &BTreeMap<String, PathBuf>) -> Result<SyncResult>;

    fn sync_agents(&self, agents: &BTreeMap<String, PathBuf>) -> Result<SyncResult>;

    fn sync_commands(&self, commands: &BTreeMap<String, PathBuf>) -> Result<SyncResult>;

    fn sync_mcp(&self, servers: &BTreeMap<String, McpConfig>) -> Result<SyncResult>;

    /// Scope-aware MCP sync. The default drops the metadata.
    fn sync_mcp_scoped(&self, servers: &BTreeMap<String, ScopedMcpEntry>) -> Result<SyncResult> {
        self.sync_mcp(&flatten_scoped(servers))
    }

    fn sync_settings(&self, settings: &serde_json::Map<String, serde_json::Value>)
        -> Result<SyncResult>;

    /// Files this adapter writes. Existing ones are backed up before a sync.
    fn managed_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Directories that may hold links created by this adapter.
    fn link_dirs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Categories whose source files this target's output depends on. Only
    /// these enter the target's drift baseline.
    fn source_categories(&self) -> Vec<Category> {
        Category::SYNC_ORDER.to_vec()
    }

    /// What the target currently holds.
    fn current_items(&self) -> ItemView {
        ItemView::new()
    }

    /// What a sync of `snapshot` would leave in the target.
    fn planned_items(&self, snapshot: &ConfigSnapshot) -> ItemView {
        let names = |m: &BTreeMap<String, PathBuf>| {
            m.keys().map(|k| (k.clone(), String::new())).collect()
        };
        let mut view = ItemView::new();
        view.insert(Category::Skills, names(&snapshot.skills));
        view.insert(Category::Agents, names(&snapshot.agents));
        view.insert(Category::Commands, names(&snapshot.commands));
        view.insert(
            Category::Mcp,
            snapshot
                .mcp_servers_scoped
                .keys()
                .map(|k| (k.clone(), String::new()))
                .collect(),
        );
        view
    }

    /// Runs every category; see [`sync_categories`].
    fn sync_all(&self, snapshot: &ConfigSnapshot) -> TargetResults {
        sync_categories(self, snapshot)
    }
}

/// Lays `planned` over `current`, category by category.
///
/// Syncs add and replace items but never prune, so anything already in the
/// target that the snapshot does not name stays in the planned view.
pub fn overlay_items(mut current: ItemView, planned: ItemView) -> ItemView {
    for (category, items) in planned {
        current.entry(category).or_default().extend(items);
    }
    current
}

/// Runs every category of `snapshot` through `adapter` in [`Category::SYNC_ORDER`].
///
/// A category that errors or panics becomes a single failure labelled with
/// the category; the remaining categories still run.
pub fn sync_categories<A: TargetAdapter + ?Sized>(
    adapter: &A,
    snapshot: &ConfigSnapshot,
) -> TargetResults {
    let mut results = TargetResults::new();
    for category in Category::SYNC_ORDER {
        let outcome = catch_unwind(AssertUnwindSafe(|| match category {
            Category::Rules => adapter.sync_rules(&snapshot.rule_files),
            Category::Skills => adapter.sync_skills(&snapshot.skills),
            Category::Agents => adapter.sync_agents(&snapshot.agents),
            Category::Commands => adapter.sync_commands(&snapshot.commands),
            Category::Mcp if !snapshot.mcp_servers_scoped.is_empty() => {
                adapter.sync_mcp_scoped(&snapshot.mcp_servers_scoped)
            }
            Category::Mcp => adapter.sync_mcp(&snapshot.mcp_servers),
            Category::Settings => adapter.sync_settings(&snapshot.settings),
            Category::Error => Ok(SyncResult::default()),
        }));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(
                    target = adapter.target_name(),
                    %category,
                    error = %e,
                    "category sync failed"
                );
                SyncResult::failure(category, format!("{e:#}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(
                    target = adapter.target_name(),
                    %category,
                    panic = %message,
                    "category sync panicked"
                );
                SyncResult::failure(category, message)
            }
        };
        results.insert(category, result);
    }
    results
}

/// Text of a panic payload, for failure messages.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "adapter panicked".to_string()
    }
}
