//! Versioned sync state with drift detection.
//!
//! The document lives at `~/.harnesssync/state.json`:
//!
//! ```json
//! {
//!   "version": 2,
//!   "last_sync": "2025-01-01T12:00:00Z",
//!   "targets": { "codex": { "status": "success", "file_hashes": { ... } } },
//!   "accounts": { "work": { "last_sync": "...", "targets": { ... }, "plugins": { ... } } },
//!   "plugins": { "context7": { "version": "1.0.0", "mcp_count": 1 } }
//! }
//! ```
//!
//! Flat `targets` and `accounts.<name>.targets` are separate storage
//! locations. A write with no account goes to the former, a write with an
//! account to the latter; they are never merged.

use crate::atomic::write_json_atomic;
use crate::env;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const SCHEMA_VERSION: u64 = 2;

/// Account that receives flat v1 targets during migration.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Outcome classification derived from item counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Nothing,
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    /// `nothing` when no item was processed, `success` when none failed,
    /// `failed` when none synced, otherwise `partial`.
    pub fn from_counts(synced: usize, skipped: usize, failed: usize) -> Self {
        if synced + skipped + failed == 0 {
            Self::Nothing
        } else if failed == 0 {
            Self::Success
        } else if synced == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated item counters for one target in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    #[serde(with = "crate::timestamp")]
    pub last_sync: OffsetDateTime,
    pub status: SyncStatus,
    pub scope: String,
    /// Source path -> digest, the baseline for the next drift computation.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub items_synced: usize,
    #[serde(default)]
    pub items_skipped: usize,
    #[serde(default)]
    pub items_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMeta {
    pub version: String,
    pub mcp_count: usize,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(with = "crate::timestamp")]
    pub last_sync: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(default, with = "crate::timestamp::option")]
    pub last_sync: Option<OffsetDateTime>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetState>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub version: u64,
    #[serde(default, with = "crate::timestamp::option")]
    pub last_sync: Option<OffsetDateTime>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetState>,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountState>,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginMeta>,
    /// Unversioned document found on disk, kept for reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<Value>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            last_sync: None,
            targets: BTreeMap::new(),
            accounts: BTreeMap::new(),
            plugins: BTreeMap::new(),
            migrated_from: None,
        }
    }
}

/// Why a plugin's metadata differs from the last recorded sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginDrift {
    Added,
    Removed,
    VersionChanged { from: String, to: String },
    McpCountChanged { from: usize, to: usize },
}

impl fmt::Display for PluginDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("added"),
            Self::Removed => f.write_str("removed"),
            Self::VersionChanged { from, to } => write!(f, "version_changed: {from} -> {to}"),
            Self::McpCountChanged { from, to } => write!(f, "mcp_count_changed: {from} -> {to}"),
        }
    }
}

/// Current UTC time.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// `YYYYmmdd_HHMMSS` rendering used in backup and quarantine file names.
pub fn timestamp_slug(ts: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

/// Reads the state document at `path`.
///
/// Returns the record and whether it was migrated from an older schema.
/// Persisting a migration is left to the caller. A missing file yields an
/// empty record; an unreadable document is moved aside and replaced by an
/// empty record.
pub fn load(path: &Path) -> Result<(StateRecord, bool)> {
    if !path.exists() {
        return Ok((StateRecord::default(), false));
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read state file: {}", path.display()))?;

    let mut value = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) if map.is_empty() => return Ok((StateRecord::default(), false)),
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            quarantine(path);
            return Ok((StateRecord::default(), false));
        }
    };

    let Some(version) = value.get("version").and_then(Value::as_u64) else {
        tracing::info!(path = %path.display(), "wrapping unversioned state document");
        let record = StateRecord {
            migrated_from: Some(value),
            ..StateRecord::default()
        };
        return Ok((record, true));
    };

    let migrated = version < SCHEMA_VERSION;
    if migrated {
        migrate_v1(&mut value);
        tracing::info!(
            path = %path.display(),
            "migrated v1 state to v2; existing targets copied into the '{DEFAULT_ACCOUNT}' account"
        );
    }

    match serde_json::from_value::<StateRecord>(value) {
        Ok(record) => Ok((record, migrated)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "state document has unexpected shape"
            );
            quarantine(path);
            Ok((StateRecord::default(), false))
        }
    }
}

fn migrate_v1(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    if !obj.contains_key("accounts") {
        let mut accounts = serde_json::Map::new();
        let targets = obj
            .get("targets")
            .filter(|t| t.as_object().is_some_and(|m| !m.is_empty()))
            .cloned();
        if let Some(targets) = targets {
            accounts.insert(
                DEFAULT_ACCOUNT.to_string(),
                serde_json::json!({
                    "last_sync": obj.get("last_sync").cloned().unwrap_or(Value::Null),
                    "targets": targets,
                }),
            );
        }
        obj.insert("accounts".into(), Value::Object(accounts));
    }
    obj.insert("version".into(), Value::from(SCHEMA_VERSION));
}

fn quarantine(path: &Path) {
    let backup = path.with_file_name(format!(
        "{}.bak.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".into()),
        timestamp_slug(now())
    ));
    match fs::rename(path, &backup) {
        Ok(()) => tracing::warn!(
            path = %path.display(),
            backup = %backup.display(),
            "state file was corrupt; moved aside and starting fresh"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "state file was corrupt and could not be moved aside"
        ),
    }
}

/// Owns the in-memory state document and its on-disk location.
#[derive(Debug)]
pub struct StateManager {
    path: PathBuf,
    state: StateRecord,
}

impl StateManager {
    /// Opens (or starts) the state file in `dir`. A schema migration found
    /// while loading is persisted before returning.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let path = dir.into().join("state.json");
        let (state, migrated) = load(&path)?;
        let manager = Self { path, state };
        if migrated {
            manager.save()?;
        }
        Ok(manager)
    }

    /// Opens the state file in the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(env::harnessync_dir()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &StateRecord {
        &self.state
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.state)
    }

    pub fn last_sync(&self) -> Option<OffsetDateTime> {
        self.state.last_sync
    }

    /// Stores the outcome of one target's run and persists it.
    pub fn record_sync(
        &mut self,
        target: &str,
        scope: &str,
        file_hashes: BTreeMap<String, String>,
        counts: ItemCounts,
        account: Option<&str>,
    ) -> Result<()> {
        let ts = now();
        let entry = TargetState {
            last_sync: ts,
            status: SyncStatus::from_counts(counts.synced, counts.skipped, counts.failed),
            scope: scope.to_string(),
            file_hashes,
            items_synced: counts.synced,
            items_skipped: counts.skipped,
            items_failed: counts.failed,
        };

        match account {
            Some(account) => {
                let acc = self.state.accounts.entry(account.to_string()).or_default();
                acc.targets.insert(target.to_string(), entry);
                acc.last_sync = Some(ts);
            }
            None => {
                self.state.targets.insert(target.to_string(), entry);
            }
        }
        self.state.last_sync = Some(ts);
        self.save()
    }

    /// Stored state for `target`, looked up in the account when one is given.
    pub fn target_state(&self, target: &str, account: Option<&str>) -> Option<&TargetState> {
        match account {
            Some(account) => self.account_target_status(account, target),
            None => self.target_status(target),
        }
    }

    pub fn target_status(&self, target: &str) -> Option<&TargetState> {
        self.state.targets.get(target)
    }

    pub fn account_target_status(&self, account: &str, target: &str) -> Option<&TargetState> {
        self.state.accounts.get(account)?.targets.get(target)
    }

    pub fn account_status(&self, account: &str) -> Option<&AccountState> {
        self.state.accounts.get(account)
    }

    pub fn accounts(&self) -> Vec<String> {
        self.state.accounts.keys().cloned().collect()
    }

    /// Paths added, changed or removed relative to the stored baseline.
    ///
    /// Without a stored baseline every current path counts as drifted.
    pub fn detect_drift(
        &self,
        target: &str,
        current: &BTreeMap<String, String>,
        account: Option<&str>,
    ) -> Vec<String> {
        let Some(stored) = self.target_state(target, account) else {
            return current.keys().cloned().collect();
        };
        let stored = &stored.file_hashes;

        let mut drifted: Vec<String> = current
            .iter()
            .filter(|(path, hash)| stored.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect();
        drifted.extend(
            stored
                .keys()
                .filter(|path| !current.contains_key(*path))
                .cloned(),
        );
        drifted.sort();
        drifted
    }

    /// Removes a flat target entry. Returns whether anything was removed.
    pub fn clear_target(&mut self, target: &str) -> Result<bool> {
        if self.state.targets.remove(target).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Replaces the plugin section wholesale so plugins that disappeared
    /// from discovery do not linger.
    pub fn record_plugin_sync(
        &mut self,
        plugins: BTreeMap<String, PluginMeta>,
        account: Option<&str>,
    ) -> Result<()> {
        match account {
            Some(account) => {
                self.state
                    .accounts
                    .entry(account.to_string())
                    .or_default()
                    .plugins = plugins;
            }
            None => self.state.plugins = plugins,
        }
        self.save()
    }

    pub fn plugin_status(&self, account: Option<&str>) -> BTreeMap<String, PluginMeta> {
        match account {
            Some(account) => self
                .state
                .accounts
                .get(account)
                .map(|a| a.plugins.clone())
                .unwrap_or_default(),
            None => self.state.plugins.clone(),
        }
    }

    /// One reason per drifted plugin; a version change masks a count change.
    pub fn detect_plugin_drift(
        &self,
        current: &BTreeMap<String, PluginMeta>,
        account: Option<&str>,
    ) -> BTreeMap<String, PluginDrift> {
        let stored = self.plugin_status(account);
        let mut drift = BTreeMap::new();

        for name in stored.keys() {
            if !current.contains_key(name) {
                drift.insert(name.clone(), PluginDrift::Removed);
            }
        }

        for (name, meta) in current {
            let Some(old) = stored.get(name) else {
                drift.insert(name.clone(), PluginDrift::Added);
                continue;
            };
            if old.version != meta.version {
                drift.insert(
                    name.clone(),
                    PluginDrift::VersionChanged {
                        from: old.version.clone(),
                        to: meta.version.clone(),
                    },
                );
            } else if old.mcp_count != meta.mcp_count {
                drift.insert(
                    name.clone(),
                    PluginDrift::McpCountChanged {
                        from: old.mcp_count,
                        to: meta.mcp_count,
                    },
                );
            }
        }
        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hashes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn plugin(version: &str, count: usize) -> PluginMeta {
        PluginMeta {
            version: version.into(),
            mcp_count: count,
            mcp_servers: (0..count).map(|i| format!("srv-{i}")).collect(),
            last_sync: now(),
        }
    }

    #[test]
    fn status_from_counts() {
        assert_eq!(SyncStatus::from_counts(0, 0, 0), SyncStatus::Nothing);
        assert_eq!(SyncStatus::from_counts(0, 3, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(2, 0, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(0, 1, 2), SyncStatus::Failed);
        assert_eq!(SyncStatus::from_counts(1, 0, 1), SyncStatus::Partial);
    }

    #[test]
    fn round_trip_preserves_hashes_and_counters() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        let counts = ItemCounts {
            synced: 4,
            skipped: 1,
            failed: 0,
        };
        mgr.record_sync(
            "codex",
            "all",
            hashes(&[("/a", "111"), ("/b", "222")]),
            counts,
            None,
        )
        .unwrap();

        let reloaded = StateManager::open(tmp.path()).unwrap();
        let target = reloaded.target_status("codex").unwrap();
        assert_eq!(target.file_hashes, hashes(&[("/a", "111"), ("/b", "222")]));
        assert_eq!(target.items_synced, 4);
        assert_eq!(target.items_skipped, 1);
        assert_eq!(target.status, SyncStatus::Success);
        assert_eq!(reloaded.record(), mgr.record());
    }

    #[test]
    fn v1_document_is_migrated_once_and_persisted() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state.json");
        let v1 = serde_json::json!({
            "version": 1,
            "last_sync": "2024-05-01T10:00:00Z",
            "targets": {
                "codex": {
                    "last_sync": "2024-05-01T10:00:00Z",
                    "status": "success",
                    "scope": "all",
                    "file_hashes": {"/x": "abc"},
                    "items_synced": 1,
                    "items_skipped": 0,
                    "items_failed": 0
                }
            }
        });
        fs::write(&path, serde_json::to_string(&v1).unwrap()).unwrap();

        let (_, migrated) = load(&path).unwrap();
        assert!(migrated);

        let mgr = StateManager::open(tmp.path()).unwrap();
        assert_eq!(mgr.record().version, SCHEMA_VERSION);
        let default = mgr.account_target_status(DEFAULT_ACCOUNT, "codex").unwrap();
        assert_eq!(default.file_hashes, hashes(&[("/x", "abc")]));
        // Flat targets are kept alongside the copy.
        assert!(mgr.target_status("codex").is_some());

        let (again, migrated_again) = load(&path).unwrap();
        assert!(!migrated_again);
        assert_eq!(again.version, SCHEMA_VERSION);
    }

    #[test]
    fn v1_document_with_naive_timestamps_migrates() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state.json");
        let v1 = serde_json::json!({
            "version": 1,
            "last_sync": "2024-01-01T12:00:00.123456",
            "targets": {
                "codex": {
                    "last_sync": "2024-01-01T12:00:00.123456",
                    "status": "partial",
                    "scope": "user",
                    "file_hashes": {"/home/u/.claude/CLAUDE.md": "abc"},
                    "sync_method": {"/home/u/.claude/CLAUDE.md": "copy"},
                    "items_synced": 3,
                    "items_skipped": 0,
                    "items_failed": 1
                }
            },
            "plugins": {
                "context7": {
                    "version": "1.0.0",
                    "mcp_count": 1,
                    "mcp_servers": ["context7"],
                    "last_sync": "2024-01-01T11:59:59"
                }
            }
        });
        fs::write(&path, serde_json::to_string(&v1).unwrap()).unwrap();

        let mgr = StateManager::open(tmp.path()).unwrap();
        let default = mgr.account_target_status(DEFAULT_ACCOUNT, "codex").unwrap();
        assert_eq!(default.status, SyncStatus::Partial);
        assert_eq!(default.items_failed, 1);
        assert_eq!(
            default.file_hashes,
            hashes(&[("/home/u/.claude/CLAUDE.md", "abc")])
        );
        assert_eq!(default.last_sync.offset(), time::UtcOffset::UTC);
        assert_eq!(default.last_sync.microsecond(), 123_456);
        assert!(mgr.target_status("codex").is_some());
        assert_eq!(mgr.record().plugins["context7"].version, "1.0.0");

        // Loaded in place, not quarantined; written back in RFC 3339.
        let backups = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("state.json.bak."))
            .count();
        assert_eq!(backups, 0);
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("2024-01-01T12:00:00.123456Z"));
        assert!(!saved.contains("sync_method"));
    }

    #[test]
    fn unversioned_document_is_wrapped() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, r#"{"last_sync": "yesterday", "hashes": {}}"#).unwrap();

        let (record, migrated) = load(&path).unwrap();
        assert!(migrated);
        assert!(record.targets.is_empty());
        assert_eq!(
            record.migrated_from.as_ref().unwrap()["last_sync"],
            "yesterday"
        );
    }

    #[test]
    fn corrupt_document_is_moved_aside() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "{ this is not json").unwrap();

        let (record, migrated) = load(&path).unwrap();
        assert!(!migrated);
        assert_eq!(record, StateRecord::default());
        assert!(!path.exists());
        let moved = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("state.json.bak."));
        assert!(moved);
    }

    #[test]
    fn flat_and_account_targets_stay_separate() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        mgr.record_sync(
            "codex",
            "all",
            hashes(&[("/flat", "1")]),
            ItemCounts::default(),
            None,
        )
        .unwrap();
        mgr.record_sync(
            "codex",
            "user",
            hashes(&[("/work", "2")]),
            ItemCounts::default(),
            Some("work"),
        )
        .unwrap();

        assert_eq!(
            mgr.target_status("codex").unwrap().file_hashes,
            hashes(&[("/flat", "1")])
        );
        assert_eq!(
            mgr.account_target_status("work", "codex")
                .unwrap()
                .file_hashes,
            hashes(&[("/work", "2")])
        );
        assert_eq!(mgr.accounts(), vec!["work".to_string()]);
        assert!(mgr.account_status("work").unwrap().last_sync.is_some());
    }

    #[test]
    fn drift_is_symmetric_difference() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        mgr.record_sync(
            "codex",
            "all",
            hashes(&[("/same", "1"), ("/changed", "2"), ("/removed", "3")]),
            ItemCounts::default(),
            None,
        )
        .unwrap();

        let current = hashes(&[("/same", "1"), ("/changed", "9"), ("/added", "4")]);
        assert_eq!(
            mgr.detect_drift("codex", &current, None),
            vec![
                "/added".to_string(),
                "/changed".to_string(),
                "/removed".to_string()
            ]
        );
    }

    #[test]
    fn drift_without_baseline_reports_everything() {
        let tmp = tempdir().unwrap();
        let mgr = StateManager::open(tmp.path()).unwrap();
        let current = hashes(&[("/a", "1"), ("/b", "2")]);
        assert_eq!(mgr.detect_drift("gemini", &current, None).len(), 2);
        assert_eq!(mgr.detect_drift("gemini", &current, Some("work")).len(), 2);
    }

    #[test]
    fn plugin_section_is_replaced_not_merged() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        mgr.record_plugin_sync(
            BTreeMap::from([("old".to_string(), plugin("1.0", 1))]),
            None,
        )
        .unwrap();
        mgr.record_plugin_sync(
            BTreeMap::from([("new".to_string(), plugin("2.0", 2))]),
            None,
        )
        .unwrap();

        let stored = mgr.plugin_status(None);
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["new"]);
    }

    #[test]
    fn plugin_drift_reports_one_reason_preferring_version() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        mgr.record_plugin_sync(
            BTreeMap::from([
                ("both".to_string(), plugin("1.0", 1)),
                ("count".to_string(), plugin("1.0", 1)),
                ("gone".to_string(), plugin("1.0", 1)),
                ("steady".to_string(), plugin("1.0", 1)),
            ]),
            Some("work"),
        )
        .unwrap();

        let current = BTreeMap::from([
            ("both".to_string(), plugin("2.0", 3)),
            ("count".to_string(), plugin("1.0", 2)),
            ("fresh".to_string(), plugin("0.1", 1)),
            ("steady".to_string(), plugin("1.0", 1)),
        ]);
        let drift = mgr.detect_plugin_drift(&current, Some("work"));

        assert_eq!(drift.len(), 4);
        assert_eq!(drift["both"].to_string(), "version_changed: 1.0 -> 2.0");
        assert_eq!(drift["count"].to_string(), "mcp_count_changed: 1 -> 2");
        assert_eq!(drift["fresh"], PluginDrift::Added);
        assert_eq!(drift["gone"], PluginDrift::Removed);
        assert!(!drift.contains_key("steady"));

        // The flat section is untouched by account writes.
        assert!(mgr.plugin_status(None).is_empty());
    }

    #[test]
    fn clear_target_removes_flat_entry() {
        let tmp = tempdir().unwrap();
        let mut mgr = StateManager::open(tmp.path()).unwrap();
        mgr.record_sync("codex", "all", BTreeMap::new(), ItemCounts::default(), None)
            .unwrap();
        assert!(mgr.clear_target("codex").unwrap());
        assert!(!mgr.clear_target("codex").unwrap());
        let reloaded = StateManager::open(tmp.path()).unwrap();
        assert!(reloaded.target_status("codex").is_none());
    }

    #[test]
    fn timestamp_slug_format() {
        let ts = time::Date::from_calendar_date(2024, time::Month::March, 7)
            .unwrap()
            .with_hms(9, 5, 3)
            .unwrap()
            .assume_utc();
        assert_eq!(timestamp_slug(ts), "20240307_090503");
    }
}
