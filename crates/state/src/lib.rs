//! Persisted state for harnessync.
//!
//! This crate provides:
//! - Environment and settings resolution (`~/.harnesssync`, overrides).
//! - The versioned sync state document with drift detection.
//! - The multi-account registry.
//! - Atomic write helpers shared by every on-disk record.

pub mod accounts;
pub mod atomic;
pub mod env;
pub mod persistence;
pub mod timestamp;

pub use accounts::{validate_account_name, Account, AccountError, AccountRegistry, AccountSource};
pub use atomic::{write_atomic, write_json_atomic};
pub use env::{
    backup_keep, claude_home, debounce_window, harnessync_dir, home_dir, load_sync_settings,
    project_dir_from_env, SyncSettings,
};
pub use persistence::{
    now, timestamp_slug, AccountState, ItemCounts, PluginDrift, PluginMeta, StateManager,
    StateRecord, SyncStatus, TargetState, DEFAULT_ACCOUNT, SCHEMA_VERSION,
};
