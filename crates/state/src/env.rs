use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DEBOUNCE_MS: u64 = 3_000;
const DEFAULT_BACKUP_KEEP: usize = 10;

/// Returns the user's home directory.
pub fn home_dir() -> Result<PathBuf> {
    #[cfg(unix)]
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir().ok_or_else(|| anyhow::anyhow!("home directory not found"))
}

/// Directory holding state, lock, backups and the account registry.
///
/// `HARNESSYNC_HOME` overrides the default `~/.harnesssync`.
pub fn harnessync_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("HARNESSYNC_HOME") {
        if !custom.is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }
    Ok(home_dir()?.join(".harnesssync"))
}

pub fn state_file() -> Result<PathBuf> {
    Ok(harnessync_dir()?.join("state.json"))
}

pub fn lock_file() -> Result<PathBuf> {
    Ok(harnessync_dir()?.join("sync.lock"))
}

pub fn backups_dir() -> Result<PathBuf> {
    Ok(harnessync_dir()?.join("backups"))
}

pub fn accounts_file() -> Result<PathBuf> {
    Ok(harnessync_dir()?.join("accounts.json"))
}

pub fn settings_file() -> Result<PathBuf> {
    Ok(harnessync_dir()?.join("config.json"))
}

/// Default Claude Code configuration directory (`~/.claude`).
pub fn claude_home() -> Result<PathBuf> {
    Ok(home_dir()?.join(".claude"))
}

/// Project directory from `CLAUDE_PROJECT_DIR`, falling back to the working directory.
pub fn project_dir_from_env() -> Result<PathBuf> {
    match std::env::var("CLAUDE_PROJECT_DIR") {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => std::env::current_dir().context("could not determine current directory"),
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Checks if `HARNESSYNC_ALLOW_SECRETS` is set to true.
pub fn env_allow_secrets() -> bool {
    env_flag("HARNESSYNC_ALLOW_SECRETS")
}

/// Debounce window from `HARNESSYNC_DEBOUNCE_MS`.
pub fn env_debounce_ms() -> Option<u64> {
    std::env::var("HARNESSYNC_DEBOUNCE_MS")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Backup retention count from `HARNESSYNC_BACKUP_KEEP`.
pub fn env_backup_keep() -> Option<usize> {
    std::env::var("HARNESSYNC_BACKUP_KEEP")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// Settings parsed from `~/.harnesssync/config.json`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub backup_keep: Option<usize>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    /// Restricts the run to these targets when set.
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

/// Loads settings from disk if available. A malformed file yields defaults.
pub fn load_sync_settings() -> Result<SyncSettings> {
    let path = settings_file()?;
    if !path.exists() {
        return Ok(SyncSettings::default());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings: {}", path.display()))?;
    match serde_json::from_str::<SyncSettings>(&text) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed settings file");
            Ok(SyncSettings::default())
        }
    }
}

/// Debounce window: env var, then settings file, then 3 seconds.
pub fn debounce_window(settings: &SyncSettings) -> Duration {
    Duration::from_millis(
        env_debounce_ms()
            .or(settings.debounce_ms)
            .unwrap_or(DEFAULT_DEBOUNCE_MS),
    )
}

/// Number of backups retained per target: env var, then settings file, then 10.
pub fn backup_keep(settings: &SyncSettings) -> usize {
    env_backup_keep()
        .or(settings.backup_keep)
        .unwrap_or(DEFAULT_BACKUP_KEEP)
}
