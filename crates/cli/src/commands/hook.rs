use super::{execute, SyncRequest};
use anyhow::Result;
use harnessync_state::{debounce_window, env, load_sync_settings, timestamp};
use harnessync_sync::{should_debounce, HookEvent};
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::Path;
use time::OffsetDateTime;

/// What the hook did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookDecision {
    /// Not an edit to a configuration file.
    Ignored,
    /// Last sync finished inside the debounce window.
    Debounced,
    /// Another sync holds the lock.
    Busy,
    Synced,
}

/// Never fails: hook errors are logged and the editor carries on.
pub(crate) fn handle_hook_command() -> Result<()> {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        tracing::warn!(error = %e, "could not read hook event");
        return Ok(());
    }
    match decide_and_sync(&input) {
        Ok(decision) => tracing::debug!(?decision, "hook finished"),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "hook sync failed"),
    }
    Ok(())
}

fn decide_and_sync(input: &str) -> Result<HookDecision> {
    let Some(event) = HookEvent::parse(input) else {
        return Ok(HookDecision::Ignored);
    };
    if !event.touches_config() {
        return Ok(HookDecision::Ignored);
    }

    let settings = load_sync_settings()?;
    let last_sync = recorded_last_sync(&env::state_file()?);
    if should_debounce(last_sync, debounce_window(&settings)) {
        tracing::debug!(path = event.file_path(), "sync debounced");
        return Ok(HookDecision::Debounced);
    }

    tracing::info!(path = event.file_path(), "config edit detected, syncing");
    Ok(match execute(&SyncRequest::default())? {
        Some(_) => HookDecision::Synced,
        None => HookDecision::Busy,
    })
}

/// Peeks at the top-level `last_sync` without migrating, repairing or
/// saving the state file. Anything unreadable counts as never synced.
fn recorded_last_sync(state_file: &Path) -> Option<OffsetDateTime> {
    let text = fs::read_to_string(state_file).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    value.get("last_sync")?.as_str().and_then(timestamp::parse)
}
