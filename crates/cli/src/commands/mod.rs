//! CLI command handlers for harnessync.

mod account;
mod hook;
mod serve;
mod status;
mod sync;

pub(crate) use account::handle_account_command;
pub(crate) use hook::handle_hook_command;
pub(crate) use serve::handle_serve_command;
pub(crate) use status::handle_status_command;
pub(crate) use sync::handle_sync_command;

use anyhow::{Context, Result};
use harnessync_state::{
    env, load_sync_settings, project_dir_from_env, AccountRegistry, StateManager,
};
use harnessync_sync::{
    AccountRun, AdapterRegistry, LockAttempt, Scope, SyncLock, SyncOptions, SyncOrchestrator,
};
use serde::Deserialize;
use std::path::PathBuf;

/// One sync invocation, from flags or from a server request line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct SyncRequest {
    pub project_dir: Option<PathBuf>,
    pub scope: Scope,
    pub dry_run: bool,
    pub allow_secrets: bool,
    pub account: Option<String>,
}

pub(crate) fn resolve_project(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => project_dir_from_env(),
    }
}

pub(crate) fn orchestrator(options: SyncOptions) -> Result<SyncOrchestrator> {
    Ok(SyncOrchestrator::new(
        options,
        AdapterRegistry::with_builtin()?,
        StateManager::open_default()?,
    ))
}

/// Runs `request` under the global sync lock. `None` means another run
/// holds the lock and nothing was done.
pub(crate) fn execute(request: &SyncRequest) -> Result<Option<Vec<AccountRun>>> {
    let lock_path = env::lock_file()?;
    let _lock = match SyncLock::try_acquire(&lock_path)? {
        LockAttempt::Acquired(lock) => lock,
        LockAttempt::Held => {
            tracing::info!(path = %lock_path.display(), "another sync is running");
            return Ok(None);
        }
    };

    let settings = load_sync_settings()?;
    let mut options =
        SyncOptions::from_settings(resolve_project(request.project_dir.clone())?, &settings);
    options.scope = request.scope;
    options.dry_run = request.dry_run;
    options.allow_secrets |= request.allow_secrets;

    let accounts = AccountRegistry::open_default()?;
    let mut orchestrator = orchestrator(options)?;
    let runs = match &request.account {
        Some(name) => {
            let account = accounts
                .get(name)
                .with_context(|| format!("unknown account '{name}'"))?;
            vec![AccountRun {
                account: Some(name.clone()),
                outcome: orchestrator.sync_account(name, account)?,
            }]
        }
        None => orchestrator.sync_all_accounts(&accounts)?,
    };
    Ok(Some(runs))
}
