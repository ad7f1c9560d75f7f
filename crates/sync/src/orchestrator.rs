//! Sync orchestrator: runs every registered target through the safety
//! pipeline.
//!
//! Stages, in order:
//! 1. secret scan of MCP environment maps (blocks unless allowed)
//! 2. conflict scan against the stored baselines (advisory)
//! 3. backup of each target's managed paths
//! 4. adapter sync, rolled back per target on panic or failed verification
//! 5. stale link cleanup
//! 6. compatibility report
//! 7. state update (per-target baselines, plugin metadata)
//! 8. backup retention
//!
//! A dry run keeps stages 1, 2 and 6 and swaps the rest for a preview diff.

use crate::adapters::{panic_message, AdapterRegistry, TargetAdapter};
use crate::backup::BackupManager;
use crate::conflicts::{self, Conflict, ConflictDetector};
use crate::diff::{self, TargetPreview};
use crate::hashing::hash_paths;
use crate::links::cleanup_stale_links;
use crate::report::{format_results_table, CompatibilityReport, RunResults};
use crate::result::{combine, Category, CleanupReport, SyncResult, TargetResults};
use crate::scope::Scope;
use crate::secrets::{self, SecretDetection};
use crate::snapshot::ConfigSnapshot;
use crate::source::SourceReader;
use crate::Result;
use anyhow::{anyhow, bail, Context};
use harnessync_state::{
    env, now, Account, AccountRegistry, PluginMeta, StateManager, SyncSettings, TargetState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const DEFAULT_BACKUP_KEEP: usize = 10;

/// Options for one orchestrated run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub project_dir: PathBuf,
    pub scope: Scope,
    pub dry_run: bool,
    pub allow_secrets: bool,
    pub account: Option<String>,
    /// Claude Code home to read from; `~/.claude` when unset.
    pub cc_home: Option<PathBuf>,
    /// Directory holding `.claude.json`; the user's home when unset.
    pub home: Option<PathBuf>,
    /// `~/.harnesssync/backups` when unset.
    pub backup_root: Option<PathBuf>,
    pub backup_keep: usize,
    /// Restricts the run to these registry keys.
    pub targets: Option<Vec<String>>,
    /// Per-target output root; targets not listed use `project_dir`.
    pub target_dirs: BTreeMap<String, PathBuf>,
}

impl SyncOptions {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            scope: Scope::All,
            dry_run: false,
            allow_secrets: false,
            account: None,
            cc_home: None,
            home: None,
            backup_root: None,
            backup_keep: DEFAULT_BACKUP_KEEP,
            targets: None,
            target_dirs: BTreeMap::new(),
        }
    }

    /// Defaults overlaid with `config.json` settings and environment flags.
    pub fn from_settings(project_dir: impl Into<PathBuf>, settings: &SyncSettings) -> Self {
        Self {
            allow_secrets: env::env_allow_secrets(),
            backup_keep: harnessync_state::backup_keep(settings),
            targets: settings.targets.clone(),
            ..Self::new(project_dir)
        }
    }

    fn target_root(&self, target: &str) -> &Path {
        self.target_dirs
            .get(target)
            .map(PathBuf::as_path)
            .unwrap_or(&self.project_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    SecretsDetected,
}

/// Everything one run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub account: Option<String>,
    pub dry_run: bool,
    /// Per-target, per-category results. Empty on a dry run.
    pub results: RunResults,
    /// Per-target previews. Only filled on a dry run.
    pub previews: BTreeMap<String, TargetPreview>,
    pub conflicts: BTreeMap<String, Vec<Conflict>>,
    /// Plugin name -> drift reason, relative to the previous run.
    pub plugin_drift: BTreeMap<String, String>,
    pub compatibility: CompatibilityReport,
    pub cleanup: CleanupReport,
    /// Secret warnings when they were allowed through, plus other notices.
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.results.values().any(|r| combine(r).failed > 0)
    }

    /// Human-readable summary for the CLI.
    pub fn format(&self) -> String {
        let mut sections = Vec::new();
        if self.dry_run {
            for preview in self.previews.values() {
                sections.push(format!(
                    "[{}] preview\n{}",
                    preview.target.to_uppercase(),
                    preview.text
                ));
            }
        } else {
            sections.push(format_results_table(&self.results, self.account.as_deref()));
        }
        let conflict_text = conflicts::format_warnings(&self.conflicts);
        if !conflict_text.is_empty() {
            sections.push(conflict_text);
        }
        if !self.plugin_drift.is_empty() {
            let mut lines = vec!["Plugin changes since last sync:".to_string()];
            lines.extend(
                self.plugin_drift
                    .iter()
                    .map(|(name, reason)| format!("  · {name}: {reason}")),
            );
            sections.push(lines.join("\n"));
        }
        if self.compatibility.has_issues() {
            sections.push(self.compatibility.format());
        }
        sections.extend(self.warnings.iter().cloned());
        sections.join("\n")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Nothing was written.
    Blocked {
        reason: BlockReason,
        detections: Vec<SecretDetection>,
        warnings: String,
    },
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Blocked { .. } => None,
        }
    }
}

/// Run outcome for one account; `account` is `None` without an account registry.
#[derive(Debug, Clone, Serialize)]
pub struct AccountRun {
    pub account: Option<String>,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub state: TargetState,
    /// Source paths changed since this target's last sync.
    pub drift: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub account: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
    pub targets: BTreeMap<String, TargetStatus>,
    pub plugins: BTreeMap<String, PluginMeta>,
    pub plugin_drift: BTreeMap<String, String>,
}

pub struct SyncOrchestrator {
    options: SyncOptions,
    registry: AdapterRegistry,
    state: StateManager,
}

impl SyncOrchestrator {
    pub fn new(options: SyncOptions, registry: AdapterRegistry, state: StateManager) -> Self {
        Self {
            options,
            registry,
            state,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn into_state(self) -> StateManager {
        self.state
    }

    pub fn run(&mut self) -> Result<SyncOutcome> {
        let options = self.options.clone();
        self.run_with(&options)
    }

    /// Runs once per account in `accounts`, or once without an account when
    /// the registry is empty.
    pub fn sync_all_accounts(&mut self, accounts: &AccountRegistry) -> Result<Vec<AccountRun>> {
        if !accounts.has_accounts() {
            let outcome = self.run()?;
            return Ok(vec![AccountRun {
                account: None,
                outcome,
            }]);
        }

        let mut runs = Vec::new();
        for name in accounts.list() {
            let Some(account) = accounts.get(&name) else {
                continue;
            };
            let outcome = self.sync_account(&name, account)?;
            runs.push(AccountRun {
                account: Some(name),
                outcome,
            });
        }
        Ok(runs)
    }

    /// Runs once for `account`: its Claude home and scope as the source, its
    /// target map (when non-empty) as the target selection and output roots.
    pub fn sync_account(&mut self, name: &str, account: &Account) -> Result<SyncOutcome> {
        let mut options = self.options.clone();
        options.account = Some(name.to_string());
        options.cc_home = Some(account.source.path.clone());
        if let Ok(scope) = account.source.scope.parse::<Scope>() {
            options.scope = scope;
        }
        if !account.targets.is_empty() {
            options.targets = Some(account.targets.keys().cloned().collect());
            options.target_dirs = account.targets.clone();
        }
        tracing::info!(account = %name, "syncing account");
        self.run_with(&options)
            .with_context(|| format!("Sync failed for account '{name}'"))
    }

    fn reader(&self, options: &SyncOptions) -> Result<SourceReader> {
        let reader = SourceReader::new(
            options.scope,
            Some(options.project_dir.clone()),
            options.cc_home.clone(),
        )?;
        Ok(match &options.home {
            Some(home) => reader.with_home(home.clone()),
            None => reader,
        })
    }

    fn selected_targets(&self, options: &SyncOptions) -> Vec<String> {
        let registered = self.registry.targets();
        match &options.targets {
            Some(wanted) => {
                for missing in wanted.iter().filter(|t| !self.registry.contains(t)) {
                    tracing::warn!(target = %missing, "configured target is not registered");
                }
                registered
                    .into_iter()
                    .filter(|t| wanted.contains(t))
                    .collect()
            }
            None => registered,
        }
    }

    fn run_with(&mut self, options: &SyncOptions) -> Result<SyncOutcome> {
        let account = options.account.as_deref();
        let reader = self.reader(options)?;
        let snapshot = reader.discover_all();
        tracing::info!(
            scope = %options.scope,
            rules = snapshot.rule_files.len(),
            skills = snapshot.skills.len(),
            agents = snapshot.agents.len(),
            commands = snapshot.commands.len(),
            mcp = snapshot.mcp_servers_scoped.len(),
            "discovered source configuration"
        );

        let detections = secrets::scan_mcp_env(&snapshot.mcp_servers);
        let secret_text = secrets::format_warnings(&detections);
        if secrets::should_block(&detections, options.allow_secrets) {
            tracing::warn!(
                count = detections.len(),
                "sync blocked: secrets detected in environment variables"
            );
            return Ok(SyncOutcome::Blocked {
                reason: BlockReason::SecretsDetected,
                detections,
                warnings: secret_text,
            });
        }

        let targets = self.selected_targets(options);
        let mut report = SyncReport {
            account: options.account.clone(),
            dry_run: options.dry_run,
            ..SyncReport::default()
        };
        if !secret_text.is_empty() {
            report.warnings.push(secret_text);
        }

        report.conflicts = ConflictDetector::new(&self.state, account).check_all(&targets);
        if !report.conflicts.is_empty() {
            tracing::warn!("{}", conflicts::format_warnings(&report.conflicts));
        }

        let current_plugins = snapshot.plugin_metadata(now());
        report.plugin_drift = self
            .state
            .detect_plugin_drift(&current_plugins, account)
            .into_iter()
            .map(|(name, drift)| (name, drift.to_string()))
            .collect();

        let mut adapters: Vec<(String, Box<dyn TargetAdapter>)> = Vec::new();
        let mut factory_failures = RunResults::new();
        for target in &targets {
            match self.registry.get(target, options.target_root(target)) {
                Ok(adapter) => adapters.push((target.clone(), adapter)),
                Err(e) => {
                    tracing::error!(target = %target, error = %e, "could not build adapter");
                    factory_failures.insert(target.clone(), error_result(format!("{e:#}")));
                }
            }
        }

        if options.dry_run {
            for (target, adapter) in &adapters {
                report
                    .previews
                    .insert(target.clone(), diff::preview(adapter.as_ref(), &snapshot));
            }
            report.compatibility = CompatibilityReport::generate(&factory_failures);
            report.results = factory_failures;
            return Ok(SyncOutcome::Completed(report));
        }

        let backups = BackupManager::new(match &options.backup_root {
            Some(root) => root.clone(),
            None => env::backups_dir()?,
        });
        let mut results = factory_failures;
        for (target, adapter) in &adapters {
            let target_results = sync_target(&backups, target, adapter.as_ref(), &snapshot);
            let summary = combine(&target_results);
            tracing::info!(
                target = %target,
                synced = summary.synced,
                skipped = summary.skipped,
                failed = summary.failed,
                status = %summary.status(),
                "target synced"
            );
            results.insert(target.clone(), target_results);
        }

        for (_, adapter) in &adapters {
            for dir in adapter.link_dirs() {
                report.cleanup.absorb(cleanup_stale_links(&dir));
            }
        }
        if report.cleanup.removed > 0 {
            tracing::info!(removed = report.cleanup.removed, "cleaned up stale links");
        }

        report.compatibility = CompatibilityReport::generate(&results);

        let source_paths = reader.source_paths();
        let consumed: BTreeMap<&str, Vec<Category>> = adapters
            .iter()
            .map(|(target, adapter)| (target.as_str(), adapter.source_categories()))
            .collect();
        for (target, target_results) in &results {
            let categories = consumed
                .get(target.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&Category::SYNC_ORDER);
            self.state.record_sync(
                target,
                options.scope.as_str(),
                baseline(&source_paths, categories),
                combine(target_results).counts(),
                account,
            )?;
        }
        if !current_plugins.is_empty() {
            self.state.record_plugin_sync(current_plugins, account)?;
        }

        for target in &targets {
            let gc = backups.cleanup_old_backups(target, options.backup_keep);
            for warning in &gc.warnings {
                tracing::warn!(target = %target, warning = %warning, "backup cleanup incomplete");
            }
        }

        report.results = results;
        Ok(SyncOutcome::Completed(report))
    }

    /// Stored state with drift against the current source files.
    pub fn status(&self) -> Result<StatusReport> {
        let account = self.options.account.as_deref();
        let reader = self.reader(&self.options)?;
        let source_paths = reader.source_paths();
        let snapshot_plugins = reader.discover_all().plugin_metadata(now());

        let record = self.state.record();
        let stored = match account {
            Some(name) => self
                .state
                .account_status(name)
                .map(|a| a.targets.clone())
                .unwrap_or_default(),
            None => record.targets.clone(),
        };
        let targets = stored
            .into_iter()
            .map(|(name, state)| {
                let categories = self
                    .registry
                    .get(&name, self.options.target_root(&name))
                    .map(|adapter| adapter.source_categories())
                    .unwrap_or_else(|_| Category::SYNC_ORDER.to_vec());
                let current = baseline(&source_paths, &categories);
                let drift = self.state.detect_drift(&name, &current, account);
                (name, TargetStatus { state, drift })
            })
            .collect();

        Ok(StatusReport {
            account: self.options.account.clone(),
            last_sync: match account {
                Some(name) => self.state.account_status(name).and_then(|a| a.last_sync),
                None => self.state.last_sync(),
            },
            targets,
            plugins: self.state.plugin_status(account),
            plugin_drift: self
                .state
                .detect_plugin_drift(&snapshot_plugins, account)
                .into_iter()
                .map(|(name, drift)| (name, drift.to_string()))
                .collect(),
        })
    }
}

/// Digests of the source files behind `categories`.
fn baseline(
    source_paths: &BTreeMap<Category, Vec<PathBuf>>,
    categories: &[Category],
) -> BTreeMap<String, String> {
    hash_paths(
        categories
            .iter()
            .filter_map(|c| source_paths.get(c))
            .flatten(),
    )
}

fn error_result(message: impl std::fmt::Display) -> TargetResults {
    TargetResults::from([(Category::Error, SyncResult::failure(Category::Error, message))])
}

/// Backs up, syncs and verifies one target. Any failure after the backup
/// restores the target's files and becomes a single `error` result.
fn sync_target(
    backups: &BackupManager,
    target: &str,
    adapter: &dyn TargetAdapter,
    snapshot: &ConfigSnapshot,
) -> TargetResults {
    let managed = adapter.managed_paths();
    let mut session = backups.session(target);
    for path in &managed {
        if let Err(e) = session.backup(path) {
            tracing::error!(
                target = %target,
                path = %path.display(),
                error = %format!("{e:#}"),
                "backup failed; skipping target"
            );
            return error_result(format!("backup failed: {e:#}"));
        }
    }
    let existed: Vec<PathBuf> = session
        .entries()
        .iter()
        .map(|e| e.original.clone())
        .collect();

    let outcome = session.run(|| {
        let results = catch_unwind(AssertUnwindSafe(|| adapter.sync_all(snapshot)))
            .map_err(|payload| anyhow!("sync panicked: {}", panic_message(payload.as_ref())))?;
        verify_writes(&managed, &existed)?;
        Ok(results)
    });
    match outcome {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(target = %target, error = %format!("{e:#}"), "target rolled back");
            error_result(format!("{e:#}"))
        }
    }
}

/// Checks that nothing backed up has vanished and that structured files the
/// adapter manages still parse.
fn verify_writes(managed: &[PathBuf], existed: &[PathBuf]) -> Result<()> {
    for path in existed {
        if fs::symlink_metadata(path).is_err() {
            bail!("{} disappeared during sync", path.display());
        }
    }
    for path in managed.iter().filter(|p| p.is_file()) {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != "toml" && ext != "json" {
            continue;
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read back {}", path.display()))?;
        if ext == "toml" {
            toml::from_str::<toml::Table>(&text)
                .with_context(|| format!("{} is not valid TOML after sync", path.display()))?;
        } else {
            serde_json::from_str::<serde_json::Value>(&text)
                .with_context(|| format!("{} is not valid JSON after sync", path.display()))?;
        }
    }
    Ok(())
}
