//! Sync engine for harnessync.
//!
//! Reads Claude Code configuration (rules, skills, agents, commands, MCP
//! servers, settings) for a scope and writes it into other agent CLIs
//! through pluggable target adapters. Each run passes a secret gate, warns
//! about hand-edited target files, backs up what it will touch, and records
//! per-target baselines for drift detection.
//!
//! # Examples
//!
//! ```no_run
//! use harnessync_sync::{AdapterRegistry, SyncOptions, SyncOrchestrator, SyncOutcome};
//! use harnessync_state::StateManager;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut options = SyncOptions::new("/path/to/project");
//! options.dry_run = true;
//!
//! let registry = AdapterRegistry::with_builtin()?;
//! let mut orchestrator = SyncOrchestrator::new(options, registry, StateManager::open_default()?);
//! match orchestrator.run()? {
//!     SyncOutcome::Blocked { warnings, .. } => eprintln!("{warnings}"),
//!     SyncOutcome::Completed(report) => println!("{}", report.format()),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub mod adapters;
pub mod backup;
pub mod conflicts;
pub mod diff;
pub mod hashing;
pub mod hook;
pub mod links;
pub mod lock;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod result;
pub mod scope;
pub mod secrets;
pub mod snapshot;
pub mod source;

pub use adapters::{
    AdapterRegistry, CodexAdapter, GeminiAdapter, ItemView, OpenCodeAdapter, RegistryError,
    TargetAdapter,
};
pub use backup::{BackupEntry, BackupManager, BackupSession};
pub use conflicts::{Conflict, ConflictDetector, ConflictKind};
pub use diff::{KeyDiff, TargetPreview};
pub use hook::{is_config_file, HookEvent};
pub use links::{cleanup_stale_links, link_with_fallback, LinkOutcome};
pub use lock::{should_debounce, LockAttempt, SyncLock};
pub use orchestrator::{
    AccountRun, BlockReason, StatusReport, SyncOptions, SyncOrchestrator, SyncOutcome,
    SyncReport, TargetStatus,
};
pub use queue::{Submit, SyncQueue};
pub use report::{format_results_table, CompatibilityReport, RunResults};
pub use result::{Category, CleanupReport, SyncResult, TargetResults};
pub use scope::{Scope, ScopeParseError};
pub use secrets::SecretDetection;
pub use snapshot::{
    ConfigSnapshot, McpConfig, McpMetadata, McpScope, McpSource, RuleFile, ScopedMcpEntry,
};
pub use source::{discover_claude_homes, is_claude_home, SourceReader};
