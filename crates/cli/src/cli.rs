use clap::{Args, Parser, Subcommand};
use harnessync_sync::Scope;
use std::path::PathBuf;

/// Command-line interface for `harnessync`.
#[derive(Debug, Parser)]
#[command(
    name = "harnessync",
    version,
    about = "Sync Claude Code configuration into other agent CLIs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that read a project.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Project root (defaults to `CLAUDE_PROJECT_DIR`, then the working directory).
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,
    /// Account to act on; every registered account when omitted.
    #[arg(long)]
    pub account: Option<String>,
    /// Print machine-readable JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Syncs configuration to every registered target.
    Sync {
        /// Which layers to read: user, project or all.
        #[arg(long, default_value_t = Scope::All)]
        scope: Scope,
        /// Preview the changes without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Sync even when MCP env vars look like hardcoded secrets.
        #[arg(long, env = "HARNESSYNC_ALLOW_SECRETS", default_value_t = false)]
        allow_secrets: bool,
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Shows the last sync per target and what has drifted since.
    Status {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Post-edit hook: reads a tool-use event on stdin and syncs when a
    /// configuration file changed. Always exits successfully.
    Hook,
    /// Serves line-delimited JSON sync requests on stdin/stdout.
    Serve {
        /// Project root used when a request does not name one.
        #[arg(long, value_name = "DIR")]
        project_dir: Option<PathBuf>,
    },
    /// Manages the account registry.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum AccountAction {
    /// Lists registered accounts.
    List,
    /// Adds or replaces an account.
    Add {
        name: String,
        /// Claude Code home the account reads from.
        #[arg(long, value_name = "DIR")]
        source: PathBuf,
        /// Target output directory as `target=dir` (repeatable).
        #[arg(long = "target", value_name = "TARGET=DIR", value_parser = parse_target_dir)]
        targets: Vec<(String, PathBuf)>,
    },
    /// Removes an account.
    Remove { name: String },
}

fn parse_target_dir(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((target, dir)) if !target.is_empty() && !dir.is_empty() => {
            Ok((target.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected TARGET=DIR, got '{raw}'")),
    }
}
