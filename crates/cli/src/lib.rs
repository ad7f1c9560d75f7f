//! Command-line entry points for harnessync.
//!
//! The main entry point is [`run`], which parses arguments, installs logging
//! on stderr and dispatches to one of the command handlers: `sync`, `status`,
//! the post-edit `hook`, the stdio request server `serve`, and `account`.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

pub use cli::{AccountAction, Cli, Commands, ProjectArgs};

use commands::{
    handle_account_command, handle_hook_command, handle_serve_command, handle_status_command,
    handle_sync_command, SyncRequest,
};

pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync {
            scope,
            dry_run,
            allow_secrets,
            project,
        } => handle_sync_command(
            SyncRequest {
                project_dir: project.project_dir,
                scope,
                dry_run,
                allow_secrets,
                account: project.account,
            },
            project.json,
        ),
        Commands::Status { project } => handle_status_command(project),
        Commands::Hook => handle_hook_command(),
        Commands::Serve { project_dir } => handle_serve_command(project_dir),
        Commands::Account { action } => handle_account_command(action),
    }
}
