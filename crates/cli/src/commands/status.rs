use super::{orchestrator, resolve_project};
use crate::cli::ProjectArgs;
use anyhow::{Context, Result};
use harnessync_state::{load_sync_settings, AccountRegistry};
use harnessync_sync::{StatusReport, SyncOptions};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;

pub(crate) fn handle_status_command(project: ProjectArgs) -> Result<()> {
    let reports = collect_status(project.project_dir, project.account)?;
    if project.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let text: Vec<String> = reports.iter().map(render_status).collect();
        println!("{}", text.join("\n\n"));
    }
    Ok(())
}

/// One report for `account`, for every registered account, or for the
/// default Claude home when no accounts exist.
pub(crate) fn collect_status(
    project_dir: Option<PathBuf>,
    account: Option<String>,
) -> Result<Vec<StatusReport>> {
    let settings = load_sync_settings()?;
    let mut options = SyncOptions::from_settings(resolve_project(project_dir)?, &settings);

    let accounts = AccountRegistry::open_default()?;
    let names = match account {
        Some(name) => vec![Some(name)],
        None if accounts.has_accounts() => accounts.list().into_iter().map(Some).collect(),
        None => vec![None],
    };

    let mut reports = Vec::new();
    for name in names {
        if let Some(name) = &name {
            let account = accounts
                .get(name)
                .with_context(|| format!("unknown account '{name}'"))?;
            options.cc_home = Some(account.source.path.clone());
            options.target_dirs = account.targets.clone();
        }
        options.account = name;
        reports.push(orchestrator(options.clone())?.status()?);
    }
    Ok(reports)
}

pub(crate) fn render_status(report: &StatusReport) -> String {
    let mut lines = vec![match &report.account {
        Some(account) => format!("HarnessSync Status ({account})"),
        None => "HarnessSync Status".to_string(),
    }];
    lines.push(match report.last_sync.and_then(|t| t.format(&Rfc3339).ok()) {
        Some(ts) => format!("Last sync: {ts}"),
        None => "Last sync: never".to_string(),
    });

    if report.targets.is_empty() {
        lines.push("No targets synced yet.".to_string());
    }
    for (name, status) in &report.targets {
        let state = &status.state;
        lines.push(format!(
            "  {name}: {} ({} synced, {} skipped, {} failed)",
            state.status.as_str(),
            state.items_synced,
            state.items_skipped,
            state.items_failed
        ));
        if status.drift.is_empty() {
            lines.push("    up to date".to_string());
        } else {
            lines.push(format!("    {} source file(s) changed:", status.drift.len()));
            lines.extend(status.drift.iter().map(|p| format!("      {p}")));
        }
    }

    if !report.plugins.is_empty() {
        lines.push("Plugins:".to_string());
        for (name, meta) in &report.plugins {
            let drift = report
                .plugin_drift
                .get(name)
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            lines.push(format!(
                "  {name} v{} ({} MCP server(s)){drift}",
                meta.version, meta.mcp_count
            ));
        }
    }
    for (name, drift) in report
        .plugin_drift
        .iter()
        .filter(|(name, _)| !report.plugins.contains_key(*name))
    {
        lines.push(format!("  {name}: {drift}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use harnessync_state::{now, PluginMeta, SyncStatus, TargetState};
    use harnessync_sync::TargetStatus;
    use std::collections::BTreeMap;

    fn target(drift: Vec<String>) -> TargetStatus {
        TargetStatus {
            state: TargetState {
                last_sync: now(),
                status: SyncStatus::Partial,
                scope: "all".into(),
                file_hashes: BTreeMap::new(),
                items_synced: 3,
                items_skipped: 1,
                items_failed: 1,
            },
            drift,
        }
    }

    #[test]
    fn renders_drift_and_plugins() {
        let report = StatusReport {
            account: Some("work".into()),
            last_sync: None,
            targets: BTreeMap::from([
                ("codex".to_string(), target(vec!["/h/.claude/CLAUDE.md".into()])),
                ("other".to_string(), target(Vec::new())),
            ]),
            plugins: BTreeMap::from([(
                "context7".to_string(),
                PluginMeta {
                    version: "1.0.0".into(),
                    mcp_count: 1,
                    mcp_servers: vec!["c7".into()],
                    last_sync: now(),
                },
            )]),
            plugin_drift: BTreeMap::from([
                ("context7".to_string(), "version_changed: 1.0.0 -> 1.1.0".to_string()),
                ("gone".to_string(), "removed".to_string()),
            ]),
        };
        let text = render_status(&report);
        assert!(text.starts_with("HarnessSync Status (work)\nLast sync: never"));
        assert!(text.contains("  codex: partial (3 synced, 1 skipped, 1 failed)"));
        assert!(text.contains("      /h/.claude/CLAUDE.md"));
        assert!(text.contains("    up to date"));
        assert!(
            text.contains("context7 v1.0.0 (1 MCP server(s)) [version_changed: 1.0.0 -> 1.1.0]")
        );
        assert!(text.contains("  gone: removed"));
    }
}
