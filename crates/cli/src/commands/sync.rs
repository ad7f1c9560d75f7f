use super::{execute, SyncRequest};
use anyhow::{bail, Result};
use harnessync_sync::{AccountRun, SyncOutcome};

pub(crate) fn handle_sync_command(request: SyncRequest, json: bool) -> Result<()> {
    let Some(runs) = execute(&request)? else {
        println!("Sync already in progress; skipped.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        println!("{}", render_runs(&runs));
    }

    let blocked = runs.iter().filter(|r| r.outcome.is_blocked()).count();
    if blocked > 0 {
        bail!("{blocked} sync run(s) blocked: rerun with --allow-secrets to override");
    }
    Ok(())
}

pub(crate) fn render_runs(runs: &[AccountRun]) -> String {
    runs.iter()
        .map(|run| {
            let body = match &run.outcome {
                SyncOutcome::Blocked { warnings, .. } => warnings.clone(),
                SyncOutcome::Completed(report) => report.format(),
            };
            match &run.account {
                Some(name) if runs.len() > 1 => format!("== account: {name} ==\n{body}"),
                _ => body,
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use harnessync_sync::{BlockReason, SyncReport};

    fn completed(account: Option<&str>) -> AccountRun {
        AccountRun {
            account: account.map(str::to_string),
            outcome: SyncOutcome::Completed(SyncReport::default()),
        }
    }

    #[test]
    fn single_run_has_no_account_banner() {
        let text = render_runs(&[completed(Some("work"))]);
        assert!(!text.contains("== account"));
        assert!(text.contains("HarnessSync Results"));
    }

    #[test]
    fn multiple_runs_are_labelled_and_blocks_show_warnings() {
        let blocked = AccountRun {
            account: Some("personal".into()),
            outcome: SyncOutcome::Blocked {
                reason: BlockReason::SecretsDetected,
                detections: Vec::new(),
                warnings: "secrets found".into(),
            },
        };
        let text = render_runs(&[completed(Some("work")), blocked]);
        assert!(text.contains("== account: work =="));
        assert!(text.contains("== account: personal ==\nsecrets found"));
    }
}
