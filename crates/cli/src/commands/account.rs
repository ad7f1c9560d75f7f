use crate::cli::AccountAction;
use anyhow::Result;
use harnessync_state::AccountRegistry;
use std::collections::BTreeMap;

pub(crate) fn handle_account_command(action: AccountAction) -> Result<()> {
    let mut registry = AccountRegistry::open_default()?;
    match action {
        AccountAction::List => println!("{}", render_accounts(&registry)),
        AccountAction::Add {
            name,
            source,
            targets,
        } => {
            let targets: BTreeMap<_, _> = targets.into_iter().collect();
            registry.add(&name, &source, targets)?;
            println!("Saved account '{name}'");
        }
        AccountAction::Remove { name } => {
            if registry.remove(&name)? {
                println!("Removed account '{name}'");
            } else {
                println!("No account named '{name}'");
            }
        }
    }
    Ok(())
}

fn render_accounts(registry: &AccountRegistry) -> String {
    if !registry.has_accounts() {
        return "No accounts configured; syncing from the default Claude home.".to_string();
    }
    let default = registry.default_account();
    let mut lines = Vec::new();
    for name in registry.list() {
        let Some(account) = registry.get(&name) else {
            continue;
        };
        let marker = if default == Some(name.as_str()) { " (default)" } else { "" };
        lines.push(format!(
            "{name}{marker}: {} [{}]",
            account.source.path.display(),
            account.source.scope
        ));
        for (target, dir) in &account.targets {
            lines.push(format!("  {target} -> {}", dir.display()));
        }
    }
    lines.join("\n")
}
