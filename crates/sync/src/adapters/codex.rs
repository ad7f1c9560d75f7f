//! Codex adapter: writes `AGENTS.md`, `.agents/skills/` and `.codex/config.toml`.
//!
//! Mapping:
//! - rules → managed block in `<project>/AGENTS.md`; text outside the markers
//!   is left alone
//! - skills → links in `<project>/.agents/skills/<name>`
//! - agents → `<project>/.agents/skills/<name>/SKILL.md` built from the
//!   agent's front-matter and `<role>` section
//! - commands → `<project>/.agents/skills/cmd-<name>/SKILL.md`
//! - MCP servers → `[mcp_servers.<name>]` tables; project-scope servers go to
//!   `<project>/.codex/config.toml`, everything else to `~/.codex/config.toml`
//! - settings → `sandbox_mode` / `approval_policy` in the project config

use super::traits::{overlay_items, ItemView, TargetAdapter};
use super::utils::{
    check_transport, extract_role, linked_entries, managed_rules_body, rules_body, sanitize_name,
    split_front_matter, sync_rules_file, Transport,
};
use crate::hashing::{hash_file, hash_str};
use crate::links::{link_with_fallback, LinkOutcome};
use crate::result::{Category, SyncResult};
use crate::snapshot::{ConfigSnapshot, McpConfig, McpScope, McpSource, RuleFile, ScopedMcpEntry};
use crate::Result;
use anyhow::Context;
use harnessync_state::write_atomic;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const CONFIG_FILE: &str = "config.toml";
const SUPPORTED: &[Transport] = &[Transport::Stdio, Transport::Http];
const COMMAND_PREFIX: &str = "cmd-";
const CONFIG_HEADER: &str =
    "# Codex configuration managed by HarnessSync\n# Do not edit MCP servers section manually\n\n";

/// Server keys carried into `[mcp_servers.<name>]`, as (source key, Codex key).
const SERVER_KEYS: &[(&str, &str)] = &[
    ("command", "command"),
    ("url", "url"),
    ("args", "args"),
    ("enabled", "enabled"),
    ("required", "required"),
    ("startup_timeout_sec", "startup_timeout_sec"),
    ("tool_timeout_sec", "tool_timeout_sec"),
    ("enabled_tools", "enabled_tools"),
    ("disabled_tools", "disabled_tools"),
    ("bearer_token_env_var", "bearer_token_env_var"),
    ("env", "env"),
    ("headers", "http_headers"),
    ("http_headers", "http_headers"),
];

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(:-([^}]+))?\}").expect("VAR_RE: compile-time constant")
});

/// Adapter for the Codex CLI.
pub struct CodexAdapter {
    project_dir: PathBuf,
    user_codex_dir: PathBuf,
}

impl CodexAdapter {
    /// User-scope config lives under `~/.codex`.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let home = harnessync_state::home_dir()?;
        Ok(Self {
            project_dir,
            user_codex_dir: home.join(".codex"),
        })
    }

    /// Creates an adapter with an explicit user config directory (for testing).
    pub fn with_roots(project_dir: PathBuf, user_codex_dir: PathBuf) -> Self {
        Self {
            project_dir,
            user_codex_dir,
        }
    }

    fn agents_md(&self) -> PathBuf {
        self.project_dir.join("AGENTS.md")
    }

    fn skills_dir(&self) -> PathBuf {
        self.project_dir.join(".agents").join("skills")
    }

    fn project_config(&self) -> PathBuf {
        self.project_dir.join(".codex").join(CONFIG_FILE)
    }

    fn user_config(&self) -> PathBuf {
        self.user_codex_dir.join(CONFIG_FILE)
    }

    fn write_skill_md(&self, dir_name: &str, content: &str) -> Result<PathBuf> {
        let path = self.skills_dir().join(dir_name).join("SKILL.md");
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn write_servers(&self, path: &Path, servers: BTreeMap<String, toml::Table>) -> SyncResult {
        let count = servers.len();
        let outcome = read_config(path).and_then(|mut config| {
            let section = config
                .entry("mcp_servers")
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            if !section.is_table() {
                *section = toml::Value::Table(toml::Table::new());
            }
            if let toml::Value::Table(table) = section {
                for (name, server) in servers {
                    table.insert(name, toml::Value::Table(server));
                }
            }
            write_config(path, &config)
        });
        match outcome {
            Ok(()) => SyncResult {
                synced: count,
                synced_files: vec![path.display().to_string()],
                ..SyncResult::default()
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write MCP servers");
                SyncResult {
                    failed: count,
                    failed_files: vec![format!("MCP servers: {e:#}")],
                    ..SyncResult::default()
                }
            }
        }
    }

    fn configured_servers(&self) -> BTreeMap<String, String> {
        let mut servers = BTreeMap::new();
        for path in [self.user_config(), self.project_config()] {
            let Ok(config) = read_config(&path) else {
                continue;
            };
            if let Some(toml::Value::Table(table)) = config.get("mcp_servers") {
                for (name, server) in table {
                    servers.insert(name.clone(), fingerprint_toml(server));
                }
            }
        }
        servers
    }
}

impl TargetAdapter for CodexAdapter {
    fn target_name(&self) -> &str {
        "codex"
    }

    fn sync_rules(&self, rules: &[RuleFile]) -> Result<SyncResult> {
        sync_rules_file(&self.agents_md(), rules)
    }

    fn sync_skills(&self, skills: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if skills.is_empty() {
            return Ok(result);
        }
        let dir = self.skills_dir();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        for (name, source) in skills {
            let target = dir.join(sanitize_name(name));
            match link_with_fallback(source, &target) {
                Ok(LinkOutcome::Unchanged) => {
                    result.record_skipped(format!("{name}: already linked"))
                }
                Ok(method) => result.record_synced(format!("{name} ({method})")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        Ok(result)
    }

    fn sync_agents(&self, agents: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        for (name, path) in agents {
            let rendered = render_agent(name, path)
                .and_then(|skill| match skill {
                    Some(content) => self.write_skill_md(&sanitize_name(name), &content).map(Some),
                    None => Ok(None),
                });
            match rendered {
                Ok(Some(written)) => {
                    result.record_synced(written.display().to_string());
                    result.adapted += 1;
                }
                Ok(None) => result.record_skipped(format!("{name}: no role content")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        Ok(result)
    }

    fn sync_commands(&self, commands: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        for (name, path) in commands {
            let dir_name = format!("{COMMAND_PREFIX}{}", sanitize_name(name));
            let rendered = render_command(name, path).and_then(|skill| match skill {
                Some(content) => self.write_skill_md(&dir_name, &content).map(Some),
                None => Ok(None),
            });
            match rendered {
                Ok(Some(written)) => {
                    result.record_synced(written.display().to_string());
                    result.adapted += 1;
                }
                Ok(None) => result.record_skipped(format!("{name}: no content")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        Ok(result)
    }

    fn sync_mcp(&self, servers: &BTreeMap<String, McpConfig>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if servers.is_empty() {
            return Ok(result);
        }
        let mut tables = BTreeMap::new();
        for (name, config) in servers {
            if let Some(table) = prepare_server(name, config, &mut result) {
                tables.insert(name.clone(), table);
            }
        }
        if !tables.is_empty() {
            result = result.merge(self.write_servers(&self.project_config(), tables));
        }
        Ok(result)
    }

    /// Project-scope file servers go to the project config; user, local and
    /// plugin servers go to the user config.
    fn sync_mcp_scoped(&self, servers: &BTreeMap<String, ScopedMcpEntry>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut user = BTreeMap::new();
        let mut project = BTreeMap::new();
        for (name, entry) in servers {
            let Some(table) = prepare_server(name, &entry.config, &mut result) else {
                continue;
            };
            let is_project = entry.metadata.scope == McpScope::Project
                && entry.metadata.source == McpSource::File;
            if is_project {
                project.insert(name.clone(), table);
            } else {
                user.insert(name.clone(), table);
            }
        }
        if !user.is_empty() {
            result = result.merge(self.write_servers(&self.user_config(), user));
        }
        if !project.is_empty() {
            result = result.merge(self.write_servers(&self.project_config(), project));
        }
        Ok(result)
    }

    fn sync_settings(&self, settings: &Map<String, Value>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if settings.is_empty() {
            return Ok(result);
        }
        let path = self.project_config();
        let mut config = read_config(&path)?;
        for (key, value) in derive_settings(settings) {
            config.insert(key.to_string(), toml::Value::String(value.to_string()));
        }
        write_config(&path, &config)?;
        result.record_synced(path.display().to_string());
        result.adapted = 1;
        Ok(result)
    }

    fn managed_paths(&self) -> Vec<PathBuf> {
        vec![
            self.agents_md(),
            self.skills_dir(),
            self.project_config(),
            self.user_config(),
        ]
    }

    fn link_dirs(&self) -> Vec<PathBuf> {
        vec![self.skills_dir()]
    }

    fn current_items(&self) -> ItemView {
        let mut view = ItemView::new();

        let mut rules = BTreeMap::new();
        if let Some(body) = fs::read_to_string(self.agents_md())
            .ok()
            .as_deref()
            .and_then(managed_rules_body)
        {
            rules.insert("AGENTS.md".to_string(), body);
        }
        view.insert(Category::Rules, rules);

        let mut skills = BTreeMap::new();
        let mut agents = BTreeMap::new();
        let mut commands = BTreeMap::new();
        for (name, path, linked) in linked_entries(&self.skills_dir()) {
            let digest = hash_file(&path.join("SKILL.md"));
            if linked {
                skills.insert(name, digest);
            } else if let Some(command) = name.strip_prefix(COMMAND_PREFIX) {
                commands.insert(command.to_string(), digest);
            } else if !digest.is_empty() {
                agents.insert(name, digest);
            }
        }
        view.insert(Category::Skills, skills);
        view.insert(Category::Agents, agents);
        view.insert(Category::Commands, commands);
        view.insert(Category::Mcp, self.configured_servers());
        view.insert(Category::Settings, current_settings(&self.project_config()));
        view
    }

    fn planned_items(&self, snapshot: &ConfigSnapshot) -> ItemView {
        let mut view = ItemView::new();

        if !snapshot.rule_files.is_empty() {
            view.insert(
                Category::Rules,
                BTreeMap::from([("AGENTS.md".to_string(), rules_body(&snapshot.rule_files))]),
            );
        }

        view.insert(
            Category::Skills,
            snapshot
                .skills
                .iter()
                .map(|(name, dir)| (sanitize_name(name), hash_file(&dir.join("SKILL.md"))))
                .collect(),
        );
        view.insert(
            Category::Agents,
            snapshot
                .agents
                .iter()
                .filter_map(|(name, path)| {
                    let content = render_agent(name, path).ok()??;
                    Some((sanitize_name(name), hash_str(&content)))
                })
                .collect(),
        );
        view.insert(
            Category::Commands,
            snapshot
                .commands
                .iter()
                .filter_map(|(name, path)| {
                    let content = render_command(name, path).ok()??;
                    Some((sanitize_name(name), hash_str(&content)))
                })
                .collect(),
        );

        let mut scratch = SyncResult::new();
        view.insert(
            Category::Mcp,
            snapshot
                .mcp_servers_scoped
                .iter()
                .filter_map(|(name, entry)| {
                    let table = prepare_server(name, &entry.config, &mut scratch)?;
                    Some((name.clone(), fingerprint_toml(&toml::Value::Table(table))))
                })
                .collect(),
        );

        if !snapshot.settings.is_empty() {
            view.insert(
                Category::Settings,
                derive_settings(&snapshot.settings)
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        overlay_items(self.current_items(), view)
    }
}

fn render_skill_md(name: &str, description: &str, instructions: &str) -> String {
    let description = if description.is_empty() { name } else { description };
    format!(
        "---\nname: {name}\ndescription: {description}\n---\n{instructions}\n\n## When to Use This Skill\n\n{description}"
    )
}

/// SKILL.md for an agent, or `None` when it has no role content.
fn render_agent(name: &str, path: &Path) -> Result<Option<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("file not found at {}", path.display()))?;
    let (fm, body) = split_front_matter(&content);
    let instructions = extract_role(body);
    if instructions.is_empty() {
        return Ok(None);
    }
    Ok(Some(render_skill_md(
        fm.name.as_deref().unwrap_or(name),
        fm.description.as_deref().unwrap_or(""),
        instructions,
    )))
}

/// SKILL.md for a command, or `None` when the file is blank.
fn render_command(name: &str, path: &Path) -> Result<Option<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("file not found at {}", path.display()))?;
    let (fm, body) = split_front_matter(&content);
    let instructions = if body.trim().is_empty() {
        content.as_str()
    } else {
        body
    };
    if instructions.trim().is_empty() {
        return Ok(None);
    }
    let description = fm
        .description
        .unwrap_or_else(|| format!("Claude Code command: {name}"));
    Ok(Some(render_skill_md(
        fm.name.as_deref().unwrap_or(name),
        &description,
        instructions,
    )))
}

/// Codex sandbox and approval values implied by Claude Code settings.
///
/// Any denied tool selects the read-only sandbox.
fn derive_settings(settings: &Map<String, Value>) -> [(&'static str, &'static str); 2] {
    let denies = settings
        .get("permissions")
        .and_then(|p| p.get("deny"))
        .and_then(Value::as_array)
        .is_some_and(|d| !d.is_empty());
    let sandbox = if denies { "read-only" } else { "workspace-write" };
    let approval = match settings.get("approval_mode").and_then(Value::as_str) {
        Some("auto") => "on-failure",
        _ => "on-request",
    };
    [("sandbox_mode", sandbox), ("approval_policy", approval)]
}

fn current_settings(path: &Path) -> BTreeMap<String, String> {
    let Ok(config) = read_config(path) else {
        return BTreeMap::new();
    };
    ["sandbox_mode", "approval_policy"]
        .into_iter()
        .filter_map(|k| {
            config
                .get(k)
                .and_then(toml::Value::as_str)
                .map(|v| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Translated Codex table for one server, or `None` (with a note in
/// `result`) when Codex cannot run it.
fn prepare_server(name: &str, config: &McpConfig, result: &mut SyncResult) -> Option<toml::Table> {
    if let Err(message) = check_transport(name, config, "codex", SUPPORTED) {
        result.record_skipped(message);
        return None;
    }
    let (translated, warnings) = translate_env_vars(config);
    result.skipped_files.extend(warnings);
    Some(server_table(&translated))
}

/// Resolves `${VAR}` and `${VAR:-default}` in command, url, args and env values.
///
/// Codex has no interpolation of its own. Resolved variables are also added to
/// `env`; entries already present there win.
fn translate_env_vars(config: &McpConfig) -> (McpConfig, Vec<String>) {
    let mut config = config.clone();
    let mut resolved: BTreeMap<String, String> = BTreeMap::new();
    let mut warnings = Vec::new();

    let mut resolve = |text: &str| -> String {
        VAR_RE
            .replace_all(text, |caps: &Captures<'_>| {
                let var = &caps[1];
                let default = caps.get(3).map(|m| m.as_str());
                match (std::env::var(var).ok(), default) {
                    (Some(value), _) => {
                        resolved.insert(var.to_string(), value.clone());
                        value
                    }
                    (None, Some(default)) => {
                        warnings.push(format!(
                            "ENV var ${{{var}}} not set, using default: {default}"
                        ));
                        default.to_string()
                    }
                    (None, None) => {
                        warnings.push(format!(
                            "ENV var ${{{var}}} not set and no default provided"
                        ));
                        String::new()
                    }
                }
            })
            .into_owned()
    };

    for key in ["command", "url"] {
        if let Some(Value::String(s)) = config.get_mut(key) {
            *s = resolve(s);
        }
    }
    if let Some(Value::Array(args)) = config.get_mut("args") {
        for arg in args.iter_mut() {
            if let Value::String(s) = arg {
                *s = resolve(s);
            }
        }
    }
    if let Some(Value::Object(env)) = config.get_mut("env") {
        for value in env.values_mut() {
            if let Value::String(s) = value {
                *s = resolve(s);
            }
        }
    }

    if !resolved.is_empty() {
        let mut env: Map<String, Value> = resolved
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        if let Some(Value::Object(existing)) = config.get("env") {
            env.extend(existing.clone());
        }
        config.insert("env".into(), Value::Object(env));
    }
    (config, warnings)
}

fn server_table(config: &McpConfig) -> toml::Table {
    let mut table = toml::Table::new();
    for (from, to) in SERVER_KEYS {
        let Some(value) = config.get(*from) else {
            continue;
        };
        let converted = if matches!(*to, "env" | "http_headers") {
            string_table(value)
        } else {
            json_to_toml(value)
        };
        if let Some(v) = converted {
            table.insert((*to).to_string(), v);
        }
    }
    table
}

fn string_table(value: &Value) -> Option<toml::Value> {
    let obj = value.as_object()?;
    let table: toml::Table = obj
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), toml::Value::String(s))
        })
        .collect();
    Some(toml::Value::Table(table))
}

fn json_to_toml(value: &Value) -> Option<toml::Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(toml::Value::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(toml::Value::Integer)
            .or_else(|| n.as_f64().map(toml::Value::Float)),
        Value::String(s) => Some(toml::Value::String(s.clone())),
        Value::Array(items) => Some(toml::Value::Array(
            items.iter().filter_map(json_to_toml).collect(),
        )),
        Value::Object(map) => Some(toml::Value::Table(
            map.iter()
                .filter_map(|(k, v)| json_to_toml(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
    }
}

fn fingerprint_toml(value: &toml::Value) -> String {
    let text = match value {
        toml::Value::Table(t) => toml::to_string(t).unwrap_or_default(),
        other => other.to_string(),
    };
    hash_str(&text)
}

/// Parses an existing config. A missing file is an empty table; a file that
/// does not parse is an error so it is never silently clobbered.
fn read_config(path: &Path) -> Result<toml::Table> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .parse::<toml::Table>()
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn write_config(path: &Path, config: &toml::Table) -> Result<()> {
    let body = toml::to_string(config)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_atomic(path, format!("{CONFIG_HEADER}{body}").as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}
