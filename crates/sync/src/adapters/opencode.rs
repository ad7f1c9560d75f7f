//! OpenCode adapter: writes `AGENTS.md`, `.opencode/` links and `opencode.json`.
//!
//! OpenCode reads Claude-style markdown natively, so skills, agents and
//! commands are linked rather than rendered. It has no user-level config
//! file; every MCP server lands in the project's `opencode.json`.

use super::traits::{overlay_items, ItemView, TargetAdapter};
use super::utils::{
    check_transport, json_section_fingerprints, linked_entries, managed_rules_body,
    read_instructions, read_json_config, rules_body, sanitize_name, sync_rules_file, Transport,
};
use crate::hashing::{hash_file, hash_str};
use crate::links::{link_with_fallback, LinkOutcome};
use crate::result::{Category, SyncResult};
use crate::snapshot::{ConfigSnapshot, McpConfig, RuleFile, ScopedMcpEntry};
use crate::Result;
use anyhow::Context;
use harnessync_state::write_json_atomic;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "opencode.json";
const SCHEMA_URL: &str = "https://opencode.ai/config.json";
const SUPPORTED: &[Transport] = &[Transport::Stdio, Transport::Http];

/// Adapter for OpenCode.
pub struct OpenCodeAdapter {
    project_dir: PathBuf,
}

impl OpenCodeAdapter {
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }

    fn agents_md(&self) -> PathBuf {
        self.project_dir.join("AGENTS.md")
    }

    fn opencode_dir(&self) -> PathBuf {
        self.project_dir.join(".opencode")
    }

    fn config_path(&self) -> PathBuf {
        self.project_dir.join(CONFIG_FILE)
    }

    /// Links every source into `dir`. Files get a `.md` name; skill
    /// directories keep a bare one.
    fn link_all(
        &self,
        dir: &Path,
        sources: &BTreeMap<String, PathBuf>,
        files: bool,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if sources.is_empty() {
            return Ok(result);
        }
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        for (name, source) in sources {
            let target = dir.join(link_name(name, files));
            match link_with_fallback(source, &target) {
                Ok(LinkOutcome::Unchanged) => {
                    result.record_skipped(format!("{name}: already linked"));
                }
                Ok(method) => result.record_synced(format!("{name} ({method})")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        Ok(result)
    }

    /// Reads `opencode.json`, applies `edit` and writes it back with a
    /// `$schema` key.
    fn update_config(&self, edit: impl FnOnce(&mut Map<String, Value>)) -> Result<PathBuf> {
        let path = self.config_path();
        let mut config = read_json_config(&path)?;
        edit(&mut config);
        config
            .entry("$schema")
            .or_insert_with(|| Value::String(SCHEMA_URL.to_string()));
        write_json_atomic(&path, &config)?;
        Ok(path)
    }

    fn write_servers(&self, servers: BTreeMap<String, Value>) -> SyncResult {
        let count = servers.len();
        let outcome = self.update_config(|config| {
            let section = config
                .entry("mcp")
                .or_insert_with(|| Value::Object(Map::new()));
            if !section.is_object() {
                *section = Value::Object(Map::new());
            }
            if let Value::Object(table) = section {
                table.extend(servers);
            }
        });
        match outcome {
            Ok(path) => SyncResult {
                synced: count,
                synced_files: vec![path.display().to_string()],
                ..SyncResult::default()
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to write opencode.json");
                SyncResult {
                    failed: count,
                    failed_files: vec![format!("MCP servers: {e:#}")],
                    ..SyncResult::default()
                }
            }
        }
    }
}

impl TargetAdapter for OpenCodeAdapter {
    fn target_name(&self) -> &str {
        "opencode"
    }

    fn sync_rules(&self, rules: &[RuleFile]) -> Result<SyncResult> {
        sync_rules_file(&self.agents_md(), rules)
    }

    fn sync_skills(&self, skills: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        self.link_all(&self.opencode_dir().join("skills"), skills, false)
    }

    fn sync_agents(&self, agents: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        self.link_all(&self.opencode_dir().join("agents"), agents, true)
    }

    fn sync_commands(&self, commands: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        self.link_all(&self.opencode_dir().join("commands"), commands, true)
    }

    fn sync_mcp(&self, servers: &BTreeMap<String, McpConfig>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut prepared = BTreeMap::new();
        for (name, config) in servers {
            if let Some(server) = prepare_server(name, config, &mut result) {
                prepared.insert(name.clone(), server);
            }
        }
        if !prepared.is_empty() {
            result = result.merge(self.write_servers(prepared));
        }
        Ok(result)
    }

    /// Scope is ignored: there is only the project file.
    fn sync_mcp_scoped(&self, servers: &BTreeMap<String, ScopedMcpEntry>) -> Result<SyncResult> {
        let flat = servers
            .iter()
            .map(|(name, entry)| (name.clone(), entry.config.clone()))
            .collect();
        self.sync_mcp(&flat)
    }

    fn sync_settings(&self, settings: &Map<String, Value>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if settings.is_empty() {
            return Ok(result);
        }
        let permissions = permissions_config(settings);
        let path = self.update_config(|config| {
            config.insert("permissions".into(), Value::Object(permissions));
        })?;
        if settings.get("approval_mode").and_then(Value::as_str) == Some("auto") {
            result.skipped_files.push(
                "yolo mode: not enabled (conservative default, Claude Code had auto-approval)"
                    .to_string(),
            );
        }
        result.record_synced(path.display().to_string());
        result.adapted = 1;
        Ok(result)
    }

    fn managed_paths(&self) -> Vec<PathBuf> {
        vec![self.agents_md(), self.opencode_dir(), self.config_path()]
    }

    fn link_dirs(&self) -> Vec<PathBuf> {
        ["skills", "agents", "commands"]
            .into_iter()
            .map(|d| self.opencode_dir().join(d))
            .collect()
    }

    fn current_items(&self) -> ItemView {
        let mut view = ItemView::new();

        let mut rules = BTreeMap::new();
        if let Some(body) = managed_rules_body(&read_instructions(&self.agents_md())) {
            rules.insert("AGENTS.md".to_string(), body);
        }
        view.insert(Category::Rules, rules);

        let linked = |dir: &str, files: bool| -> BTreeMap<String, String> {
            linked_entries(&self.opencode_dir().join(dir))
                .into_iter()
                .filter(|(_, _, linked)| *linked)
                .map(|(name, path, _)| {
                    let digest = if files {
                        hash_file(&path)
                    } else {
                        hash_file(&path.join("SKILL.md"))
                    };
                    let name = match name.strip_suffix(".md") {
                        Some(stem) if files => stem.to_string(),
                        _ => name,
                    };
                    (name, digest)
                })
                .collect()
        };
        view.insert(Category::Skills, linked("skills", false));
        view.insert(Category::Agents, linked("agents", true));
        view.insert(Category::Commands, linked("commands", true));
        view.insert(Category::Mcp, json_section_fingerprints(&self.config_path(), "mcp"));

        let permissions = read_json_config(&self.config_path())
            .ok()
            .and_then(|mut c| match c.remove("permissions") {
                Some(Value::Object(p)) => Some(p),
                _ => None,
            })
            .unwrap_or_default();
        view.insert(Category::Settings, flatten_permissions(&permissions));
        view
    }

    /// Links and servers are added alongside whatever is there; the
    /// permissions object is rewritten whole.
    fn planned_items(&self, snapshot: &ConfigSnapshot) -> ItemView {
        let mut view = ItemView::new();

        if !snapshot.rule_files.is_empty() {
            view.insert(
                Category::Rules,
                BTreeMap::from([("AGENTS.md".to_string(), rules_body(&snapshot.rule_files))]),
            );
        }

        let skills = snapshot
            .skills
            .iter()
            .map(|(name, dir)| (sanitize_name(name), hash_file(&dir.join("SKILL.md"))))
            .collect();
        view.insert(Category::Skills, skills);
        for (category, sources) in [
            (Category::Agents, &snapshot.agents),
            (Category::Commands, &snapshot.commands),
        ] {
            let items = sources
                .iter()
                .map(|(name, path)| (sanitize_name(name), hash_file(path)))
                .collect();
            view.insert(category, items);
        }

        let mut scratch = SyncResult::new();
        let servers = snapshot
            .mcp_servers_scoped
            .iter()
            .filter_map(|(name, entry)| {
                let server = prepare_server(name, &entry.config, &mut scratch)?;
                Some((name.clone(), hash_str(&server.to_string())))
            })
            .collect();
        view.insert(Category::Mcp, servers);

        let mut planned = overlay_items(self.current_items(), view);
        if !snapshot.settings.is_empty() {
            let permissions = permissions_config(&snapshot.settings);
            planned.insert(Category::Settings, flatten_permissions(&permissions));
        }
        planned
    }
}

fn link_name(name: &str, files: bool) -> String {
    let name = sanitize_name(name);
    if files {
        format!("{name}.md")
    } else {
        name
    }
}

/// OpenCode's entry for one server: `local` with a command array, or
/// `remote` with a URL. SSE servers are skipped.
fn prepare_server(name: &str, config: &McpConfig, result: &mut SyncResult) -> Option<Value> {
    let transport = match check_transport(name, config, "opencode", SUPPORTED) {
        Ok(transport) => transport,
        Err(message) => {
            result.record_skipped(message);
            return None;
        }
    };
    let mut server = Map::new();
    if transport == Transport::Stdio {
        let mut command = vec![config.get("command").cloned().unwrap_or(Value::Null)];
        if let Some(Value::Array(args)) = config.get("args") {
            command.extend(args.iter().cloned());
        }
        server.insert("type".into(), json!("local"));
        server.insert("command".into(), Value::Array(command));
        if let Some(env) = config.get("env") {
            server.insert("environment".into(), env.clone());
        }
    } else {
        server.insert("type".into(), json!("remote"));
        if let Some(url) = config.get("url") {
            server.insert("url".into(), url.clone());
        }
        if let Some(headers) = config.get("headers") {
            server.insert("headers".into(), headers.clone());
        }
    }
    server.insert("enabled".into(), Value::Bool(true));
    Some(Value::Object(server))
}

/// Deny list → `restricted`; allow list alone → `default` with `allowed`;
/// neither → plain `default`.
fn permissions_config(settings: &Map<String, Value>) -> Map<String, Value> {
    let list = |key: &str| {
        settings
            .get("permissions")
            .and_then(|p| p.get(key))
            .and_then(Value::as_array)
            .filter(|l| !l.is_empty())
            .cloned()
    };
    let mut permissions = Map::new();
    match (list("deny"), list("allow")) {
        (Some(deny), _) => {
            permissions.insert("mode".into(), json!("restricted"));
            permissions.insert("denied".into(), Value::Array(deny));
        }
        (None, Some(allow)) => {
            permissions.insert("mode".into(), json!("default"));
            permissions.insert("allowed".into(), Value::Array(allow));
        }
        (None, None) => {
            permissions.insert("mode".into(), json!("default"));
        }
    }
    permissions
}

fn flatten_permissions(permissions: &Map<String, Value>) -> BTreeMap<String, String> {
    permissions
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            (format!("permissions.{key}"), text)
        })
        .collect()
}
