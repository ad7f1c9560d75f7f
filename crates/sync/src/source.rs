//! Discovery of Claude Code configuration across user and project scopes.
//!
//! Layout read for the user scope (rooted at the Claude Code home, normally
//! `~/.claude`):
//! - `CLAUDE.md`, `skills/<name>/SKILL.md`, `agents/*.md`, `commands/*.md`
//! - `settings.json` (including `enabledPlugins`)
//! - `plugins/installed_plugins.json` and each plugin's install directory
//! - `~/.claude.json` for user (`mcpServers`) and local
//!   (`projects[<abs project>].mcpServers`) MCP servers
//!
//! For the project scope: `CLAUDE.md`, `CLAUDE.local.md`, `.claude/CLAUDE.md`,
//! `.claude/{skills,agents,commands}`, `.mcp.json` and
//! `.claude/settings{,.local}.json`.
//!
//! Nothing here fails on missing or malformed input; such files are logged and
//! skipped.

use crate::result::Category;
use crate::scope::Scope;
use crate::snapshot::{ConfigSnapshot, McpConfig, McpMetadata, McpScope, RuleFile, ScopedMcpEntry};
use crate::Result;
use harnessync_state::env;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const USER_RULES_HEADER: &str = "# [User-level rules from ~/.claude/CLAUDE.md]";
const RULES_SEPARATOR: &str = "\n\n---\n\n";
const PLUGIN_ROOT_VAR: &str = "${CLAUDE_PLUGIN_ROOT}";
const PROJECT_RULE_FILES: [&str; 3] = ["CLAUDE.md", "CLAUDE.local.md", ".claude/CLAUDE.md"];

impl RuleFile {
    /// The file's content under its section header.
    pub fn section(&self) -> String {
        if self.label == "~/.claude/CLAUDE.md" {
            format!("{USER_RULES_HEADER}\n\n{}", self.content)
        } else {
            format!("# [Project rules from {}]\n\n{}", self.label, self.content)
        }
    }
}

/// One installed plugin as recorded in `installed_plugins.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInstall {
    /// Registry key, e.g. `context7@claude-plugins`.
    pub key: String,
    /// Key up to the first `@`.
    pub name: String,
    pub install_path: PathBuf,
    pub version: String,
    pub scope: Option<String>,
}

/// Reads configuration for one scope filter, project, and Claude Code home.
#[derive(Debug, Clone)]
pub struct SourceReader {
    scope: Scope,
    project_dir: Option<PathBuf>,
    cc_home: PathBuf,
    home: PathBuf,
}

impl SourceReader {
    /// `cc_home` defaults to `~/.claude`.
    pub fn new(
        scope: Scope,
        project_dir: Option<PathBuf>,
        cc_home: Option<PathBuf>,
    ) -> Result<Self> {
        let home = env::home_dir()?;
        let cc_home = cc_home.unwrap_or_else(|| home.join(".claude"));
        Ok(Self {
            scope,
            project_dir,
            cc_home,
            home,
        })
    }

    /// Overrides the directory holding `.claude.json`.
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn cc_home(&self) -> &Path {
        &self.cc_home
    }

    fn project(&self) -> Option<&Path> {
        if self.scope.includes_project() {
            self.project_dir.as_deref()
        } else {
            None
        }
    }

    fn user(&self) -> bool {
        self.scope.includes_user()
    }

    fn claude_json(&self) -> PathBuf {
        self.home.join(".claude.json")
    }

    fn user_settings_path(&self) -> PathBuf {
        self.cc_home.join("settings.json")
    }

    fn plugin_registry_path(&self) -> PathBuf {
        self.cc_home.join("plugins").join("installed_plugins.json")
    }

    // --- rules ---

    pub fn rule_files(&self) -> Vec<RuleFile> {
        let mut rules = Vec::new();
        if self.user() {
            let path = self.cc_home.join("CLAUDE.md");
            if let Some(content) = read_text(&path) {
                rules.push(RuleFile {
                    path,
                    label: "~/.claude/CLAUDE.md".into(),
                    content,
                });
            }
        }
        if let Some(project) = self.project() {
            for rel in PROJECT_RULE_FILES {
                let path = project.join(rel);
                if let Some(content) = read_text(&path) {
                    rules.push(RuleFile {
                        path,
                        label: rel.into(),
                        content,
                    });
                }
            }
        }
        rules
    }

    /// All rule files joined with section headers and `---` separators.
    pub fn rules(&self) -> String {
        join_rules(&self.rule_files())
    }

    // --- skills / agents / commands ---

    /// Skill name to directory. A directory counts only if it holds `SKILL.md`.
    pub fn skills(&self) -> BTreeMap<String, PathBuf> {
        let mut skills = BTreeMap::new();
        if self.user() {
            collect_skills(&self.cc_home.join("skills"), &mut skills);
            for plugin in self.enabled_plugins() {
                if plugin.scope.as_deref() == Some("user") {
                    collect_skills(&plugin.install_path.join("skills"), &mut skills);
                }
            }
        }
        if let Some(project) = self.project() {
            collect_skills(&project.join(".claude").join("skills"), &mut skills);
        }
        skills
    }

    pub fn agents(&self) -> BTreeMap<String, PathBuf> {
        self.markdown_items("agents")
    }

    pub fn commands(&self) -> BTreeMap<String, PathBuf> {
        self.markdown_items("commands")
    }

    fn markdown_items(&self, dir: &str) -> BTreeMap<String, PathBuf> {
        let mut items = BTreeMap::new();
        if self.user() {
            collect_markdown(&self.cc_home.join(dir), &mut items);
        }
        if let Some(project) = self.project() {
            collect_markdown(&project.join(".claude").join(dir), &mut items);
        }
        items
    }

    // --- plugins ---

    /// Plugin keys whose `enabledPlugins` value in user settings is `false`.
    fn disabled_plugins(&self) -> BTreeSet<String> {
        read_json_object(&self.user_settings_path())
            .and_then(|s| s.get("enabledPlugins").and_then(Value::as_object).cloned())
            .map(|ep| {
                ep.into_iter()
                    .filter(|(_, v)| v == &Value::Bool(false))
                    .map(|(k, _)| k)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Installed plugins, accepting both the keyed and the list registry shapes.
    pub fn plugin_installs(&self) -> Vec<PluginInstall> {
        let Some(registry) = read_json_object(&self.plugin_registry_path()) else {
            return Vec::new();
        };
        let mut installs = Vec::new();
        match registry.get("plugins") {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    let entries = match value {
                        Value::Array(list) => list.iter().collect::<Vec<_>>(),
                        other => vec![other],
                    };
                    for entry in entries {
                        if let Some(install) = parse_install(key, entry) {
                            installs.push(install);
                        }
                    }
                }
            }
            Some(Value::Array(list)) => {
                for entry in list {
                    let key = entry
                        .get("name")
                        .or_else(|| entry.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    if let Some(install) = parse_install(&key, entry) {
                        installs.push(install);
                    }
                }
            }
            _ => {}
        }
        installs
    }

    fn enabled_plugins(&self) -> Vec<PluginInstall> {
        let disabled = self.disabled_plugins();
        self.plugin_installs()
            .into_iter()
            .filter(|p| {
                if disabled.contains(&p.key) {
                    tracing::debug!(plugin = %p.key, "skipping disabled plugin");
                    return false;
                }
                p.install_path.exists()
            })
            .collect()
    }

    fn plugin_servers(&self, plugin: &PluginInstall) -> BTreeMap<String, McpConfig> {
        let mut declared = Map::new();
        if let Some(data) = read_json_object(&plugin.install_path.join(".mcp.json")) {
            match data.get("mcpServers") {
                Some(Value::Object(wrapped)) => declared.extend(wrapped.clone()),
                _ => declared.extend(data),
            }
        }
        for manifest in [
            plugin.install_path.join(".claude-plugin").join("plugin.json"),
            plugin.install_path.join("plugin.json"),
        ] {
            if !manifest.exists() {
                continue;
            }
            if let Some(Value::Object(inline)) =
                read_json_object(&manifest).and_then(|m| m.get("mcpServers").cloned())
            {
                declared.extend(inline);
            }
            break;
        }

        let root = plugin.install_path.to_string_lossy();
        valid_servers(&declared)
            .into_iter()
            .map(|(name, config)| {
                let mut value = Value::Object(config);
                expand_var(&mut value, PLUGIN_ROOT_VAR, &root);
                let config = match value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                (name, config)
            })
            .collect()
    }

    // --- MCP ---

    fn user_mcp(&self) -> BTreeMap<String, McpConfig> {
        read_json_object(&self.claude_json())
            .and_then(|d| d.get("mcpServers").and_then(Value::as_object).cloned())
            .map(|m| valid_servers(&m))
            .unwrap_or_default()
    }

    fn project_mcp(&self, project: &Path) -> BTreeMap<String, McpConfig> {
        read_json_object(&project.join(".mcp.json"))
            .and_then(|d| d.get("mcpServers").and_then(Value::as_object).cloned())
            .map(|m| valid_servers(&m))
            .unwrap_or_default()
    }

    fn local_mcp(&self, project: &Path) -> BTreeMap<String, McpConfig> {
        let key = project
            .canonicalize()
            .unwrap_or_else(|_| project.to_path_buf())
            .to_string_lossy()
            .into_owned();
        read_json_object(&self.claude_json())
            .and_then(|d| {
                d.get("projects")?
                    .get(&key)?
                    .get("mcpServers")?
                    .as_object()
                    .cloned()
            })
            .map(|m| valid_servers(&m))
            .unwrap_or_default()
    }

    /// MCP servers tagged with scope and source.
    ///
    /// Layers, each overwriting same-named earlier entries: user file,
    /// plugins (only where no user file entry exists), project `.mcp.json`,
    /// local `~/.claude.json` project entry.
    pub fn mcp_servers_scoped(&self) -> BTreeMap<String, ScopedMcpEntry> {
        let mut servers = BTreeMap::new();

        if self.user() {
            for (name, config) in self.user_mcp() {
                servers.insert(
                    name,
                    ScopedMcpEntry {
                        config,
                        metadata: McpMetadata::file(McpScope::User),
                    },
                );
            }
            for plugin in self.enabled_plugins() {
                for (name, config) in self.plugin_servers(&plugin) {
                    if servers.contains_key(&name) {
                        tracing::debug!(
                            server = %name,
                            plugin = %plugin.name,
                            "user file entry shadows plugin server"
                        );
                        continue;
                    }
                    servers.insert(
                        name,
                        ScopedMcpEntry {
                            config,
                            metadata: McpMetadata::plugin(&plugin.name, &plugin.version),
                        },
                    );
                }
            }
        }

        if let Some(project) = self.project() {
            for (name, config) in self.project_mcp(project) {
                servers.insert(
                    name,
                    ScopedMcpEntry {
                        config,
                        metadata: McpMetadata::file(McpScope::Project),
                    },
                );
            }
            for (name, config) in self.local_mcp(project) {
                servers.insert(
                    name,
                    ScopedMcpEntry {
                        config,
                        metadata: McpMetadata::file(McpScope::Local),
                    },
                );
            }
        }
        servers
    }

    pub fn mcp_servers(&self) -> BTreeMap<String, McpConfig> {
        crate::snapshot::flatten_scoped(&self.mcp_servers_scoped())
    }

    // --- settings ---

    /// User, then project, then project-local settings; later top-level keys win.
    pub fn settings(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for path in self.settings_paths() {
            if let Some(obj) = read_json_object(&path) {
                merged.extend(obj);
            }
        }
        merged
    }

    fn settings_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if self.user() {
            paths.push(self.user_settings_path());
        }
        if let Some(project) = self.project() {
            paths.push(project.join(".claude").join("settings.json"));
            paths.push(project.join(".claude").join("settings.local.json"));
        }
        paths
    }

    pub fn discover_all(&self) -> ConfigSnapshot {
        let rule_files = self.rule_files();
        let scoped = self.mcp_servers_scoped();
        let snapshot = ConfigSnapshot {
            rules: join_rules(&rule_files),
            rule_files,
            skills: self.skills(),
            agents: self.agents(),
            commands: self.commands(),
            mcp_servers: crate::snapshot::flatten_scoped(&scoped),
            mcp_servers_scoped: scoped,
            settings: self.settings(),
        };
        tracing::debug!(
            scope = %self.scope,
            rules = snapshot.rule_files.len(),
            skills = snapshot.skills.len(),
            agents = snapshot.agents.len(),
            commands = snapshot.commands.len(),
            mcp = snapshot.mcp_servers_scoped.len(),
            "discovered source configuration"
        );
        snapshot
    }

    /// Existing source files per category, used as the drift baseline.
    ///
    /// Skills contribute their `SKILL.md` file rather than the directory.
    pub fn source_paths(&self) -> BTreeMap<Category, Vec<PathBuf>> {
        let mut paths: BTreeMap<Category, Vec<PathBuf>> = BTreeMap::new();
        paths.insert(
            Category::Rules,
            self.rule_files().into_iter().map(|r| r.path).collect(),
        );
        paths.insert(
            Category::Skills,
            self.skills()
                .into_values()
                .map(|dir| dir.join("SKILL.md"))
                .collect(),
        );
        paths.insert(Category::Agents, self.agents().into_values().collect());
        paths.insert(Category::Commands, self.commands().into_values().collect());

        let mut mcp = Vec::new();
        if self.user() {
            mcp.push(self.claude_json());
        }
        if let Some(project) = self.project() {
            mcp.push(project.join(".mcp.json"));
        }
        paths.insert(
            Category::Mcp,
            mcp.into_iter().filter(|p| p.is_file()).collect(),
        );
        paths.insert(
            Category::Settings,
            self.settings_paths()
                .into_iter()
                .filter(|p| p.is_file())
                .collect(),
        );
        paths
    }
}

fn join_rules(rules: &[RuleFile]) -> String {
    rules
        .iter()
        .map(RuleFile::section)
        .collect::<Vec<_>>()
        .join(RULES_SEPARATOR)
}

fn parse_install(key: &str, entry: &Value) -> Option<PluginInstall> {
    let obj = entry.as_object()?;
    let install_path = obj.get("installPath").and_then(Value::as_str)?;
    if install_path.is_empty() {
        return None;
    }
    Some(PluginInstall {
        key: key.to_string(),
        name: key.split('@').next().unwrap_or(key).to_string(),
        install_path: PathBuf::from(install_path),
        version: obj
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        scope: obj.get("scope").and_then(Value::as_str).map(str::to_string),
    })
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Keeps object entries that declare a `command` or a `url`.
fn valid_servers(map: &Map<String, Value>) -> BTreeMap<String, McpConfig> {
    map.iter()
        .filter_map(|(name, config)| {
            let obj = config.as_object()?;
            if is_truthy(obj.get("command")) || is_truthy(obj.get("url")) {
                Some((name.clone(), obj.clone()))
            } else {
                tracing::debug!(server = %name, "dropping MCP entry without command or url");
                None
            }
        })
        .collect()
}

fn expand_var(value: &mut Value, var: &str, replacement: &str) {
    match value {
        Value::String(s) if s.contains(var) => *s = s.replace(var, replacement),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| expand_var(v, var, replacement)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| expand_var(v, var, replacement)),
        _ => {}
    }
}

fn read_text(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            None
        }
    }
}

/// Parses a JSON object file; missing, unreadable, or non-object input yields `None`.
fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let text = read_text(path)?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "expected a JSON object; ignoring file");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping malformed JSON");
            None
        }
    }
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    match fs::read_dir(dir) {
        Ok(rd) => {
            let mut entries: Vec<PathBuf> = rd.filter_map(|e| e.ok()).map(|e| e.path()).collect();
            entries.sort();
            entries
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
            Vec::new()
        }
    }
}

fn collect_skills(dir: &Path, out: &mut BTreeMap<String, PathBuf>) {
    for path in sorted_entries(dir) {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if path.is_dir() && path.join("SKILL.md").is_file() {
            out.insert(name, path);
        }
    }
}

fn collect_markdown(dir: &Path, out: &mut BTreeMap<String, PathBuf>) {
    for path in sorted_entries(dir) {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if is_hidden_name(&name) || !path.is_file() {
            continue;
        }
        if path.extension().is_some_and(|e| e == "md") {
            if let Some(stem) = path.file_stem() {
                out.insert(stem.to_string_lossy().into_owned(), path);
            }
        }
    }
}

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".cache",
    "Library",
    "Applications",
    ".npm",
    ".cargo",
    ".venv",
    "__pycache__",
    ".Trash",
    ".local",
    ".pyenv",
    ".nvm",
    ".rbenv",
    ".docker",
    ".vagrant",
    ".gradle",
    "Downloads",
    "Documents",
    "Desktop",
    "Pictures",
    "Music",
    "Movies",
    ".Spotlight-V100",
    ".fseventsd",
    ".vol",
];

const CLAUDE_HOME_MARKERS: &[&str] = &[
    "settings.json",
    "CLAUDE.md",
    "skills",
    "agents",
    "commands",
    ".mcp.json",
    "plugins",
];

/// Finds `.claude*` directories under `home`, sorted by name.
///
/// Only hidden directories directly under `home` are descended into, and
/// never past `max_depth`.
pub fn discover_claude_homes(home: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut it = WalkDir::new(home)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter();
    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry during home scan");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if EXCLUDED_DIRS.contains(&name.as_ref()) {
            it.skip_current_dir();
            continue;
        }
        if name.starts_with(".claude") {
            found.push(entry.path().to_path_buf());
            it.skip_current_dir();
            continue;
        }
        if !(entry.depth() == 1 && is_hidden_name(&name)) {
            it.skip_current_dir();
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    found
}

/// Whether `path` looks like a Claude Code home (contains any known marker).
pub fn is_claude_home(path: &Path) -> bool {
    path.is_dir() && CLAUDE_HOME_MARKERS.iter().any(|m| path.join(m).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use harnessync_test_utils::TestFixture;
    use serde_json::json;

    fn reader(fx: &TestFixture, scope: Scope) -> SourceReader {
        SourceReader {
            scope,
            project_dir: Some(fx.project.clone()),
            cc_home: fx.claude_home.clone(),
            home: fx.home.clone(),
        }
    }

    #[test]
    fn rules_are_joined_with_headers() {
        let fx = TestFixture::new().unwrap();
        fx.write_user_rules("user rule").unwrap();
        fx.write_project_file("CLAUDE.md", "project rule").unwrap();
        fx.write_project_file(".claude/CLAUDE.md", "nested rule")
            .unwrap();

        let rules = reader(&fx, Scope::All).rules();
        assert_eq!(
            rules,
            "# [User-level rules from ~/.claude/CLAUDE.md]\n\nuser rule\n\n---\n\n\
             # [Project rules from CLAUDE.md]\n\nproject rule\n\n---\n\n\
             # [Project rules from .claude/CLAUDE.md]\n\nnested rule"
        );
        assert_eq!(reader(&fx, Scope::User).rule_files().len(), 1);
        assert_eq!(reader(&fx, Scope::Project).rule_files().len(), 2);
    }

    #[test]
    fn skills_require_skill_md_and_project_wins() {
        let fx = TestFixture::new().unwrap();
        fx.create_skill("shared", "user").unwrap();
        fs::create_dir_all(fx.claude_home.join("skills/empty")).unwrap();
        let project_skill = fx.create_project_skill("shared", "project").unwrap();

        let skills = reader(&fx, Scope::All).skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills["shared"], project_skill);
    }

    #[test]
    fn agents_and_commands_filter_hidden_and_non_markdown() {
        let fx = TestFixture::new().unwrap();
        fx.write_agent("reviewer", "body").unwrap();
        fs::write(fx.claude_home.join("agents/.draft.md"), "x").unwrap();
        fs::write(fx.claude_home.join("agents/notes.txt"), "x").unwrap();
        fs::create_dir_all(fx.claude_home.join("agents/dir.md")).unwrap();
        fx.write_command("deploy", "run").unwrap();

        let r = reader(&fx, Scope::All);
        assert_eq!(r.agents().keys().collect::<Vec<_>>(), vec!["reviewer"]);
        assert_eq!(r.commands().keys().collect::<Vec<_>>(), vec!["deploy"]);
    }

    #[test]
    fn mcp_precedence_local_over_project_over_user() {
        let fx = TestFixture::new().unwrap();
        fx.write_user_and_local_mcp(
            json!({
                "shared": {"command": "user-cmd"},
                "user-only": {"command": "u"},
                "broken": {"args": ["no command"]}
            }),
            json!({"shared": {"command": "local-cmd"}}),
        )
        .unwrap();
        fx.write_project_mcp(json!({
            "shared": {"command": "project-cmd"},
            "proj-only": {"url": "https://example.test/mcp"}
        }))
        .unwrap();

        let scoped = reader(&fx, Scope::All).mcp_servers_scoped();
        assert_eq!(scoped["shared"].config["command"], "local-cmd");
        assert_eq!(scoped["shared"].metadata.scope, McpScope::Local);
        assert_eq!(scoped["user-only"].metadata.scope, McpScope::User);
        assert_eq!(scoped["proj-only"].metadata.scope, McpScope::Project);
        assert!(!scoped.contains_key("broken"));

        let user_only = reader(&fx, Scope::User).mcp_servers_scoped();
        assert_eq!(user_only["shared"].config["command"], "user-cmd");
    }

    #[test]
    fn plugin_servers_are_tagged_expanded_and_yield_to_user_file() {
        let fx = TestFixture::new().unwrap();
        let install = fx
            .install_plugin(
                "context7",
                "market",
                "1.4.0",
                json!({
                    "ctx": {"command": "${CLAUDE_PLUGIN_ROOT}/bin/ctx", "args": ["--root", "${CLAUDE_PLUGIN_ROOT}"]},
                    "taken": {"command": "plugin"}
                }),
            )
            .unwrap();
        fx.write_claude_json(&json!({"mcpServers": {"taken": {"command": "file"}}}))
            .unwrap();

        let scoped = reader(&fx, Scope::User).mcp_servers_scoped();
        let ctx = &scoped["ctx"];
        assert_eq!(ctx.metadata, McpMetadata::plugin("context7", "1.4.0"));
        let root = install.to_string_lossy();
        assert_eq!(ctx.config["command"], format!("{root}/bin/ctx"));
        assert_eq!(ctx.config["args"][1], &*root);
        assert_eq!(scoped["taken"].config["command"], "file");
        assert_eq!(scoped["taken"].metadata, McpMetadata::file(McpScope::User));
    }

    #[test]
    fn disabled_plugins_are_skipped() {
        let fx = TestFixture::new().unwrap();
        fx.install_plugin("off", "market", "1.0.0", json!({"off-srv": {"command": "x"}}))
            .unwrap();
        fx.write_user_settings(&json!({"enabledPlugins": {"off@market": false}}))
            .unwrap();
        assert!(reader(&fx, Scope::All).mcp_servers_scoped().is_empty());
    }

    #[test]
    fn settings_merge_later_wins() {
        let fx = TestFixture::new().unwrap();
        fx.write_user_settings(&json!({"a": 1, "b": 1})).unwrap();
        fx.write_project_settings("settings.json", &json!({"b": 2, "c": 2}))
            .unwrap();
        fx.write_project_settings("settings.local.json", &json!({"c": 3}))
            .unwrap();

        let settings = reader(&fx, Scope::All).settings();
        assert_eq!(Value::Object(settings), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let fx = TestFixture::new().unwrap();
        fs::write(fx.home.join(".claude.json"), "{oops").unwrap();
        fs::write(fx.claude_home.join("settings.json"), "[1,2]").unwrap();
        let r = reader(&fx, Scope::All);
        assert!(r.mcp_servers().is_empty());
        assert!(r.settings().is_empty());
    }

    #[test]
    fn source_paths_list_existing_files() {
        let fx = TestFixture::new().unwrap();
        let rules = fx.write_user_rules("r").unwrap();
        let skill = fx.create_skill("s", "x").unwrap();
        fx.write_project_mcp(json!({"p": {"command": "p"}})).unwrap();

        let paths = reader(&fx, Scope::All).source_paths();
        assert_eq!(paths[&Category::Rules], vec![rules]);
        assert_eq!(paths[&Category::Skills], vec![skill.join("SKILL.md")]);
        assert_eq!(paths[&Category::Mcp], vec![fx.project.join(".mcp.json")]);
        assert!(paths[&Category::Settings].is_empty());
    }

    #[test]
    fn discovers_claude_homes_without_descending_excluded_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path();
        fs::create_dir_all(home.join(".claude")).unwrap();
        fs::create_dir_all(home.join(".claude-work/skills")).unwrap();
        fs::create_dir_all(home.join(".config/.claude-nested")).unwrap();
        fs::create_dir_all(home.join("node_modules/.claude-hidden")).unwrap();
        fs::create_dir_all(home.join("code/.claude-deep")).unwrap();

        let found = discover_claude_homes(home, 2);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![".claude", ".claude-nested", ".claude-work"]);

        assert!(is_claude_home(&home.join(".claude-work")));
        assert!(!is_claude_home(&home.join(".claude")));
    }
}
