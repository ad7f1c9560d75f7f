//! Gemini adapter: writes `GEMINI.md` and `.gemini/settings.json`.
//!
//! Mapping:
//! - rules → managed block in `<project>/GEMINI.md`; text outside the markers
//!   is left alone
//! - skills, agents → inlined into `Skills` / `Agents` subsections of that
//!   file with front-matter stripped, since Gemini has no skill directories
//! - commands → one-line summaries in a `Commands` subsection
//! - MCP servers → `mcpServers` in `settings.json`; project-scope servers go
//!   to `<project>/.gemini/settings.json`, everything else to
//!   `~/.gemini/settings.json`. `${VAR}` references are written as-is,
//!   Gemini expands them itself.
//! - settings → `tools.blockedTools` or `tools.allowedTools`; auto-approval
//!   is never carried over

use super::traits::{overlay_items, ItemView, TargetAdapter};
use super::utils::{
    check_transport, extract_role, json_section_fingerprints, managed_block_body,
    managed_rules_body, read_instructions, read_json_config, render_rules_block,
    replace_managed_block, rules_body, split_front_matter, Transport, MARKER_END, MARKER_START,
};
use crate::hashing::hash_str;
use crate::result::{Category, SyncResult};
use crate::snapshot::{ConfigSnapshot, McpConfig, McpScope, McpSource, RuleFile, ScopedMcpEntry};
use crate::Result;
use anyhow::Context;
use harnessync_state::{write_atomic, write_json_atomic};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const GEMINI_MD: &str = "GEMINI.md";
const SETTINGS_FILE: &str = "settings.json";
const SECTION_SEPARATOR: &str = "\n\n---\n\n";
const SKILL_HEADING: &str = "## Skill: ";
const AGENT_HEADING: &str = "## Agent: ";
const COMMANDS_HEADING: &str = "## Available Commands\n\n";
const SUPPORTED: &[Transport] = &[Transport::Stdio, Transport::Http, Transport::Sse];
const TOOL_KEYS: [&str; 2] = ["blockedTools", "allowedTools"];

/// Marked region inside `GEMINI.md` that one category owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subsection {
    Skills,
    Agents,
    Commands,
}

impl Subsection {
    const ALL: [Subsection; 3] = [Self::Skills, Self::Agents, Self::Commands];

    fn name(self) -> &'static str {
        match self {
            Self::Skills => "Skills",
            Self::Agents => "Agents",
            Self::Commands => "Commands",
        }
    }

    fn start(self) -> String {
        format!("<!-- HarnessSync:{} -->", self.name())
    }

    fn end(self) -> String {
        format!("<!-- End HarnessSync:{} -->", self.name())
    }

    fn wrap(self, body: &str) -> String {
        format!("{}\n{body}\n{}", self.start(), self.end())
    }

    /// Full marked text of this subsection in `content`, markers included.
    fn block_in(self, content: &str) -> Option<String> {
        let body = managed_block_body(content, &self.start(), &self.end())?;
        Some(format!("{}{body}{}", self.start(), self.end()))
    }

    fn body_in(self, content: &str) -> Option<&str> {
        managed_block_body(content, &self.start(), &self.end()).map(|b| b.trim_matches('\n'))
    }
}

/// Adapter for the Gemini CLI.
pub struct GeminiAdapter {
    project_dir: PathBuf,
    user_gemini_dir: PathBuf,
}

impl GeminiAdapter {
    /// User-scope settings live under `~/.gemini`.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let home = harnessync_state::home_dir()?;
        Ok(Self {
            project_dir,
            user_gemini_dir: home.join(".gemini"),
        })
    }

    /// Creates an adapter with an explicit user settings directory (for testing).
    pub fn with_roots(project_dir: PathBuf, user_gemini_dir: PathBuf) -> Self {
        Self {
            project_dir,
            user_gemini_dir,
        }
    }

    fn gemini_md(&self) -> PathBuf {
        self.project_dir.join(GEMINI_MD)
    }

    fn project_settings(&self) -> PathBuf {
        self.project_dir.join(".gemini").join(SETTINGS_FILE)
    }

    fn user_settings(&self) -> PathBuf {
        self.user_gemini_dir.join(SETTINGS_FILE)
    }

    fn write_gemini_md(&self, content: &str) -> Result<PathBuf> {
        let path = self.gemini_md();
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Replaces `section` in `GEMINI.md`. A new subsection goes inside the
    /// managed block when there is one, otherwise at the end of the file.
    fn write_subsection(&self, section: Subsection, body: &str) -> Result<PathBuf> {
        let existing = read_instructions(&self.gemini_md());
        let block = section.wrap(body);
        let (start, end) = (section.start(), section.end());
        let content = match main_block_end(&existing) {
            Some(idx) if !existing.contains(&start) => insert_before(&existing, idx, &block),
            _ => replace_managed_block(&existing, &block, &start, &end),
        };
        self.write_gemini_md(&content)
    }

    fn finish_subsection(
        &self,
        section: Subsection,
        items: Vec<String>,
        separator: &str,
        mut result: SyncResult,
    ) -> Result<SyncResult> {
        if items.is_empty() {
            return Ok(result);
        }
        let mut body = items.join(separator);
        if section == Subsection::Commands {
            body.insert_str(0, COMMANDS_HEADING);
        }
        let path = self.write_subsection(section, &body)?;
        result.synced += items.len();
        result.adapted += items.len();
        result.synced_files.push(path.display().to_string());
        Ok(result)
    }

    fn write_servers(&self, path: &Path, servers: BTreeMap<String, Value>) -> SyncResult {
        let count = servers.len();
        let outcome = read_json_config(path).and_then(|mut settings| {
            let section = settings
                .entry("mcpServers")
                .or_insert_with(|| Value::Object(Map::new()));
            if !section.is_object() {
                *section = Value::Object(Map::new());
            }
            if let Value::Object(table) = section {
                table.extend(servers);
            }
            write_json_atomic(path, &settings)
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
}

impl TargetAdapter for GeminiAdapter {
    fn target_name(&self) -> &str {
        "gemini"
    }

    /// Rewrites the managed block, carrying over the subsections inside it.
    fn sync_rules(&self, rules: &[RuleFile]) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if rules.is_empty() {
            result.record_skipped("GEMINI.md: no rules to sync");
            return Ok(result);
        }

        let existing = read_instructions(&self.gemini_md());
        let mut block = render_rules_block(rules, harnessync_state::now());
        if let Some(inner) = managed_block_body(&existing, MARKER_START, MARKER_END) {
            let kept: Vec<String> = Subsection::ALL
                .iter()
                .filter_map(|s| s.block_in(inner))
                .collect();
            if !kept.is_empty() {
                let idx = block.len() - MARKER_END.len();
                block = insert_before(&block, idx, &kept.join("\n\n"));
            }
        }
        let content = replace_managed_block(&existing, &block, MARKER_START, MARKER_END);
        let path = self.write_gemini_md(&content)?;

        result.record_synced(path.display().to_string());
        result.adapted = rules.len();
        Ok(result)
    }

    fn sync_skills(&self, skills: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut sections = Vec::new();
        for (name, dir) in skills {
            match render_skill(name, dir) {
                Ok(Some((_, section))) => sections.push(section),
                Ok(None) => result.record_skipped(format!("{name}: no SKILL.md")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        self.finish_subsection(Subsection::Skills, sections, SECTION_SEPARATOR, result)
    }

    fn sync_agents(&self, agents: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut sections = Vec::new();
        for (name, path) in agents {
            match render_agent(name, path) {
                Ok(Some((_, section))) => sections.push(section),
                Ok(None) => result.record_skipped(format!("{name}: no role content")),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        self.finish_subsection(Subsection::Agents, sections, SECTION_SEPARATOR, result)
    }

    fn sync_commands(&self, commands: &BTreeMap<String, PathBuf>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut lines = Vec::new();
        for (name, path) in commands {
            match render_command(name, path) {
                Ok((_, line)) => lines.push(line),
                Err(e) => result.record_failed(format!("{name}: {e:#}")),
            }
        }
        self.finish_subsection(Subsection::Commands, lines, "\n", result)
    }

    fn sync_mcp(&self, servers: &BTreeMap<String, McpConfig>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut project = BTreeMap::new();
        for (name, config) in servers {
            if let Some(server) = prepare_server(name, config, &mut result) {
                project.insert(name.clone(), server);
            }
        }
        if !project.is_empty() {
            result = result.merge(self.write_servers(&self.project_settings(), project));
        }
        Ok(result)
    }

    /// Project-scope file servers go to the project settings; user, local
    /// and plugin servers go to the user settings.
    fn sync_mcp_scoped(&self, servers: &BTreeMap<String, ScopedMcpEntry>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        let mut user = BTreeMap::new();
        let mut project = BTreeMap::new();
        for (name, entry) in servers {
            let Some(server) = prepare_server(name, &entry.config, &mut result) else {
                continue;
            };
            let is_project = entry.metadata.scope == McpScope::Project
                && entry.metadata.source == McpSource::File;
            if is_project {
                project.insert(name.clone(), server);
            } else {
                user.insert(name.clone(), server);
            }
        }
        if !user.is_empty() {
            result = result.merge(self.write_servers(&self.user_settings(), user));
        }
        if !project.is_empty() {
            result = result.merge(self.write_servers(&self.project_settings(), project));
        }
        Ok(result)
    }

    fn sync_settings(&self, settings: &Map<String, Value>) -> Result<SyncResult> {
        let mut result = SyncResult::new();
        if settings.is_empty() {
            return Ok(result);
        }
        let path = self.project_settings();
        let mut config = read_json_config(&path)?;
        if let Some(tools) = tools_config(settings) {
            if let Some(Value::Array(blocked)) = tools.get("blockedTools") {
                result.skipped_files.extend(
                    blocked
                        .iter()
                        .map(|t| format!("{}: blocked (Claude Code deny list)", display(t))),
                );
            }
            config.insert("tools".into(), Value::Object(tools));
        }
        if settings.get("approval_mode").and_then(Value::as_str) == Some("auto") {
            result.skipped_files.push(
                "yolo mode: not enabled (conservative default, Claude Code had auto-approval)"
                    .to_string(),
            );
        }
        write_json_atomic(&path, &config)?;
        result.record_synced(path.display().to_string());
        result.adapted = 1;
        Ok(result)
    }

    fn managed_paths(&self) -> Vec<PathBuf> {
        vec![self.gemini_md(), self.project_settings(), self.user_settings()]
    }

    fn current_items(&self) -> ItemView {
        let content = fs::read_to_string(self.gemini_md()).unwrap_or_default();
        let mut view = ItemView::new();

        let mut rules = BTreeMap::new();
        if let Some(body) = managed_rules_body(&content) {
            rules.insert(GEMINI_MD.to_string(), body);
        }
        view.insert(Category::Rules, rules);

        let skills = Subsection::Skills.body_in(&content).unwrap_or("");
        view.insert(Category::Skills, parse_sections(skills, SKILL_HEADING));
        let agents = Subsection::Agents.body_in(&content).unwrap_or("");
        view.insert(Category::Agents, parse_sections(agents, AGENT_HEADING));
        let commands = Subsection::Commands.body_in(&content).unwrap_or("");
        view.insert(Category::Commands, parse_command_lines(commands));

        let mut servers = json_section_fingerprints(&self.user_settings(), "mcpServers");
        servers.extend(json_section_fingerprints(&self.project_settings(), "mcpServers"));
        view.insert(Category::Mcp, servers);

        let tools = read_json_config(&self.project_settings())
            .ok()
            .and_then(|mut c| match c.remove("tools") {
                Some(Value::Object(tools)) => Some(tools),
                _ => None,
            })
            .unwrap_or_default();
        view.insert(Category::Settings, flatten_tools(&tools));
        view
    }

    /// Subsections are rewritten whole, so a category that would be written
    /// replaces what is there; MCP entries are merged.
    fn planned_items(&self, snapshot: &ConfigSnapshot) -> ItemView {
        let mut view = self.current_items();

        if !snapshot.rule_files.is_empty() {
            view.insert(
                Category::Rules,
                BTreeMap::from([(GEMINI_MD.to_string(), rules_body(&snapshot.rule_files))]),
            );
        }

        let sections = |rendered: Vec<(String, String)>| -> BTreeMap<String, String> {
            rendered
                .into_iter()
                .map(|(name, text)| (name, hash_str(&text)))
                .collect()
        };
        let skills: Vec<_> = snapshot
            .skills
            .iter()
            .filter_map(|(name, dir)| render_skill(name, dir).ok().flatten())
            .collect();
        let agents: Vec<_> = snapshot
            .agents
            .iter()
            .filter_map(|(name, path)| render_agent(name, path).ok().flatten())
            .collect();
        let commands: Vec<_> = snapshot
            .commands
            .iter()
            .filter_map(|(name, path)| render_command(name, path).ok())
            .collect();
        for (category, rendered) in [
            (Category::Skills, skills),
            (Category::Agents, agents),
            (Category::Commands, commands),
        ] {
            if !rendered.is_empty() {
                view.insert(category, sections(rendered));
            }
        }

        if !snapshot.settings.is_empty() {
            if let Some(tools) = tools_config(&snapshot.settings) {
                view.insert(Category::Settings, flatten_tools(&tools));
            }
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
        overlay_items(view, ItemView::from([(Category::Mcp, servers)]))
    }
}

/// Offset of the managed block's end marker, when a complete block exists.
fn main_block_end(content: &str) -> Option<usize> {
    let start = content.find(MARKER_START)?;
    content[start..].find(MARKER_END).map(|rel| start + rel)
}

fn insert_before(content: &str, idx: usize, extra: &str) -> String {
    format!("{}\n\n{extra}\n\n{}", content[..idx].trim_end(), &content[idx..])
}

/// (display name, inlined section) for a skill, or `None` without `SKILL.md`.
fn render_skill(name: &str, dir: &Path) -> Result<Option<(String, String)>> {
    let skill_md = dir.join("SKILL.md");
    if !skill_md.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&skill_md)
        .with_context(|| format!("Failed to read {}", skill_md.display()))?;
    let (fm, body) = split_front_matter(&content);
    let title = fm.name.unwrap_or_else(|| name.to_string());
    let mut section = format!("{SKILL_HEADING}{title}\n\n");
    if let Some(description) = fm.description.filter(|d| !d.is_empty()) {
        section.push_str(&format!("**Purpose:** {description}\n\n"));
    }
    section.push_str(body.trim());
    Ok(Some((title, section)))
}

/// (display name, inlined section) for an agent, or `None` when it has no
/// role content.
fn render_agent(name: &str, path: &Path) -> Result<Option<(String, String)>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("file not found at {}", path.display()))?;
    let (fm, body) = split_front_matter(&content);
    let role = extract_role(body);
    if role.is_empty() {
        return Ok(None);
    }
    let title = fm.name.unwrap_or_else(|| name.to_string());
    let mut section = format!("{AGENT_HEADING}{title}\n\n");
    if let Some(description) = fm.description.filter(|d| !d.is_empty()) {
        section.push_str(&format!("**Description:** {description}\n\n"));
    }
    section.push_str(role);
    Ok(Some((title, section)))
}

/// (display name, summary line) for a command.
fn render_command(name: &str, path: &Path) -> Result<(String, String)> {
    let content =
        fs::read_to_string(path).with_context(|| format!("file not found at {}", path.display()))?;
    let (fm, _) = split_front_matter(&content);
    let title = fm.name.unwrap_or_else(|| name.to_string());
    let description = fm
        .description
        .unwrap_or_else(|| format!("Claude Code command: {name}"));
    let line = format!("- **/{title}**: {description}");
    Ok((title, line))
}

/// Splits a subsection body back into its `heading`-led sections.
fn parse_sections(body: &str, heading: &str) -> BTreeMap<String, String> {
    let Some(first) = body.strip_prefix(heading) else {
        return BTreeMap::new();
    };
    let separator = format!("{SECTION_SEPARATOR}{heading}");
    first
        .split(separator.as_str())
        .map(|piece| {
            let title = piece.lines().next().unwrap_or_default().to_string();
            (title, hash_str(&format!("{heading}{piece}")))
        })
        .collect()
}

fn parse_command_lines(body: &str) -> BTreeMap<String, String> {
    body.lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("- **/")?;
            let (title, _) = rest.split_once("**: ")?;
            Some((title.to_string(), hash_str(line)))
        })
        .collect()
}

/// Gemini's entry for one server, or `None` (with a note in `result`) when
/// the transport cannot be determined.
fn prepare_server(name: &str, config: &McpConfig, result: &mut SyncResult) -> Option<Value> {
    let transport = match check_transport(name, config, "gemini", SUPPORTED) {
        Ok(transport) => transport,
        Err(message) => {
            result.record_skipped(message);
            return None;
        }
    };
    let mut server = Map::new();
    let url = config.get("url").cloned();
    match (transport, url) {
        (Transport::Sse, Some(url)) => {
            server.insert("url".into(), url);
        }
        (Transport::Http, Some(url)) => {
            server.insert("httpUrl".into(), url);
        }
        _ => {
            for key in ["command", "args", "env", "timeout"] {
                if let Some(value) = config.get(key) {
                    server.insert(key.into(), value.clone());
                }
            }
        }
    }
    if transport != Transport::Stdio {
        if let Some(headers) = config.get("headers") {
            server.insert("headers".into(), headers.clone());
        }
    }
    Some(Value::Object(server))
}

/// `tools` section implied by Claude Code permissions. A deny list wins
/// over an allow list; with neither there is nothing to write.
fn tools_config(settings: &Map<String, Value>) -> Option<Map<String, Value>> {
    let permissions = settings.get("permissions")?;
    let list = |key: &str| {
        permissions
            .get(key)
            .and_then(Value::as_array)
            .filter(|l| !l.is_empty())
            .cloned()
    };
    let (key, tools) = match (list("deny"), list("allow")) {
        (Some(deny), _) => ("blockedTools", deny),
        (None, Some(allow)) => ("allowedTools", allow),
        (None, None) => return None,
    };
    Some(Map::from_iter([(key.to_string(), Value::Array(tools))]))
}

fn flatten_tools(tools: &Map<String, Value>) -> BTreeMap<String, String> {
    TOOL_KEYS
        .into_iter()
        .filter_map(|key| {
            let list = tools.get(key)?.as_array()?;
            let joined = list.iter().map(display).collect::<Vec<_>>().join(", ");
            Some((format!("tools.{key}"), joined))
        })
        .collect()
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::McpMetadata;
    use serde_json::json;
    use tempfile::tempdir;

    fn adapter(root: &Path) -> GeminiAdapter {
        let project = root.join("project");
        fs::create_dir_all(&project).unwrap();
        GeminiAdapter::with_roots(project, root.join("home/.gemini"))
    }

    fn rule(content: &str) -> RuleFile {
        RuleFile {
            path: PathBuf::from("CLAUDE.md"),
            label: "CLAUDE.md".into(),
            content: content.into(),
        }
    }

    fn cfg(v: Value) -> McpConfig {
        v.as_object().cloned().unwrap()
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn write_skill(root: &Path, name: &str, content: &str) -> PathBuf {
        let dir = root.join("skills").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SKILL.md"), content).unwrap();
        dir
    }

    #[test]
    fn skills_are_inlined_inside_the_managed_block() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        fs::write(a.gemini_md(), "# Mine\n").unwrap();
        a.sync_rules(&[rule("Be brief")]).unwrap();

        let skill = write_skill(
            tmp.path(),
            "deploy",
            "---\nname: deploy\ndescription: Ships it\n---\n\nRun the pipeline.\n",
        );
        let result = a
            .sync_skills(&BTreeMap::from([("deploy".to_string(), skill)]))
            .unwrap();
        assert_eq!((result.synced, result.adapted), (1, 1));

        let content = fs::read_to_string(a.gemini_md()).unwrap();
        assert!(content.starts_with("# Mine\n\n<!-- Managed by HarnessSync -->"));
        assert!(content.contains(
            "<!-- HarnessSync:Skills -->\n## Skill: deploy\n\n**Purpose:** Ships it\n\nRun the pipeline.\n<!-- End HarnessSync:Skills -->"
        ));
        assert!(!content.contains("description: Ships it"));
        let skills_at = content.find("<!-- HarnessSync:Skills -->").unwrap();
        assert!(skills_at < content.find(MARKER_END).unwrap());

        // A rules rewrite keeps the subsection.
        a.sync_rules(&[rule("Be thorough")]).unwrap();
        let content = fs::read_to_string(a.gemini_md()).unwrap();
        assert!(content.contains("Be thorough"));
        assert!(!content.contains("Be brief"));
        assert_eq!(content.matches("<!-- HarnessSync:Skills -->").count(), 1);
        assert_eq!(managed_rules_body(&content).as_deref(), Some("Be thorough"));
    }

    #[test]
    fn agents_use_role_section_and_commands_become_summaries() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        let agent = tmp.path().join("reviewer.md");
        fs::write(
            &agent,
            "---\nname: reviewer\ndescription: Reviews diffs\n---\nIntro\n<role>\nCheck every hunk.\n</role>\n",
        )
        .unwrap();
        let empty = tmp.path().join("empty.md");
        fs::write(&empty, "   \n").unwrap();
        let command = tmp.path().join("ship.md");
        fs::write(&command, "Ship the release.").unwrap();

        let agents = a
            .sync_agents(&BTreeMap::from([
                ("reviewer".to_string(), agent),
                ("empty".to_string(), empty),
            ]))
            .unwrap();
        assert_eq!((agents.synced, agents.skipped), (1, 1));
        a.sync_commands(&BTreeMap::from([("ship".to_string(), command)]))
            .unwrap();

        // No managed block yet, so both subsections are appended.
        let content = fs::read_to_string(a.gemini_md()).unwrap();
        assert!(content.starts_with(
            "<!-- HarnessSync:Agents -->\n## Agent: reviewer\n\n**Description:** Reviews diffs\n\nCheck every hunk.\n"
        ));
        assert!(content.contains(
            "<!-- HarnessSync:Commands -->\n## Available Commands\n\n- **/ship**: Claude Code command: ship\n<!-- End HarnessSync:Commands -->"
        ));
    }

    #[test]
    fn scoped_mcp_routes_by_scope_and_keeps_env_references() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        fs::create_dir_all(tmp.path().join("home/.gemini")).unwrap();
        fs::write(
            a.user_settings(),
            r#"{"theme": "dark", "mcpServers": {"mine": {"command": "mine"}}}"#,
        )
        .unwrap();

        let entry = |v: Value, metadata: McpMetadata| ScopedMcpEntry {
            config: cfg(v),
            metadata,
        };
        let servers = BTreeMap::from([
            (
                "local-tool".to_string(),
                entry(
                    json!({"command": "tool", "args": ["--key", "${TOOL_KEY}"], "cwd": "/x"}),
                    McpMetadata::file(McpScope::Local),
                ),
            ),
            (
                "team".to_string(),
                entry(
                    json!({"url": "https://team.dev/mcp", "headers": {"X-Team": "1"}}),
                    McpMetadata::file(McpScope::Project),
                ),
            ),
            (
                "events".to_string(),
                entry(
                    json!({"url": "https://events.dev/sse"}),
                    McpMetadata::plugin("events", "1.0.0"),
                ),
            ),
        ]);
        let result = a.sync_mcp_scoped(&servers).unwrap();
        assert_eq!((result.synced, result.skipped), (3, 0));

        let user = read_json(&a.user_settings());
        assert_eq!(user["theme"], "dark");
        assert_eq!(user["mcpServers"]["mine"]["command"], "mine");
        assert_eq!(
            user["mcpServers"]["local-tool"],
            json!({"command": "tool", "args": ["--key", "${TOOL_KEY}"]})
        );
        assert_eq!(user["mcpServers"]["events"], json!({"url": "https://events.dev/sse"}));

        let project = read_json(&a.project_settings());
        assert_eq!(
            project["mcpServers"]["team"],
            json!({"httpUrl": "https://team.dev/mcp", "headers": {"X-Team": "1"}})
        );
    }

    #[test]
    fn corrupt_settings_fail_without_clobbering() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        fs::create_dir_all(a.project_settings().parent().unwrap()).unwrap();
        fs::write(a.project_settings(), "{ not json").unwrap();

        let result = a
            .sync_mcp(&BTreeMap::from([("x".to_string(), cfg(json!({"command": "x"})))]))
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(fs::read_to_string(a.project_settings()).unwrap(), "{ not json");
    }

    #[test]
    fn deny_list_blocks_tools_and_auto_approval_is_not_carried() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        let settings = cfg(json!({
            "permissions": {"allow": ["Read"], "deny": ["Bash", "Write"]},
            "approval_mode": "auto"
        }));
        let result = a.sync_settings(&settings).unwrap();
        assert_eq!(result.synced, 1);
        assert!(result
            .skipped_files
            .contains(&"Bash: blocked (Claude Code deny list)".to_string()));
        assert!(result.skipped_files.iter().any(|f| f.starts_with("yolo mode")));

        let written = read_json(&a.project_settings());
        assert_eq!(written["tools"], json!({"blockedTools": ["Bash", "Write"]}));
        assert!(written.get("yolo").is_none());

        a.sync_settings(&cfg(json!({"permissions": {"allow": ["Read"]}})))
            .unwrap();
        assert_eq!(
            read_json(&a.project_settings())["tools"],
            json!({"allowedTools": ["Read"]})
        );
    }

    #[test]
    fn planned_matches_current_after_sync_and_keeps_foreign_servers() {
        let tmp = tempdir().unwrap();
        let a = adapter(tmp.path());
        fs::create_dir_all(tmp.path().join("home/.gemini")).unwrap();
        fs::write(a.user_settings(), r#"{"mcpServers": {"mine": {"command": "mine"}}}"#).unwrap();

        let mut snapshot = ConfigSnapshot {
            rule_files: vec![rule("Be brief")],
            ..ConfigSnapshot::default()
        };
        snapshot.skills.insert(
            "deploy".into(),
            write_skill(tmp.path(), "deploy", "---\nname: deploy\n---\nShip.\n"),
        );
        snapshot.skills.insert(
            "lint".into(),
            write_skill(tmp.path(), "lint", "Lint it.\n\n---\n\nCarefully.\n"),
        );
        let command = tmp.path().join("ship.md");
        fs::write(&command, "---\ndescription: Ship it\n---\nGo.").unwrap();
        snapshot.commands.insert("ship".into(), command);
        snapshot.settings = cfg(json!({"permissions": {"deny": ["Bash"]}}));
        snapshot.mcp_servers_scoped.insert(
            "ctx".into(),
            ScopedMcpEntry {
                config: cfg(json!({"command": "ctx", "args": ["serve"]})),
                metadata: McpMetadata::file(McpScope::User),
            },
        );

        let preview = crate::diff::preview(&a, &snapshot);
        assert!(preview.changes[&Category::Mcp].removed.is_empty());
        assert_eq!(preview.changes[&Category::Skills].added, vec!["deploy", "lint"]);

        a.sync_all(&snapshot);
        assert_eq!(a.planned_items(&snapshot), a.current_items());
        assert!(a.current_items()[&Category::Mcp].contains_key("mine"));
    }
}
