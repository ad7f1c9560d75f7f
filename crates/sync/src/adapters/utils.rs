//! Shared utility functions for target adapters.

use crate::hashing::hash_str;
use crate::links::marker_path;
use crate::result::SyncResult;
use crate::snapshot::{McpConfig, RuleFile};
use crate::Result;
use anyhow::Context;
use harnessync_state::write_atomic;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use time::OffsetDateTime;

pub const MARKER_START: &str = "<!-- Managed by HarnessSync -->";
pub const MARKER_END: &str = "<!-- End HarnessSync managed content -->";
const RULES_HEADING: &str = "# Rules synced from Claude Code";
const SYNCED_FOOTER: &str = "\n\n---\n*Last synced by HarnessSync:";

/// Name and description from a markdown file's YAML front-matter.
///
/// Claude-only keys (`tools`, `color`, `model`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FrontMatter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Splits `content` into parsed front-matter and the body after it.
///
/// Content without a closed `---` block, or with YAML that does not parse,
/// is returned whole with empty front-matter.
pub fn split_front_matter(content: &str) -> (FrontMatter, &str) {
    let Some(after_open) = content.strip_prefix("---\n") else {
        return (FrontMatter::default(), content);
    };
    let (yaml, body) = if let Some(rest) = after_open.strip_prefix("---\n") {
        ("", rest)
    } else if let Some(end) = after_open.find("\n---\n") {
        (&after_open[..end], &after_open[end + 5..])
    } else if let Some(yaml) = after_open.strip_suffix("\n---") {
        (yaml, "")
    } else {
        return (FrontMatter::default(), content);
    };
    if yaml.trim().is_empty() {
        return (FrontMatter::default(), body);
    }
    match serde_yaml::from_str::<FrontMatter>(yaml) {
        Ok(fm) => (fm, body),
        Err(e) => {
            tracing::debug!(
                error = %e,
                "unparseable front-matter; treating file as plain markdown"
            );
            (FrontMatter::default(), content)
        }
    }
}

static ROLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<role>(.*?)</role>").expect("ROLE_RE: compile-time constant")
});

/// Text inside the first `<role>...</role>` block, or the whole body, trimmed.
pub fn extract_role(body: &str) -> &str {
    ROLE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| body.trim())
}

/// Keeps alphanumerics, `-` and `_` so a name is safe as one path segment.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Replaces the block delimited by `start`..`end` in `existing` with `block`,
/// or appends `block` when no complete block is present.
pub fn replace_managed_block(existing: &str, block: &str, start: &str, end: &str) -> String {
    if existing.trim().is_empty() {
        return block.to_string();
    }
    let Some(start_idx) = existing.find(start) else {
        return format!("{}\n\n{block}", existing.trim_end());
    };
    let Some(end_rel) = existing[start_idx..].find(end) else {
        return format!("{}\n\n{block}", existing.trim_end());
    };
    let end_idx = start_idx + end_rel + end.len();
    let before = existing[..start_idx].trim_end();
    let after = existing[end_idx..].trim_start();
    match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{before}\n\n{block}\n\n{after}"),
        (false, true) => format!("{before}\n\n{block}"),
        (true, false) => format!("{block}\n\n{after}"),
        (true, true) => block.to_string(),
    }
}

/// Text strictly between `start` and `end`, if both are present in order.
pub fn managed_block_body<'a>(content: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = content.find(start)? + start.len();
    let len = content[from..].find(end)?;
    Some(&content[from..from + len])
}

/// Rule contents joined by horizontal rules, in source order.
pub fn rules_body(rules: &[RuleFile]) -> String {
    rules
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn format_utc(ts: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

/// The managed rules block written into a target's instruction file.
pub fn render_rules_block(rules: &[RuleFile], ts: OffsetDateTime) -> String {
    format!(
        "{MARKER_START}\n{RULES_HEADING}\n\n{}{SYNCED_FOOTER} {}*\n{MARKER_END}",
        rules_body(rules),
        format_utc(ts)
    )
}

/// Rules text inside the managed block, without heading or footer.
pub fn managed_rules_body(content: &str) -> Option<String> {
    let inner = managed_block_body(content, MARKER_START, MARKER_END)?;
    let body = inner
        .trim_start_matches('\n')
        .strip_prefix(RULES_HEADING)?
        .strip_prefix("\n\n")?;
    let end = body.rfind(SYNCED_FOOTER)?;
    Some(body[..end].to_string())
}

/// Reads an instruction file, treating a missing or unreadable one as empty.
pub fn read_instructions(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "unreadable instruction file; rewriting"
            );
            String::new()
        }
    }
}

/// Writes the managed rules block into the markdown file at `path`, keeping
/// everything outside the markers.
pub fn sync_rules_file(path: &Path, rules: &[RuleFile]) -> Result<SyncResult> {
    let mut result = SyncResult::new();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if rules.is_empty() {
        result.record_skipped(format!("{file_name}: no rules to sync"));
        return Ok(result);
    }

    let block = render_rules_block(rules, harnessync_state::now());
    let existing = read_instructions(path);
    let content = replace_managed_block(&existing, &block, MARKER_START, MARKER_END);
    write_atomic(path, content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    result.record_synced(path.display().to_string());
    result.adapted = rules.len();
    Ok(result)
}

/// How an MCP server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Transport {
    Stdio,
    Sse,
    Http,
    Unknown,
}

impl Transport {
    /// A `command` means stdio; a URL mentioning `sse` means SSE; any other
    /// URL is streamable HTTP.
    pub fn of(config: &McpConfig) -> Self {
        if config.contains_key("command") {
            return Self::Stdio;
        }
        match config.get("url") {
            Some(Value::String(url)) if url.to_ascii_lowercase().contains("sse") => Self::Sse,
            Some(_) => Self::Http,
            None => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's transport, or the skip message when `target` cannot run it.
pub fn check_transport(
    name: &str,
    config: &McpConfig,
    target: &str,
    supported: &[Transport],
) -> std::result::Result<Transport, String> {
    let transport = Transport::of(config);
    if transport == Transport::Unknown {
        return Err(format!(
            "MCP server '{name}': unknown transport (no command or url field)"
        ));
    }
    if supported.contains(&transport) {
        return Ok(transport);
    }
    let mut names: Vec<&str> = supported.iter().map(|t| t.as_str()).collect();
    names.sort_unstable();
    Err(format!(
        "MCP server '{name}': {} transport not supported by {target}. Supported: {}",
        transport.as_str().to_uppercase(),
        names.join(", ")
    ))
}

/// Visible entries of `dir` as (name, path, is a managed link or copy),
/// sorted by name.
pub fn linked_entries(dir: &Path) -> Vec<(String, PathBuf, bool)> {
    let Ok(rd) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<_> = rd
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            let path = e.path();
            let linked = fs::symlink_metadata(&path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
                || marker_path(&path).is_some_and(|m| m.exists());
            Some((name, path, linked))
        })
        .collect();
    entries.sort();
    entries
}

/// Parses a JSON config object. A missing file is an empty object; anything
/// that is not a JSON object is an error so it is never silently clobbered.
pub fn read_json_config(path: &Path) -> Result<Map<String, Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?
    {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} is not a JSON object", path.display()),
    }
}

/// Name -> fingerprint for every entry of the `key` object in a JSON config.
pub fn json_section_fingerprints(path: &Path, key: &str) -> BTreeMap<String, String> {
    let Ok(config) = read_json_config(path) else {
        return BTreeMap::new();
    };
    match config.get(key) {
        Some(Value::Object(section)) => section
            .iter()
            .map(|(name, value)| (name.clone(), hash_str(&value.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "<!-- begin -->";
    const END: &str = "<!-- end -->";

    #[test]
    fn front_matter_is_parsed_and_stripped() {
        let (fm, body) =
            split_front_matter("---\nname: reviewer\ndescription: \"Reviews code\"\ntools: [Read]\n---\nBody\n");
        assert_eq!(fm.name.as_deref(), Some("reviewer"));
        assert_eq!(fm.description.as_deref(), Some("Reviews code"));
        assert_eq!(body, "Body\n");
    }

    #[test]
    fn missing_or_broken_front_matter_returns_content() {
        let (fm, body) = split_front_matter("Just text");
        assert_eq!(fm, FrontMatter::default());
        assert_eq!(body, "Just text");

        let unclosed = "---\nname: x\nno close";
        assert_eq!(split_front_matter(unclosed).1, unclosed);

        let bad_yaml = "---\nname: [unclosed\n---\nbody";
        assert_eq!(split_front_matter(bad_yaml).1, bad_yaml);
    }

    #[test]
    fn role_section_is_preferred() {
        assert_eq!(extract_role("intro\n<ROLE>\n  Do things\n</role>\nrest"), "Do things");
        assert_eq!(extract_role("  plain body \n"), "plain body");
    }

    #[test]
    fn sanitize_name_strips_separators() {
        assert_eq!(sanitize_name("../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("valid-name_123"), "valid-name_123");
        assert_eq!(sanitize_name("with spaces"), "withspaces");
    }

    #[test]
    fn managed_block_replace_preserves_surroundings() {
        let block = format!("{START}\nnew\n{END}");
        assert_eq!(replace_managed_block("", &block, START, END), block);
        assert_eq!(
            replace_managed_block("# Mine\n", &block, START, END),
            format!("# Mine\n\n{block}")
        );

        let existing = format!("# Mine\n\n{START}\nold\n{END}\n\ntrailer\n");
        assert_eq!(
            replace_managed_block(&existing, &block, START, END),
            format!("# Mine\n\n{block}\n\ntrailer\n")
        );

        let corrupted = format!("top\n{START}\ndangling");
        assert_eq!(
            replace_managed_block(&corrupted, &block, START, END),
            format!("{corrupted}\n\n{block}")
        );
    }

    #[test]
    fn managed_block_body_extracts_inner_text() {
        let content = format!("a{START}inner{END}b");
        assert_eq!(managed_block_body(&content, START, END), Some("inner"));
        assert_eq!(managed_block_body("nothing", START, END), None);
    }

    fn mcp(v: Value) -> McpConfig {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn transport_support_messages() {
        let both = &[Transport::Stdio, Transport::Http];
        let sse = mcp(serde_json::json!({"url": "https://x.dev/sse"}));
        assert_eq!(
            check_transport("ctx", &sse, "codex", both).unwrap_err(),
            "MCP server 'ctx': SSE transport not supported by codex. Supported: http, stdio"
        );
        assert_eq!(
            check_transport("ctx", &sse, "gemini", &[Transport::Stdio, Transport::Sse]),
            Ok(Transport::Sse)
        );
        assert_eq!(
            check_transport("x", &mcp(serde_json::json!({"cwd": "/"})), "codex", both)
                .unwrap_err(),
            "MCP server 'x': unknown transport (no command or url field)"
        );
        assert_eq!(
            Transport::of(&mcp(serde_json::json!({"url": "https://x.dev/mcp"}))),
            Transport::Http
        );
    }

    #[test]
    fn rules_block_round_trips_its_body() {
        let rules = [
            RuleFile {
                path: "a".into(),
                label: "a".into(),
                content: "One".into(),
            },
            RuleFile {
                path: "b".into(),
                label: "b".into(),
                content: "Two".into(),
            },
        ];
        let ts = OffsetDateTime::from_unix_timestamp(0).unwrap();
        let block = render_rules_block(&rules, ts);
        assert!(block.starts_with(MARKER_START));
        assert!(block.contains("*Last synced by HarnessSync: 1970-01-01 00:00:00 UTC*"));
        let wrapped = format!("mine\n\n{block}\n\ntail");
        assert_eq!(managed_rules_body(&wrapped).as_deref(), Some("One\n\n---\n\nTwo"));
    }
}
