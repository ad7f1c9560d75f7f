//! Recognizes edits that should trigger an automatic sync.

use serde::Deserialize;
use serde_json::Value;

const CONFIG_PATTERNS: &[&str] = &[
    "CLAUDE.md",
    ".mcp.json",
    "/skills/",
    "/agents/",
    "/commands/",
    "settings.json",
    "settings.local.json",
];

/// True when `path` names a Claude Code configuration file.
pub fn is_config_file(path: &str) -> bool {
    !path.is_empty() && CONFIG_PATTERNS.iter().any(|p| path.contains(p))
}

/// Tool-use event delivered to the post-edit hook on stdin.
#[derive(Debug, Default, Deserialize)]
pub struct HookEvent {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Value,
}

impl HookEvent {
    /// Parses the event; malformed input yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        serde_json::from_str(input).ok()
    }

    pub fn file_path(&self) -> &str {
        self.tool_input
            .get("file_path")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn touches_config(&self) -> bool {
        is_config_file(self.file_path())
    }
}
