//! In-memory view of the discovered source configuration.

use harnessync_state::PluginMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Opaque MCP server declaration (`command`/`args`/`env` or `url`/`headers`).
pub type McpConfig = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpScope {
    User,
    Project,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpSource {
    File,
    Plugin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpMetadata {
    pub scope: McpScope,
    pub source: McpSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
}

impl McpMetadata {
    pub fn file(scope: McpScope) -> Self {
        Self {
            scope,
            source: McpSource::File,
            plugin_name: None,
            plugin_version: None,
        }
    }

    pub fn plugin(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            scope: McpScope::User,
            source: McpSource::Plugin,
            plugin_name: Some(name.into()),
            plugin_version: Some(version.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedMcpEntry {
    pub config: McpConfig,
    pub metadata: McpMetadata,
}

/// One rules file with its section label (e.g. `CLAUDE.local.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFile {
    pub path: PathBuf,
    pub label: String,
    pub content: String,
}

/// Everything discovered for one run. Rebuilt every run, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    /// All rule files joined with section headers.
    pub rules: String,
    pub rule_files: Vec<RuleFile>,
    pub skills: BTreeMap<String, PathBuf>,
    pub agents: BTreeMap<String, PathBuf>,
    pub commands: BTreeMap<String, PathBuf>,
    pub mcp_servers: BTreeMap<String, McpConfig>,
    pub mcp_servers_scoped: BTreeMap<String, ScopedMcpEntry>,
    pub settings: Map<String, Value>,
}

/// Drops scope metadata.
pub fn flatten_scoped(scoped: &BTreeMap<String, ScopedMcpEntry>) -> BTreeMap<String, McpConfig> {
    scoped
        .iter()
        .map(|(name, entry)| (name.clone(), entry.config.clone()))
        .collect()
}

impl ConfigSnapshot {
    /// Groups plugin-sourced MCP servers by plugin name.
    pub fn plugin_metadata(&self, now: OffsetDateTime) -> BTreeMap<String, PluginMeta> {
        let mut plugins: BTreeMap<String, PluginMeta> = BTreeMap::new();
        for (server, entry) in &self.mcp_servers_scoped {
            if entry.metadata.source != McpSource::Plugin {
                continue;
            }
            let name = entry
                .metadata
                .plugin_name
                .clone()
                .unwrap_or_else(|| "unknown".into());
            let meta = plugins.entry(name).or_insert_with(|| PluginMeta {
                version: entry
                    .metadata
                    .plugin_version
                    .clone()
                    .unwrap_or_else(|| "unknown".into()),
                mcp_count: 0,
                mcp_servers: Vec::new(),
                last_sync: now,
            });
            meta.mcp_count += 1;
            meta.mcp_servers.push(server.clone());
        }
        plugins
    }

    pub fn is_empty(&self) -> bool {
        self.rule_files.is_empty()
            && self.skills.is_empty()
            && self.agents.is_empty()
            && self.commands.is_empty()
            && self.mcp_servers_scoped.is_empty()
            && self.settings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(v: Value) -> McpConfig {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn plugin_metadata_groups_by_plugin() {
        let mut snap = ConfigSnapshot::default();
        snap.mcp_servers_scoped.insert(
            "a".into(),
            ScopedMcpEntry {
                config: cfg(json!({"command": "a"})),
                metadata: McpMetadata::plugin("ctx", "1.2.0"),
            },
        );
        snap.mcp_servers_scoped.insert(
            "b".into(),
            ScopedMcpEntry {
                config: cfg(json!({"command": "b"})),
                metadata: McpMetadata::plugin("ctx", "1.2.0"),
            },
        );
        snap.mcp_servers_scoped.insert(
            "local".into(),
            ScopedMcpEntry {
                config: cfg(json!({"command": "l"})),
                metadata: McpMetadata::file(McpScope::Local),
            },
        );

        let plugins = snap.plugin_metadata(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(plugins.len(), 1);
        let ctx = &plugins["ctx"];
        assert_eq!(ctx.version, "1.2.0");
        assert_eq!(ctx.mcp_count, 2);
        assert_eq!(ctx.mcp_servers, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn metadata_serializes_without_plugin_fields_for_files() {
        let value = serde_json::to_value(McpMetadata::file(McpScope::Project)).unwrap();
        assert_eq!(value, json!({"scope": "project", "source": "file"}));
    }
}
