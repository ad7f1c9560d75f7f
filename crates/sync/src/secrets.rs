//! Keyword plus value-shape heuristic for secrets in MCP environment maps.
//!
//! Detections carry the variable name and matched keywords only. Values are
//! never stored, logged or formatted.

use crate::snapshot::McpConfig;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const SECRET_KEYWORDS: &[&str] = &[
    "API_KEY",
    "APIKEY",
    "API-KEY",
    "SECRET",
    "SECRET_KEY",
    "PASSWORD",
    "PASSWD",
    "PWD",
    "TOKEN",
    "ACCESS_TOKEN",
    "AUTH_TOKEN",
    "PRIVATE_KEY",
];

/// Matched only as a whole `_`/`-` separated token, so `KEY` and `DB_KEY`
/// match but `KEYBOARD_LAYOUT` does not.
const TOKEN_KEYWORDS: &[&str] = &["KEY"];

const SAFE_PREFIXES: &[&str] = &["TEST_", "EXAMPLE_", "DEMO_", "MOCK_", "FAKE_", "DUMMY_"];

static SECRET_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-+=/.]{16,}$").expect("SECRET_VALUE_RE: compile-time constant")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Medium,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretDetection {
    pub var_name: String,
    pub keywords_matched: Vec<String>,
    pub confidence: Confidence,
    pub reason: String,
}

fn matched_keywords(name: &str) -> Vec<String> {
    let upper = name.to_ascii_uppercase();
    let mut matched: Vec<String> = SECRET_KEYWORDS
        .iter()
        .filter(|k| upper.contains(*k))
        .map(|k| (*k).to_string())
        .collect();
    for token in TOKEN_KEYWORDS {
        if upper.split(['_', '-']).any(|t| t == *token) {
            matched.push((*token).to_string());
        }
    }
    matched
}

/// Flags variables whose name carries a secret keyword and whose value looks
/// like a credential.
pub fn scan<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<SecretDetection> {
    let mut detections = Vec::new();
    for (name, value) in vars {
        let upper = name.to_ascii_uppercase();
        if SAFE_PREFIXES.iter().any(|p| upper.starts_with(p)) {
            continue;
        }
        let keywords = matched_keywords(name);
        if keywords.is_empty() || !SECRET_VALUE_RE.is_match(value) {
            continue;
        }
        tracing::debug!(var = name, "possible secret in MCP environment");
        detections.push(SecretDetection {
            var_name: name.to_string(),
            reason: format!("Contains keywords: {}", keywords.join(", ")),
            keywords_matched: keywords,
            confidence: Confidence::Medium,
        });
    }
    detections
}

/// Scans the string values of every server's `env` map.
///
/// Servers are merged into one map first, so a name set by several servers
/// is checked once with the last server's value.
pub fn scan_mcp_env(servers: &BTreeMap<String, McpConfig>) -> Vec<SecretDetection> {
    let mut merged: BTreeMap<&str, &str> = BTreeMap::new();
    for config in servers.values() {
        if let Some(Value::Object(env)) = config.get("env") {
            for (name, value) in env {
                if let Value::String(value) = value {
                    merged.insert(name.as_str(), value.as_str());
                }
            }
        }
    }
    scan(merged)
}

pub fn should_block(detections: &[SecretDetection], allow_secrets: bool) -> bool {
    !detections.is_empty() && !allow_secrets
}

pub fn format_warnings(detections: &[SecretDetection]) -> String {
    if detections.is_empty() {
        return String::new();
    }
    let mut lines = vec![format!(
        "\n⚠ Detected {} potential secret(s) in environment variables:",
        detections.len()
    )];
    for d in detections {
        lines.push(format!("  · {}: {}", d.var_name, d.reason));
    }
    lines.push("\nSecrets should not be synced to target configs.".to_string());
    lines.push("Use --allow-secrets to override this warning (NOT recommended).".to_string());
    lines.join("\n")
}
