//! Shared test utilities for harnessync crates.
//!
//! Provides env-var guards and a fixture that lays out a fake home directory
//! (with `~/.claude/`) next to a fake project directory.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

/// Serialize tests that mutate process-global state (env vars, cwd, etc).
///
/// Acquire this guard at the start of any test that modifies environment
/// variables to prevent race conditions between parallel tests.
pub fn env_guard() -> MutexGuard<'static, ()> {
    static TEST_SERIAL: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));
    TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// RAII guard for environment variables - restores original value on drop.
pub struct EnvVarGuard {
    key: &'static str,
    previous: Option<String>,
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        if let Some(v) = &self.previous {
            std::env::set_var(self.key, v);
        } else {
            std::env::remove_var(self.key);
        }
    }
}

/// Set an environment variable and return a guard that restores the original on drop.
///
/// # Example
/// ```
/// let _guard = harnessync_test_utils::set_env_var("MY_VAR", Some("value"));
/// // MY_VAR is set to "value"
/// // When _guard drops, MY_VAR is restored to its original value
/// ```
pub fn set_env_var(key: &'static str, value: Option<&str>) -> EnvVarGuard {
    let previous = std::env::var(key).ok();
    if let Some(val) = value {
        std::env::set_var(key, val);
    } else {
        std::env::remove_var(key);
    }
    EnvVarGuard { key, previous }
}

/// Fake home plus project directory.
///
/// Layout inside the tempdir:
/// - `home/` (use as `$HOME`), with `home/.claude/` as the Claude Code home
/// - `project/`
/// - `state/` for `HARNESSYNC_HOME`
pub struct TestFixture {
    pub tempdir: tempfile::TempDir,
    pub home: PathBuf,
    pub claude_home: PathBuf,
    pub project: PathBuf,
    pub state_dir: PathBuf,
}

impl TestFixture {
    /// Does NOT set HOME env var - use `home_guard()` for that.
    pub fn new() -> std::io::Result<Self> {
        let tempdir = tempfile::tempdir()?;
        let home = tempdir.path().join("home");
        let claude_home = home.join(".claude");
        let project = tempdir.path().join("project");
        let state_dir = tempdir.path().join("state");

        std::fs::create_dir_all(&claude_home)?;
        std::fs::create_dir_all(&project)?;
        std::fs::create_dir_all(&state_dir)?;

        Ok(Self {
            tempdir,
            home,
            claude_home,
            project,
            state_dir,
        })
    }

    pub fn home_path(&self) -> &Path {
        &self.home
    }

    /// Create an RAII guard that sets HOME to this fixture's fake home.
    pub fn home_guard(&self) -> EnvVarGuard {
        set_env_var("HOME", Some(self.home.to_str().unwrap()))
    }

    fn write(&self, path: &Path, content: &str) -> std::io::Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(path.to_path_buf())
    }

    fn write_json(&self, path: &Path, value: &Value) -> std::io::Result<PathBuf> {
        self.write(path, &serde_json::to_string_pretty(value).unwrap())
    }

    /// Writes `~/.claude/CLAUDE.md`.
    pub fn write_user_rules(&self, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.claude_home.join("CLAUDE.md"), content)
    }

    /// Writes a file relative to the project root (e.g. `CLAUDE.md`).
    pub fn write_project_file(&self, rel: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(&self.project.join(rel), content)
    }

    /// Creates `~/.claude/skills/<name>/SKILL.md`. Returns the skill directory.
    pub fn create_skill(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let dir = self.claude_home.join("skills").join(name);
        self.write(&dir.join("SKILL.md"), content)?;
        Ok(dir)
    }

    /// Create a skill with standard frontmatter.
    pub fn create_skill_with_frontmatter(
        &self,
        name: &str,
        description: &str,
        body: &str,
    ) -> std::io::Result<PathBuf> {
        let content = format!(
            "---\nname: {}\ndescription: {}\n---\n{}",
            name, description, body
        );
        self.create_skill(name, &content)
    }

    /// Creates `<project>/.claude/skills/<name>/SKILL.md`.
    pub fn create_project_skill(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let dir = self.project.join(".claude/skills").join(name);
        self.write(&dir.join("SKILL.md"), content)?;
        Ok(dir)
    }

    pub fn write_agent(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(
            &self.claude_home.join("agents").join(format!("{name}.md")),
            content,
        )
    }

    pub fn write_command(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        self.write(
            &self.claude_home.join("commands").join(format!("{name}.md")),
            content,
        )
    }

    /// Writes `~/.claude.json` with the given document.
    pub fn write_claude_json(&self, value: &Value) -> std::io::Result<PathBuf> {
        self.write_json(&self.home.join(".claude.json"), value)
    }

    /// Writes `~/.claude.json` with user-scope servers and local-scope servers
    /// keyed by the canonical project path.
    pub fn write_user_and_local_mcp(&self, user: Value, local: Value) -> std::io::Result<PathBuf> {
        let key = self
            .project
            .canonicalize()?
            .to_string_lossy()
            .into_owned();
        self.write_claude_json(&json!({
            "mcpServers": user,
            "projects": { key: { "mcpServers": local } }
        }))
    }

    /// Writes `<project>/.mcp.json` wrapping `servers` in `mcpServers`.
    pub fn write_project_mcp(&self, servers: Value) -> std::io::Result<PathBuf> {
        self.write_json(&self.project.join(".mcp.json"), &json!({ "mcpServers": servers }))
    }

    /// Writes `~/.claude/settings.json`.
    pub fn write_user_settings(&self, value: &Value) -> std::io::Result<PathBuf> {
        self.write_json(&self.claude_home.join("settings.json"), value)
    }

    /// Writes `<project>/.claude/<file>` (e.g. `settings.local.json`).
    pub fn write_project_settings(&self, file: &str, value: &Value) -> std::io::Result<PathBuf> {
        self.write_json(&self.project.join(".claude").join(file), value)
    }

    /// Installs a plugin under `~/.claude/plugins/cache/<name>` declaring
    /// `servers` in its `.mcp.json`, and registers it in
    /// `installed_plugins.json` as `<name>@<marketplace>`.
    ///
    /// Returns the install path.
    pub fn install_plugin(
        &self,
        name: &str,
        marketplace: &str,
        version: &str,
        servers: Value,
    ) -> std::io::Result<PathBuf> {
        let install = self.claude_home.join("plugins/cache").join(name);
        std::fs::create_dir_all(&install)?;
        self.write_json(&install.join(".mcp.json"), &json!({ "mcpServers": servers }))?;

        let registry_path = self.claude_home.join("plugins/installed_plugins.json");
        let mut registry: Value = std::fs::read_to_string(&registry_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| json!({ "version": 2, "plugins": {} }));
        registry["plugins"][format!("{name}@{marketplace}")] = json!([{
            "scope": "user",
            "installPath": install.to_string_lossy(),
            "version": version,
        }]);
        self.write_json(&registry_path, &registry)?;
        Ok(install)
    }
}
