//! Account registry persisted at `~/.harnesssync/accounts.json`.
//!
//! An account maps one Claude Code configuration directory to a set of
//! per-target output directories, much like named CLI profiles.

use crate::atomic::write_json_atomic;
use crate::env;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").expect("NAME_RE: compile-time constant")
});

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account name must be non-empty")]
    EmptyName,
    #[error(
        "invalid account name '{0}': use letters, digits, '-' or '_', starting with a letter or digit"
    )]
    InvalidName(String),
    #[error("source path does not exist: {0}")]
    MissingSource(PathBuf),
    #[error("{}", .0.join("; "))]
    TargetCollision(Vec<String>),
    #[error("account '{0}' does not exist")]
    UnknownAccount(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSource {
    pub path: PathBuf,
    #[serde(default = "default_source_scope")]
    pub scope: String,
}

fn default_source_scope() -> String {
    "user".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub source: AccountSource,
    /// Target name -> output directory.
    #[serde(default)]
    pub targets: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryDoc {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    default_account: Option<String>,
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
}

fn default_version() -> u32 {
    1
}

impl Default for RegistryDoc {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_account: None,
            accounts: BTreeMap::new(),
        }
    }
}

pub fn validate_account_name(name: &str) -> Result<(), AccountError> {
    if name.is_empty() {
        return Err(AccountError::EmptyName);
    }
    if !NAME_RE.is_match(name) {
        return Err(AccountError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub struct AccountRegistry {
    path: PathBuf,
    doc: RegistryDoc,
}

impl AccountRegistry {
    /// Loads the registry in `dir`. Missing or malformed files start empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("accounts.json");
        let doc = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read accounts: {}", path.display()))?;
            serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring malformed account registry"
                );
                RegistryDoc::default()
            })
        } else {
            RegistryDoc::default()
        };
        Ok(Self { path, doc })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(env::harnessync_dir()?)
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.doc)
    }

    /// Messages describing target directories already claimed by other accounts.
    pub fn target_collisions(
        &self,
        name: &str,
        targets: &BTreeMap<String, PathBuf>,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        for (other, account) in &self.doc.accounts {
            if other == name {
                continue;
            }
            for (target, path) in targets {
                if account.targets.get(target) == Some(path) {
                    errors.push(format!(
                        "target path collision: {target} path {} already used by account '{other}'",
                        path.display()
                    ));
                }
            }
        }
        errors
    }

    /// Adds or replaces an account. The first account becomes the default.
    pub fn add(
        &mut self,
        name: &str,
        source: &Path,
        targets: BTreeMap<String, PathBuf>,
    ) -> Result<()> {
        validate_account_name(name)?;
        if !source.is_dir() {
            return Err(AccountError::MissingSource(source.to_path_buf()).into());
        }
        let collisions = self.target_collisions(name, &targets);
        if !collisions.is_empty() {
            return Err(AccountError::TargetCollision(collisions).into());
        }

        self.doc.accounts.insert(
            name.to_string(),
            Account {
                source: AccountSource {
                    path: source.to_path_buf(),
                    scope: default_source_scope(),
                },
                targets,
            },
        );
        if self.doc.default_account.is_none() {
            self.doc.default_account = Some(name.to_string());
        }
        tracing::info!(account = name, "account saved");
        self.save()
    }

    /// Removes an account, promoting the first remaining one to default when needed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.doc.accounts.remove(name).is_none() {
            return Ok(false);
        }
        if self.doc.default_account.as_deref() == Some(name) {
            self.doc.default_account = self.doc.accounts.keys().next().cloned();
        }
        self.save()?;
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&Account> {
        self.doc.accounts.get(name)
    }

    /// Account names in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.doc.accounts.keys().cloned().collect()
    }

    pub fn default_account(&self) -> Option<&str> {
        self.doc.default_account.as_deref()
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.doc.accounts.contains_key(name) {
            return Err(AccountError::UnknownAccount(name.to_string()).into());
        }
        self.doc.default_account = Some(name.to_string());
        self.save()
    }

    pub fn has_accounts(&self) -> bool {
        !self.doc.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn targets(pairs: &[(&str, &Path)]) -> BTreeMap<String, PathBuf> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_path_buf()))
            .collect()
    }

    #[test]
    fn name_validation() {
        assert!(validate_account_name("work").is_ok());
        assert!(validate_account_name("work_2-b").is_ok());
        assert!(matches!(
            validate_account_name(""),
            Err(AccountError::EmptyName)
        ));
        assert!(matches!(
            validate_account_name("-lead"),
            Err(AccountError::InvalidName(_))
        ));
        assert!(matches!(
            validate_account_name("has space"),
            Err(AccountError::InvalidName(_))
        ));
    }

    #[test]
    fn first_account_becomes_default_and_persists() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("claude-work");
        fs::create_dir_all(&source).unwrap();
        let out = tmp.path().join("codex-work");

        let mut reg = AccountRegistry::open(tmp.path()).unwrap();
        assert!(!reg.has_accounts());
        reg.add("work", &source, targets(&[("codex", &out)]))
            .unwrap();

        let reopened = AccountRegistry::open(tmp.path()).unwrap();
        assert_eq!(reopened.default_account(), Some("work"));
        let acc = reopened.get("work").unwrap();
        assert_eq!(acc.source.path, source);
        assert_eq!(acc.source.scope, "user");
        assert_eq!(acc.targets["codex"], out);
    }

    #[test]
    fn missing_source_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut reg = AccountRegistry::open(tmp.path()).unwrap();
        let err = reg
            .add("work", &tmp.path().join("nope"), BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("source path does not exist"));
    }

    #[test]
    fn target_collision_is_rejected_but_self_update_allowed() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        let shared = tmp.path().join("shared-codex");

        let mut reg = AccountRegistry::open(tmp.path()).unwrap();
        reg.add("a", &source, targets(&[("codex", &shared)])).unwrap();
        reg.add("a", &source, targets(&[("codex", &shared)])).unwrap();

        let err = reg
            .add("b", &source, targets(&[("codex", &shared)]))
            .unwrap_err();
        assert!(err.to_string().contains("already used by account 'a'"));
        assert_eq!(reg.list(), vec!["a".to_string()]);
    }

    #[test]
    fn removing_default_promotes_next() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();

        let mut reg = AccountRegistry::open(tmp.path()).unwrap();
        reg.add("alpha", &source, BTreeMap::new()).unwrap();
        reg.add("beta", &source, BTreeMap::new()).unwrap();
        assert!(reg.remove("alpha").unwrap());
        assert_eq!(reg.default_account(), Some("beta"));
        assert!(!reg.remove("alpha").unwrap());
        assert!(reg.set_default("ghost").is_err());
    }

    #[test]
    fn malformed_file_starts_empty() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("accounts.json"), "[1, 2").unwrap();
        let reg = AccountRegistry::open(tmp.path()).unwrap();
        assert!(!reg.has_accounts());
        assert_eq!(reg.default_account(), None);
    }
}
