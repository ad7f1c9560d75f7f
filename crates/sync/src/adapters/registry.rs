//! Explicit, owned mapping from target keys to adapter factories.

use super::codex::CodexAdapter;
use super::gemini::GeminiAdapter;
use super::opencode::OpenCodeAdapter;
use super::traits::TargetAdapter;
use crate::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Builds an adapter bound to a project directory.
pub type AdapterFactory = Arc<dyn Fn(&Path) -> Result<Box<dyn TargetAdapter>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("target key must not be empty")]
    EmptyKey,
    #[error("adapter registered as '{key}' reports target name '{reported}'")]
    NameMismatch { key: String, reported: String },
    #[error("adapter factory for '{key}' failed: {source:#}")]
    Factory {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unknown target '{0}'")]
    UnknownTarget(String),
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("targets", &self.targets())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the shipped adapters.
    pub fn with_builtin() -> std::result::Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register("codex", |project: &Path| {
            Ok(Box::new(CodexAdapter::new(project.to_path_buf())?) as Box<dyn TargetAdapter>)
        })?;
        registry.register("gemini", |project: &Path| {
            Ok(Box::new(GeminiAdapter::new(project.to_path_buf())?) as Box<dyn TargetAdapter>)
        })?;
        registry.register("opencode", |project: &Path| {
            Ok(Box::new(OpenCodeAdapter::new(project.to_path_buf())) as Box<dyn TargetAdapter>)
        })?;
        Ok(registry)
    }

    /// Binds `key` to `factory`, replacing any earlier binding.
    ///
    /// One sample instance is built right away; registration fails if that
    /// instance cannot be built or reports a different target name.
    pub fn register<F>(&mut self, key: &str, factory: F) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&Path) -> Result<Box<dyn TargetAdapter>> + Send + Sync + 'static,
    {
        if key.trim().is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        let sample = factory(&std::env::temp_dir()).map_err(|source| RegistryError::Factory {
            key: key.to_string(),
            source,
        })?;
        if sample.target_name() != key {
            return Err(RegistryError::NameMismatch {
                key: key.to_string(),
                reported: sample.target_name().to_string(),
            });
        }
        if self
            .factories
            .insert(key.to_string(), Arc::new(factory))
            .is_some()
        {
            tracing::debug!(target = key, "replaced existing adapter registration");
        }
        Ok(())
    }

    pub fn get(
        &self,
        key: &str,
        project_dir: &Path,
    ) -> std::result::Result<Box<dyn TargetAdapter>, RegistryError> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| RegistryError::UnknownTarget(key.to_string()))?;
        factory(project_dir).map_err(|source| RegistryError::Factory {
            key: key.to_string(),
            source,
        })
    }

    /// Registered keys, sorted.
    pub fn targets(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
