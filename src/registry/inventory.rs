//! Registry client backed by a static inventory
//!
//! The inventory is a JSON document listing repositories and their tags. It
//! stands in for live catalog listing when the source registry does not expose
//! one, and doubles as the in-memory registry used by tests.

use super::RegistryClient;
use crate::error::{ReplicationError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

/// Serialized form: `{"registry": "...", "repositories": {"repo": ["tag", ...]}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryInventory {
    pub registry: String,
    #[serde(default)]
    pub repositories: BTreeMap<String, Vec<String>>,
}

#[derive(Debug)]
pub struct InventoryRegistryClient {
    name: String,
    repositories: RwLock<BTreeMap<String, Vec<String>>>,
}

impl InventoryRegistryClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repositories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_inventory(inventory: RegistryInventory) -> Self {
        Self {
            name: inventory.registry,
            repositories: RwLock::new(inventory.repositories),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReplicationError::Io(format!("Failed to read inventory {}: {}", path.display(), e))
        })?;
        let inventory: RegistryInventory = serde_json::from_str(&content)?;
        Ok(Self::from_inventory(inventory))
    }

    pub fn with_repository<I, S>(self, repository: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut repositories) = self.repositories.write() {
            repositories.insert(repository.into(), tags.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Current snapshot of the inventory
    pub fn inventory(&self) -> Result<RegistryInventory> {
        Ok(RegistryInventory {
            registry: self.name.clone(),
            repositories: self.read()?.clone(),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<String>>>> {
        self.repositories
            .read()
            .map_err(|_| ReplicationError::Registry("inventory lock poisoned".to_string()))
    }

    fn under_prefix(repository: &str, prefix: &str) -> bool {
        let prefix = prefix.trim_matches('/');
        prefix.is_empty()
            || repository == prefix
            || repository
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[async_trait]
impl RegistryClient for InventoryRegistryClient {
    fn registry_name(&self) -> &str {
        &self.name
    }

    async fn list_repositories(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .keys()
            .filter(|repository| Self::under_prefix(repository, prefix))
            .cloned()
            .collect())
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.read()?
            .get(repository)
            .cloned()
            .ok_or_else(|| {
                ReplicationError::NotFound(format!("repository {} in {}", repository, self.name))
            })
    }

    async fn repository_exists(&self, repository: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(repository))
    }

    async fn create_repository(&self, repository: &str) -> Result<()> {
        let mut repositories = self
            .repositories
            .write()
            .map_err(|_| ReplicationError::Registry("inventory lock poisoned".to_string()))?;
        repositories.entry(repository.to_string()).or_default();
        Ok(())
    }
}
