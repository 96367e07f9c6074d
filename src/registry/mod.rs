//! Registry collaborators consumed by the replication engine
//!
//! The engine never speaks a registry wire protocol itself. It depends on two
//! small contracts: a [`Copier`] that moves one image between references, and
//! a [`RegistryClient`] that lists repositories and tags and can create
//! destination repositories.

pub mod copier;
pub mod inventory;

pub use copier::CommandCopier;
pub use inventory::{InventoryRegistryClient, RegistryInventory};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Fully qualified image reference: `registry/repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.trim_end_matches('/');
        if registry.is_empty() {
            write!(f, "{}:{}", self.repository, self.tag)
        } else {
            write!(f, "{}/{}:{}", registry, self.repository, self.tag)
        }
    }
}

/// Byte-level image copier.
///
/// Must be safe to call concurrently from several workers with distinct
/// references, and must return promptly once `cancel` fires.
#[async_trait]
pub trait Copier: Send + Sync {
    /// Copy `source` to `destination`, returning the number of bytes moved.
    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Repository and tag discovery for one registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Registry host used when building image references
    fn registry_name(&self) -> &str;

    /// Repositories at or below `prefix` (all repositories for an empty prefix)
    async fn list_repositories(&self, prefix: &str) -> Result<Vec<String>>;

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    async fn repository_exists(&self, repository: &str) -> Result<bool>;

    async fn create_repository(&self, repository: &str) -> Result<()>;
}
