//! Checkpoint persistence
//!
//! Read-modify-write updates run under a per-checkpoint lock so concurrent
//! repository completions never lose each other's changes, and the file store
//! replaces checkpoint files atomically so a reader or a crash never sees a
//! half-written document.

use super::types::{CHECKPOINT_FORMAT_VERSION, Checkpoint, RepoStatus, RunStatus};
use crate::error::{ReplicationError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

const CHECKPOINT_EXTENSION: &str = "json";

fn already_exists(id: &str) -> ReplicationError {
    ReplicationError::Checkpoint(format!("checkpoint {} already exists", id))
}

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Held per-checkpoint lock. Dropping it removes the table entry once no
/// other task holds or waits on the same lock.
struct IdLock<'a> {
    table: &'a LockTable,
    id: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let ours = table.get(&self.id).is_some_and(|entry| Arc::ptr_eq(entry, &self.lock));
        // The table entry plus ours: nobody else is waiting.
        if ours && Arc::strong_count(&self.lock) == 2 {
            table.remove(&self.id);
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, replacing any previous version.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Checkpoint>;

    /// Every stored checkpoint, most recently updated first.
    async fn list(&self) -> Result<Vec<Checkpoint>>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Atomically change one repository's status and return the new state.
    async fn update_repo_status(
        &self,
        id: &str,
        repository: &str,
        status: RepoStatus,
        error: Option<String>,
    ) -> Result<Checkpoint>;

    /// Atomically change the run-level status.
    async fn update_run_status(&self, id: &str, status: RunStatus, error: Option<String>) -> Result<()>;

    /// Register a new checkpoint. Fails if the ID is taken; the check and the
    /// write happen under one lock, so concurrent creates yield one winner.
    async fn create(&self, checkpoint: Checkpoint) -> Result<Checkpoint>;

    /// Portable JSON form of a stored checkpoint
    async fn export(&self, id: &str) -> Result<String> {
        let checkpoint = self.load(id).await?;
        Ok(serde_json::to_string_pretty(&checkpoint)?)
    }

    /// Register a checkpoint from its exported form.
    async fn import(&self, data: &str) -> Result<Checkpoint> {
        let checkpoint: Checkpoint = serde_json::from_str(data)?;
        if checkpoint.version > CHECKPOINT_FORMAT_VERSION {
            return Err(ReplicationError::Checkpoint(format!(
                "checkpoint {} uses format version {}, newest supported is {}",
                checkpoint.id, checkpoint.version, CHECKPOINT_FORMAT_VERSION
            )));
        }
        self.create(checkpoint).await
    }

    /// Delete checkpoints not updated within `max_age`; returns how many.
    async fn prune(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| ReplicationError::Configuration(format!("invalid retention: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let mut removed = 0;
        for checkpoint in self.list().await? {
            if checkpoint.updated_at < cutoff {
                self.delete(&checkpoint.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// One JSON file per checkpoint under a directory
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    locks: LockTable,
}

impl FileCheckpointStore {
    /// Open (and create if needed) a checkpoint directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ReplicationError::Checkpoint(format!(
                "cannot create checkpoint directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !id.starts_with('.');
        if !valid {
            return Err(ReplicationError::Checkpoint(format!("invalid checkpoint id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.{}", id, CHECKPOINT_EXTENSION)))
    }

    async fn lock(&self, id: &str) -> IdLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        IdLock {
            table: &self.locks,
            id: id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    async fn read(&self, id: &str) -> Result<Checkpoint> {
        let path = self.path(id)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReplicationError::NotFound(format!("checkpoint {}", id)));
            }
            Err(e) => {
                return Err(ReplicationError::Checkpoint(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            ReplicationError::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))
        })
    }

    /// Write to a sibling temp file, flush it, then rename over the target.
    async fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path(&checkpoint.id)?;
        let tmp = path.with_extension(format!("{}.tmp", CHECKPOINT_EXTENSION));
        let data = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ReplicationError::Checkpoint(format!("cannot replace {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _lock = self.lock(&checkpoint.id).await;
        self.write(checkpoint).await
    }

    async fn create(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        let path = self.path(&checkpoint.id)?;
        let _lock = self.lock(&checkpoint.id).await;
        if tokio::fs::try_exists(&path).await? {
            return Err(already_exists(&checkpoint.id));
        }
        self.write(&checkpoint).await?;
        tracing::debug!(checkpoint_id = %checkpoint.id, repositories = checkpoint.repo_tasks.len(), "checkpoint created");
        Ok(checkpoint)
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        let _lock = self.lock(id).await;
        self.read(id).await
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut checkpoints = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.load(id).await {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path(id)?;
        let _lock = self.lock(id).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(checkpoint_id = id, "checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ReplicationError::NotFound(format!("checkpoint {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(id)?).await?)
    }

    async fn update_repo_status(
        &self,
        id: &str,
        repository: &str,
        status: RepoStatus,
        error: Option<String>,
    ) -> Result<Checkpoint> {
        let _lock = self.lock(id).await;
        let mut checkpoint = self.read(id).await?;
        checkpoint.set_repo_status(repository, status, error)?;
        self.write(&checkpoint).await?;
        tracing::debug!(checkpoint_id = id, repository, status = %status, "repository status updated");
        Ok(checkpoint)
    }

    async fn update_run_status(&self, id: &str, status: RunStatus, error: Option<String>) -> Result<()> {
        let _lock = self.lock(id).await;
        let mut checkpoint = self.read(id).await?;
        checkpoint.set_run_status(status, error);
        self.write(&checkpoint).await
    }
}

/// Process-local store for checkpoint-disabled runs and tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn create(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        let mut checkpoints = self.checkpoints.write().await;
        if checkpoints.contains_key(&checkpoint.id) {
            return Err(already_exists(&checkpoint.id));
        }
        checkpoints.insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(checkpoint)
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        self.checkpoints
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ReplicationError::NotFound(format!("checkpoint {}", id)))
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self.checkpoints.read().await.values().cloned().collect();
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ReplicationError::NotFound(format!("checkpoint {}", id)))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.checkpoints.read().await.contains_key(id))
    }

    async fn update_repo_status(
        &self,
        id: &str,
        repository: &str,
        status: RepoStatus,
        error: Option<String>,
    ) -> Result<Checkpoint> {
        let mut checkpoints = self.checkpoints.write().await;
        let checkpoint = checkpoints
            .get_mut(id)
            .ok_or_else(|| ReplicationError::NotFound(format!("checkpoint {}", id)))?;
        checkpoint.set_repo_status(repository, status, error)?;
        Ok(checkpoint.clone())
    }

    async fn update_run_status(&self, id: &str, status: RunStatus, error: Option<String>) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        let checkpoint = checkpoints
            .get_mut(id)
            .ok_or_else(|| ReplicationError::NotFound(format!("checkpoint {}", id)))?;
        checkpoint.set_run_status(status, error);
        Ok(())
    }
}
