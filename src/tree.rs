//! Tree-wide replication
//!
//! Replicates every repository below a source prefix: lists and filters
//! repositories, maps each to a destination path, lists and filters tags,
//! creates missing destination repositories, then runs the resulting tasks
//! through the [`BatchExecutor`]. Per-repository progress is recorded in a
//! [`Checkpoint`] as results arrive, so an interrupted run can be resumed.

use crate::checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, RepoStatus, RepoTask, ResumeOptions,
    RunStatus, prepare_resume,
};
use crate::config::SyncConfig;
use crate::error::{ReplicationError, Result};
use crate::mapping::{RepositoryMapper, WildcardPattern, matches_any};
use crate::registry::{Copier, RegistryClient};
use crate::sync::{
    BatchExecutor, BatchStatistics, SyncResult, SyncTask, TaskObserver, calculate_statistics,
    optimize_batches,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Repository and tag filters for a tree run
#[derive(Debug, Clone, Default)]
pub struct TreeFilters {
    exclude_repositories: Vec<WildcardPattern>,
    include_tags: Vec<WildcardPattern>,
    exclude_tags: Vec<WildcardPattern>,
    latest: Option<usize>,
}

impl TreeFilters {
    pub fn new(
        exclude_repositories: &[String],
        include_tags: &[String],
        exclude_tags: &[String],
    ) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<WildcardPattern>> {
            patterns.iter().map(|p| WildcardPattern::new(p)).collect()
        };
        Ok(Self {
            exclude_repositories: compile(exclude_repositories)?,
            include_tags: compile(include_tags)?,
            exclude_tags: compile(exclude_tags)?,
            latest: None,
        })
    }

    /// Keep only the `count` newest tags of each repository.
    pub fn with_latest(mut self, count: usize) -> Self {
        self.latest = Some(count);
        self
    }

    pub fn keeps_repository(&self, repository: &str) -> bool {
        !matches_any(&self.exclude_repositories, repository)
    }

    /// Exclusions win; with include patterns a tag must match one of them.
    pub fn keeps_tag(&self, tag: &str) -> bool {
        !matches_any(&self.exclude_tags, tag)
            && (self.include_tags.is_empty() || matches_any(&self.include_tags, tag))
    }

    /// Newest-first selection when a latest count is set, else `tags` as is.
    ///
    /// Version-like tags (`1.2`, `v3.0.1`, `2.0-rc1`) rank by version, newest
    /// first, ahead of every other tag. Other tags keep their listing order.
    pub fn select_latest(&self, tags: Vec<String>) -> Vec<String> {
        let Some(count) = self.latest else {
            return tags;
        };
        let mut ranked: Vec<(Option<TagVersion>, String)> =
            tags.into_iter().map(|tag| (TagVersion::parse(&tag), tag)).collect();
        ranked.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => b.cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        ranked.into_iter().take(count).map(|(_, tag)| tag).collect()
    }
}

/// Numeric release plus optional pre-release suffix parsed from a tag
#[derive(Debug, Eq)]
struct TagVersion {
    release: Vec<u64>,
    pre_release: Option<String>,
}

impl TagVersion {
    fn parse(tag: &str) -> Option<Self> {
        let tag = tag.strip_prefix('v').unwrap_or(tag);
        let (release, pre_release) = match tag.split_once('-') {
            Some((release, pre)) if !pre.is_empty() => (release, Some(pre.to_string())),
            Some(_) => return None,
            None => (tag, None),
        };
        let release = release
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()?;
        Some(Self { release, pre_release })
    }
}

impl Ord for TagVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.release.len().max(other.release.len());
        let part = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
        (0..width)
            .map(|i| part(&self.release, i).cmp(&part(&other.release, i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialEq for TagVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for TagVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of a tree run
#[derive(Debug)]
pub struct TreeReplicationResult {
    pub checkpoint_id: String,
    pub status: RunStatus,
    /// Repositories worked on in this run
    pub repositories: usize,
    pub images_replicated: usize,
    pub images_skipped: usize,
    pub images_failed: usize,
    /// Checkpoint progress after the run
    pub progress: f64,
    pub completed_repositories: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub statistics: BatchStatistics,
    pub results: Vec<SyncResult>,
    /// Run-level error (stop-on-error)
    pub error: Option<ReplicationError>,
}

impl TreeReplicationResult {
    pub fn interrupted(&self) -> bool {
        self.status == RunStatus::Interrupted
    }
}

pub struct TreeReplicator {
    source: Arc<dyn RegistryClient>,
    destination: Arc<dyn RegistryClient>,
    copier: Arc<dyn Copier>,
    store: Arc<dyn CheckpointStore>,
    mapper: RepositoryMapper,
    filters: TreeFilters,
    config: SyncConfig,
    create_repositories: bool,
}

impl TreeReplicator {
    /// Progress is kept in memory until a store is attached.
    pub fn new(
        source: Arc<dyn RegistryClient>,
        destination: Arc<dyn RegistryClient>,
        copier: Arc<dyn Copier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            destination,
            copier,
            store: Arc::new(MemoryCheckpointStore::new()),
            mapper: RepositoryMapper::default(),
            filters: TreeFilters::default(),
            config: config.normalized(),
            create_repositories: true,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_mapper(mut self, mapper: RepositoryMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_filters(mut self, filters: TreeFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_create_repositories(mut self, create: bool) -> Self {
        self.create_repositories = create;
        self
    }

    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Destination path for `repository`: the first matching mapping rule,
    /// otherwise the source prefix swapped for the destination prefix.
    pub fn destination_for(&self, repository: &str, source_prefix: &str, destination_prefix: &str) -> String {
        let fallback = swap_prefix(repository, source_prefix, destination_prefix);
        self.mapper.resolve_or(repository, &fallback)
    }

    /// Start a new run for every repository below `source_prefix`.
    pub async fn replicate(
        &self,
        cancel: &CancellationToken,
        source_prefix: &str,
        destination_prefix: &str,
    ) -> Result<TreeReplicationResult> {
        let mut repositories = self.source.list_repositories(source_prefix).await?;
        repositories.sort();
        let listed = repositories.len();
        repositories.retain(|repo| self.filters.keeps_repository(repo));
        tracing::info!(
            source = self.source.registry_name(),
            prefix = source_prefix,
            listed,
            selected = repositories.len(),
            "repositories discovered"
        );

        let mut checkpoint = Checkpoint::new(
            self.source.registry_name(),
            source_prefix,
            self.destination.registry_name(),
            destination_prefix,
        );
        for repo in &repositories {
            let destination = self.destination_for(repo, source_prefix, destination_prefix);
            checkpoint.add_repository(repo.as_str(), destination);
        }
        let checkpoint = self.store.create(checkpoint).await?;
        let work = checkpoint.repo_tasks.clone();
        self.run(cancel, checkpoint, work).await
    }

    /// Continue a stored run.
    pub async fn resume(
        &self,
        cancel: &CancellationToken,
        checkpoint_id: &str,
        options: ResumeOptions,
    ) -> Result<TreeReplicationResult> {
        let (checkpoint, work) = prepare_resume(self.store.as_ref(), checkpoint_id, options).await?;
        self.run(cancel, checkpoint, work).await
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        checkpoint: Checkpoint,
        work: Vec<RepoTask>,
    ) -> Result<TreeReplicationResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let executor = BatchExecutor::new(self.config.clone(), Arc::clone(&self.copier))?;
        let checkpoint_id = checkpoint.id.clone();
        let progress = Arc::new(RepoProgress::new(Arc::clone(&self.store), &checkpoint_id));
        let repositories = work.len();

        let listings: Vec<(RepoTask, Result<Vec<String>>)> = stream::iter(work)
            .map(|repo_task| async move {
                let tags = self.source.list_tags(&repo_task.repository).await;
                (repo_task, tags)
            })
            .buffered(self.config.parallelism)
            .collect()
            .await;

        let mut tasks = Vec::new();
        for (repo_task, tags) in listings {
            if cancel.is_cancelled() {
                break;
            }
            let repository = repo_task.repository.as_str();
            let tags = match tags {
                Ok(tags) => tags,
                Err(err) => {
                    tracing::warn!(repository, error = %err, "tag listing failed");
                    progress.finish_without_tasks(repository, Some(err.to_string())).await;
                    continue;
                }
            };

            let tags: Vec<String> = tags
                .into_iter()
                .filter(|tag| self.filters.keeps_tag(tag) && self.mapper.accepts_tag(repository, tag))
                .collect();
            let tags = self.filters.select_latest(tags);
            if tags.is_empty() {
                tracing::debug!(repository, "no tags to replicate");
                progress.finish_without_tasks(repository, None).await;
                continue;
            }

            if let Err(err) = self.ensure_destination(&repo_task.destination).await {
                tracing::warn!(repository, destination = %repo_task.destination, error = %err, "cannot prepare destination");
                progress.finish_without_tasks(repository, Some(err.to_string())).await;
                continue;
            }

            progress.track(repository, tags.len());
            tasks.extend(tags.into_iter().map(|tag| SyncTask {
                source_registry: self.source.registry_name().to_string(),
                source_repository: repo_task.repository.clone(),
                source_tag: tag.clone(),
                destination_registry: self.destination.registry_name().to_string(),
                destination_repository: repo_task.destination.clone(),
                destination_tag: tag,
                priority: 0,
            }));
        }

        let executor = executor.with_observer(Arc::clone(&progress) as Arc<dyn TaskObserver>);
        let outcome = executor.execute(cancel, optimize_batches(tasks)).await;
        let (results, run_error) = outcome.into_parts();

        let (status, last_error) = if cancel.is_cancelled() {
            (RunStatus::Interrupted, Some("replication cancelled".to_string()))
        } else if let Some(err) = &run_error {
            (RunStatus::Failed, Some(err.to_string()))
        } else {
            match progress.failed_repositories() {
                0 => (RunStatus::Completed, None),
                failed => (RunStatus::Failed, Some(format!("{} repositories failed", failed))),
            }
        };
        self.store.update_run_status(&checkpoint_id, status, last_error).await?;

        let checkpoint = self.store.load(&checkpoint_id).await?;
        let statistics = calculate_statistics(&results);
        tracing::info!(
            checkpoint_id = %checkpoint_id,
            status = %status,
            repositories,
            replicated = statistics.completed,
            failed = statistics.failed,
            "tree replication finished"
        );

        Ok(TreeReplicationResult {
            checkpoint_id,
            status,
            repositories,
            images_replicated: statistics.completed,
            images_skipped: statistics.skipped,
            images_failed: statistics.failed,
            progress: checkpoint.progress(),
            completed_repositories: checkpoint
                .repo_tasks
                .iter()
                .filter(|task| task.status == RepoStatus::Completed)
                .map(|task| task.repository.clone())
                .collect(),
            started_at,
            duration: started.elapsed(),
            statistics,
            results,
            error: run_error,
        })
    }

    async fn ensure_destination(&self, repository: &str) -> Result<()> {
        if !self.create_repositories || self.config.dry_run {
            return Ok(());
        }
        if !self.destination.repository_exists(repository).await? {
            tracing::info!(registry = self.destination.registry_name(), repository, "creating destination repository");
            self.destination.create_repository(repository).await?;
        }
        Ok(())
    }
}

fn swap_prefix(repository: &str, source_prefix: &str, destination_prefix: &str) -> String {
    let source_prefix = source_prefix.trim_matches('/');
    let destination_prefix = destination_prefix.trim_matches('/');
    let rest = if source_prefix.is_empty() {
        repository
    } else {
        repository
            .strip_prefix(source_prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(repository)
    };
    match (destination_prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => destination_prefix.to_string(),
        (false, false) => format!("{}/{}", destination_prefix, rest),
    }
}

#[derive(Debug, Default)]
struct RepoTally {
    remaining: usize,
    started: bool,
    interrupted: bool,
    error: Option<String>,
}

/// Translates task events into checkpoint updates, one repository at a time
struct RepoProgress {
    store: Arc<dyn CheckpointStore>,
    checkpoint_id: String,
    repos: Mutex<HashMap<String, RepoTally>>,
    failed: Mutex<usize>,
}

impl RepoProgress {
    fn new(store: Arc<dyn CheckpointStore>, checkpoint_id: &str) -> Self {
        Self {
            store,
            checkpoint_id: checkpoint_id.to_string(),
            repos: Mutex::new(HashMap::new()),
            failed: Mutex::new(0),
        }
    }

    fn tallies(&self) -> std::sync::MutexGuard<'_, HashMap<String, RepoTally>> {
        self.repos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, repository: &str, tasks: usize) {
        self.tallies().insert(
            repository.to_string(),
            RepoTally {
                remaining: tasks,
                ..Default::default()
            },
        );
    }

    fn failed_repositories(&self) -> usize {
        *self.failed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn finish_without_tasks(&self, repository: &str, error: Option<String>) {
        self.mark(repository, RepoStatus::InProgress, None).await;
        self.finish(repository, error).await;
    }

    async fn finish(&self, repository: &str, error: Option<String>) {
        let status = if error.is_some() {
            *self.failed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
            RepoStatus::Failed
        } else {
            RepoStatus::Completed
        };
        self.mark(repository, status, error).await;
    }

    async fn mark(&self, repository: &str, status: RepoStatus, error: Option<String>) {
        if let Err(err) = self
            .store
            .update_repo_status(&self.checkpoint_id, repository, status, error)
            .await
        {
            tracing::warn!(
                checkpoint_id = %self.checkpoint_id,
                repository,
                status = %status,
                error = %err,
                "checkpoint update failed"
            );
        }
    }
}

#[async_trait]
impl TaskObserver for RepoProgress {
    async fn task_started(&self, task: &SyncTask) {
        let first = match self.tallies().get_mut(&task.source_repository) {
            Some(tally) if !tally.started => {
                tally.started = true;
                true
            }
            _ => false,
        };
        if first {
            self.mark(&task.source_repository, RepoStatus::InProgress, None).await;
        }
    }

    async fn task_finished(&self, result: &SyncResult) {
        let repository = &result.task.source_repository;
        let done = {
            let mut tallies = self.tallies();
            let Some(tally) = tallies.get_mut(repository) else {
                return;
            };
            tally.remaining = tally.remaining.saturating_sub(1);
            match result.error() {
                Some(err) if err.is_cancellation() => tally.interrupted = true,
                Some(err) if tally.error.is_none() => {
                    tally.error = Some(format!("{}: {}", result.task.source_tag, err));
                }
                _ => {}
            }
            (tally.remaining == 0 && !tally.interrupted).then(|| tally.error.clone())
        };

        if let Some(error) = done {
            self.finish(repository, error).await;
        }
    }
}
