//! Command runner: turns parsed arguments into engine calls and reports

use crate::checkpoint::{
    CheckpointStore, CheckpointSummary, FileCheckpointStore, MemoryCheckpointStore, ResumeOptions,
    RunStatus, remaining_repositories, resumable_checkpoints,
};
use crate::cli::args::{Args, CheckpointCommand, Command, ExecutionArgs, OutputFormat, SyncArgs, TreeArgs};
use crate::cli::config::{AppConfig, DEFAULT_COPY_TOOL};
use crate::error::{ReplicationError, Result, handlers::ValidationErrorHandler};
use crate::logging::{Logger, ProgressReporter};
use crate::mapping::{MappingRule, RepositoryMapper};
use crate::registry::{CommandCopier, Copier, InventoryRegistryClient, RegistryClient};
use crate::sync::{
    BatchExecutor, SyncResult, SyncTask, TaskObserver, TaskOutcome, calculate_statistics,
    estimate_duration, optimize_batches,
};
use crate::tree::{TreeFilters, TreeReplicationResult, TreeReplicator};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

pub struct Runner {
    args: Args,
    logger: Logger,
    config: AppConfig,
}

impl Runner {
    /// Resolve configuration: defaults, config file, environment, then flags.
    pub fn new(args: Args) -> Result<Self> {
        let logger = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        let file_config = match &args.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        let mut config = file_config.merge(&AppConfig::from_env());
        if let Some(dir) = &args.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if args.verbose {
            config.verbose = true;
        }
        if let Some(execution) = Self::execution_args(&args.command) {
            config = config.with_execution_args(execution);
        }
        config.validate()?;

        Ok(Self {
            args,
            logger,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns `Ok(false)` when the command ran but some work failed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<bool> {
        match &self.args.command {
            Command::Sync(sync) => self.run_sync(cancel, sync).await,
            Command::ReplicateTree(tree) => self.run_tree(cancel, tree).await,
            Command::Checkpoint(command) => self.run_checkpoint(command).await,
        }
    }

    fn execution_args(command: &Command) -> Option<&ExecutionArgs> {
        match command {
            Command::Sync(sync) => Some(&sync.execution),
            Command::ReplicateTree(tree) => Some(&tree.execution),
            Command::Checkpoint(_) => None,
        }
    }

    fn create_copier(&self) -> Arc<dyn Copier> {
        let copier = if self.config.copy_tool == DEFAULT_COPY_TOOL && self.config.copy_args.is_empty() {
            CommandCopier::skopeo()
        } else {
            CommandCopier::new(self.config.copy_tool.as_str()).with_args(self.config.copy_args.iter().cloned())
        };
        self.logger.detail(&format!("Copy tool: {}", copier.program()));
        Arc::new(copier)
    }

    async fn open_store(&self) -> Result<Arc<dyn CheckpointStore>> {
        let store = FileCheckpointStore::open(self.config.checkpoint_dir.clone()).await?;
        self.logger
            .detail(&format!("Checkpoint directory: {}", store.dir().display()));
        Ok(Arc::new(store))
    }

    async fn run_sync(&self, cancel: &CancellationToken, args: &SyncArgs) -> Result<bool> {
        let tasks = load_tasks(&args.tasks).await?;
        let sync = &self.config.sync;

        if args.estimate {
            let estimate = estimate_duration(&tasks, sync.parallelism, sync.batch_size);
            match args.output {
                OutputFormat::Json => self.logger.raw(&serde_json::to_string_pretty(&serde_json::json!({
                    "tasks": tasks.len(),
                    "parallelism": sync.parallelism,
                    "batch_size": sync.batch_size,
                    "estimated_seconds": estimate.as_secs_f64(),
                }))?),
                OutputFormat::Text => self.logger.summary_kv(
                    "Estimate",
                    &[
                        ("Tasks", tasks.len().to_string()),
                        ("Workers", sync.parallelism.to_string()),
                        ("Batch size", sync.batch_size.to_string()),
                        ("Estimated time", self.logger.format_duration(estimate)),
                    ],
                ),
            }
            return Ok(true);
        }

        self.logger.section("Image Sync");
        self.logger.summary_kv(
            "Plan",
            &[
                ("Tasks", tasks.len().to_string()),
                ("Workers", sync.parallelism.to_string()),
                ("Batch size", sync.batch_size.to_string()),
                ("Retries", sync.retry_attempts.to_string()),
                ("Timeout", self.logger.format_duration(sync.timeout)),
                ("On error", if sync.continue_on_error { "continue" } else { "stop" }.to_string()),
                ("Dry run", sync.dry_run.to_string()),
            ],
        );

        let tasks = optimize_batches(tasks);
        let mut executor = BatchExecutor::new(sync.clone(), self.create_copier())?;
        if args.output == OutputFormat::Text {
            let reporter = ProgressReporter::new(self.logger.clone(), tasks.len());
            executor = executor.with_observer(Arc::new(reporter) as Arc<dyn TaskObserver>);
        }

        let (results, run_error) = executor.execute(cancel, tasks).await.into_parts();
        let statistics = calculate_statistics(&results);

        match args.output {
            OutputFormat::Json => {
                let report = SyncReport {
                    statistics: &statistics,
                    error: run_error.as_ref().map(ToString::to_string),
                    cancelled: cancel.is_cancelled(),
                    results: results.iter().map(ResultRecord::from).collect(),
                };
                self.logger.raw(&serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                for result in &results {
                    self.logger.task_result(result);
                }
                self.logger.statistics("Results", &statistics);
                self.report_ending(cancel, run_error.as_ref(), statistics.failed);
            }
        }

        Ok(run_error.is_none() && statistics.failed == 0 && !cancel.is_cancelled())
    }

    async fn run_tree(&self, cancel: &CancellationToken, args: &TreeArgs) -> Result<bool> {
        self.logger.section("Tree Replication");

        let source = InventoryRegistryClient::load(&args.source).await?;
        let source_name = source.registry_name().to_string();
        let destination = match &args.destination_inventory {
            Some(path) => {
                let client = InventoryRegistryClient::load(path).await?;
                if client.registry_name() != args.destination {
                    self.logger.warning(&format!(
                        "Destination inventory describes {}, replicating to {}",
                        client.registry_name(),
                        args.destination
                    ));
                }
                let mut inventory = client.inventory()?;
                inventory.registry = args.destination.clone();
                InventoryRegistryClient::from_inventory(inventory)
            }
            None => InventoryRegistryClient::new(args.destination.as_str()),
        };

        let mapper = match &args.mapping {
            Some(path) => {
                let rules = load_mapping_rules(path).await?;
                self.logger.detail(&format!("Loaded {} mapping rule(s)", rules.len()));
                RepositoryMapper::new(rules)?
            }
            None => RepositoryMapper::default(),
        };
        let mut filters = TreeFilters::new(&args.exclude_repo, &args.include_tag, &args.exclude_tag)?;
        if let Some(count) = args.latest {
            filters = filters.with_latest(count);
        }

        let store: Arc<dyn CheckpointStore> = if args.no_checkpoint || !self.config.checkpoint_enabled {
            if args.resume.is_some() {
                return Err(ReplicationError::Configuration(
                    "--resume needs checkpoints enabled".to_string(),
                ));
            }
            Arc::new(MemoryCheckpointStore::new())
        } else {
            self.open_store().await?
        };

        let replicator = TreeReplicator::new(
            Arc::new(source),
            Arc::new(destination),
            self.create_copier(),
            self.config.sync.clone(),
        )
        .with_checkpoint_store(store)
        .with_mapper(mapper)
        .with_filters(filters)
        .with_create_repositories(!args.no_create_repositories);

        let result = match &args.resume {
            Some(id) => {
                let options = ResumeOptions {
                    skip_completed: !args.no_skip_completed,
                    retry_failed: args.retry_failed,
                    force: args.force,
                };
                self.logger.step(&format!("Resuming checkpoint {}", id));
                replicator.resume(cancel, id, options).await?
            }
            None => {
                self.logger.step(&format!(
                    "Replicating {} to {}",
                    prefixed(&source_name, &args.source_prefix),
                    prefixed(&args.destination, &args.dest_prefix)
                ));
                replicator.replicate(cancel, &args.source_prefix, &args.dest_prefix).await?
            }
        };

        self.report_tree(&result, args.no_checkpoint || !self.config.checkpoint_enabled);
        Ok(result.status == RunStatus::Completed)
    }

    fn report_tree(&self, result: &TreeReplicationResult, ephemeral: bool) {
        for sync_result in &result.results {
            self.logger.task_result(sync_result);
        }
        self.logger.summary_kv(
            "Tree Summary",
            &[
                ("Checkpoint", result.checkpoint_id.clone()),
                ("Status", result.status.to_string()),
                ("Repositories", result.repositories.to_string()),
                ("Replicated", result.images_replicated.to_string()),
                ("Skipped", result.images_skipped.to_string()),
                ("Failed", result.images_failed.to_string()),
                ("Progress", format!("{:.1}%", result.progress)),
                ("Duration", self.logger.format_duration(result.duration)),
            ],
        );
        self.logger.statistics("Images", &result.statistics);

        if result.interrupted() {
            if ephemeral {
                self.logger.warning("Run interrupted; progress was not persisted");
            } else {
                self.logger.warning(&format!(
                    "Run interrupted; continue with --resume {}",
                    result.checkpoint_id
                ));
            }
        } else if let Some(err) = &result.error {
            self.logger.error(&err.to_string());
        } else if result.status == RunStatus::Completed {
            self.logger.success(&format!(
                "Tree replication completed in {}",
                self.logger.format_duration(result.duration)
            ));
        } else {
            self.logger.warning(&format!(
                "Some repositories failed; retry with --resume {} --retry-failed",
                result.checkpoint_id
            ));
        }
    }

    async fn run_checkpoint(&self, command: &CheckpointCommand) -> Result<bool> {
        let store = self.open_store().await?;
        match command {
            CheckpointCommand::List { all } => {
                let summaries: Vec<CheckpointSummary> = if *all {
                    store.list().await?.iter().map(|cp| cp.summary()).collect()
                } else {
                    resumable_checkpoints(store.as_ref()).await?
                };
                self.logger.subsection(if *all { "Checkpoints" } else { "Resumable Checkpoints" });
                self.logger.checkpoint_table(&summaries);
            }
            CheckpointCommand::Show { id } => {
                let checkpoint = store.load(id).await?;
                self.logger.raw(&serde_json::to_string_pretty(&checkpoint)?);
            }
            CheckpointCommand::Delete { id } => {
                store.delete(id).await?;
                self.logger.success(&format!("Deleted checkpoint {}", id));
            }
            CheckpointCommand::Export { id, output } => {
                let data = store.export(id).await?;
                match output {
                    Some(path) => {
                        tokio::fs::write(path, data).await?;
                        self.logger
                            .success(&format!("Exported {} to {}", id, path.display()));
                    }
                    None => self.logger.raw(&data),
                }
            }
            CheckpointCommand::Import { file } => {
                let data = tokio::fs::read_to_string(file).await?;
                let checkpoint = store.import(&data).await?;
                self.logger.success(&format!(
                    "Imported checkpoint {} ({} repositories)",
                    checkpoint.id,
                    checkpoint.repo_tasks.len()
                ));
            }
            CheckpointCommand::Remaining {
                id,
                retry_failed,
                force,
                no_skip_completed,
            } => {
                let checkpoint = store.load(id).await?;
                let options = ResumeOptions {
                    skip_completed: !no_skip_completed,
                    retry_failed: *retry_failed,
                    force: *force,
                };
                let remaining: Vec<String> = remaining_repositories(&checkpoint, &options)
                    .into_iter()
                    .map(|task| format!("{} -> {} ({})", task.repository, task.destination, task.status))
                    .collect();
                self.logger.list("Remaining Repositories", &remaining);
            }
            CheckpointCommand::Prune { older_than_days } => {
                let max_age = Duration::from_secs(older_than_days.saturating_mul(SECONDS_PER_DAY));
                let removed = store.prune(max_age).await?;
                self.logger.success(&format!(
                    "Removed {} checkpoint(s) older than {} day(s)",
                    removed, older_than_days
                ));
            }
        }
        Ok(true)
    }

    fn report_ending(&self, cancel: &CancellationToken, run_error: Option<&ReplicationError>, failed: usize) {
        if cancel.is_cancelled() {
            self.logger.warning("Run cancelled before all tasks finished");
        } else if let Some(err) = run_error {
            self.logger.error(&err.to_string());
        } else if failed > 0 {
            self.logger.warning(&format!("{} task(s) failed", failed));
        } else {
            self.logger.success(&format!(
                "All tasks finished in {}",
                self.logger.format_duration(self.logger.elapsed())
            ));
        }
    }
}

fn prefixed(registry: &str, prefix: &str) -> String {
    match prefix.trim_matches('/') {
        "" => registry.to_string(),
        prefix => format!("{}/{}", registry, prefix),
    }
}

/// Read and validate a JSON array of tasks.
pub async fn load_tasks(path: &Path) -> Result<Vec<SyncTask>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        ReplicationError::Configuration(format!("cannot read task file {}: {}", path.display(), e))
    })?;
    let tasks: Vec<SyncTask> = serde_json::from_str(&content).map_err(|e| {
        ReplicationError::Configuration(format!("invalid task file {}: {}", path.display(), e))
    })?;

    for (index, task) in tasks.iter().enumerate() {
        validate_task(task).map_err(|e| {
            ReplicationError::Configuration(format!("task {} ({}): {}", index, task, e))
        })?;
    }
    Ok(tasks)
}

fn validate_task(task: &SyncTask) -> Result<()> {
    ValidationErrorHandler::validate_repository(&task.source_repository)?;
    ValidationErrorHandler::validate_repository(&task.destination_repository)?;
    ValidationErrorHandler::validate_tag(&task.source_tag)?;
    ValidationErrorHandler::validate_tag(&task.destination_tag)?;
    Ok(())
}

async fn load_mapping_rules(path: &Path) -> Result<Vec<MappingRule>> {
    let content = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| {
        ReplicationError::Configuration(format!("invalid mapping file {}: {}", path.display(), e))
    })
}

#[derive(Serialize)]
struct SyncReport<'a> {
    statistics: &'a crate::sync::BatchStatistics,
    error: Option<String>,
    cancelled: bool,
    results: Vec<ResultRecord<'a>>,
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    task: &'a SyncTask,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    bytes: u64,
    duration_secs: f64,
    attempts: u32,
}

impl<'a> From<&'a SyncResult> for ResultRecord<'a> {
    fn from(result: &'a SyncResult) -> Self {
        let status = match result.outcome {
            TaskOutcome::Succeeded { .. } => "succeeded",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Skipped { .. } => "skipped",
        };
        Self {
            task: &result.task,
            status,
            error: result.error().map(ToString::to_string),
            reason: result.skip_reason(),
            bytes: result.bytes_copied(),
            duration_secs: result.duration.as_secs_f64(),
            attempts: result.attempts,
        }
    }
}
