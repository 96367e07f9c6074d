//! Batch executor
//!
//! Drives an optimized task list through a per-run [`WorkerPool`] one batch at
//! a time. Every task keeps the index it had in the input list, and results are
//! placed by that index, so the returned vector always lines up with the input
//! no matter how batches were sized or in which order workers finished.

use super::{SyncResult, SyncTask};
use crate::concurrency::{BackoffPolicy, JobHandler, WorkerPool};
use crate::config::SyncConfig;
use crate::error::{ReplicationError, Result};
use crate::registry::Copier;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Batches remembered when deciding whether to grow the batch size
const RECENT_BATCH_WINDOW: usize = 3;

/// Hooks invoked as tasks move through the executor
#[async_trait]
pub trait TaskObserver: Send + Sync {
    /// Called by the worker right before the first attempt.
    async fn task_started(&self, _task: &SyncTask) {}

    /// Called once per result produced by a worker, in completion order.
    async fn task_finished(&self, _result: &SyncResult) {}
}

/// Results of one `execute` call plus the run-level error, if any.
///
/// `results` always holds exactly one entry per input task, in input order.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub results: Vec<SyncResult>,
    pub error: Option<ReplicationError>,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_parts(self) -> (Vec<SyncResult>, Option<ReplicationError>) {
        (self.results, self.error)
    }
}

pub struct BatchExecutor {
    config: SyncConfig,
    copier: Arc<dyn Copier>,
    observer: Option<Arc<dyn TaskObserver>>,
}

impl BatchExecutor {
    /// Normalizes zero values in `config` and rejects unsafe ones.
    pub fn new(config: SyncConfig, copier: Arc<dyn Copier>) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;
        Ok(Self {
            config,
            copier,
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run every task, honoring the configured batch, retry and error policy.
    ///
    /// Per-task failures are reported in the task's result. The outcome only
    /// carries a run-level error when stop-on-error halted the run.
    pub async fn execute(&self, cancel: &CancellationToken, tasks: Vec<SyncTask>) -> ExecutionOutcome {
        if tasks.is_empty() {
            return ExecutionOutcome::default();
        }

        let total = tasks.len();
        let workers = self.config.parallelism.min(total);
        let runner = TaskRunner {
            copier: Arc::clone(&self.copier),
            observer: self.observer.clone(),
            backoff: self.config.backoff_policy(),
            config: self.config.clone(),
        };
        let mut pool = WorkerPool::start(workers, runner, cancel.clone());
        let mut slots: Vec<Option<SyncResult>> = (0..total).map(|_| None).collect();
        let mut sizer = BatchSizer::new(&self.config);

        tracing::info!(
            tasks = total,
            workers,
            batch_size = self.config.batch_size,
            adaptive = self.config.adaptive_batching,
            dry_run = self.config.dry_run,
            "starting replication run"
        );

        let mut offset = 0;
        let mut batch_number = 0usize;
        let mut halted: Option<(String, ReplicationError)> = None;

        while offset < total && !cancel.is_cancelled() {
            let end = (offset + sizer.current()).min(total);
            batch_number += 1;
            tracing::debug!(batch = batch_number, start = offset, size = end - offset, "dispatching batch");

            let mut dispatched = 0;
            for (index, task) in tasks.iter().enumerate().take(end).skip(offset) {
                let job = Job {
                    index,
                    task: task.clone(),
                };
                if let Err(err) = pool.submit(job).await {
                    tracing::debug!(batch = batch_number, error = %err, "dispatch interrupted");
                    break;
                }
                dispatched += 1;
            }

            let mut received = 0;
            let mut failures = 0;
            while received < dispatched {
                let Some(JobResult { index, result }) = pool.next_result().await else {
                    break;
                };
                received += 1;
                if result.is_failure() {
                    failures += 1;
                }
                if let Some(observer) = &self.observer {
                    observer.task_finished(&result).await;
                }
                slots[index] = Some(result);
            }

            tracing::debug!(batch = batch_number, completed = received, failed = failures, "batch finished");

            if !self.config.continue_on_error {
                halted = first_terminal_failure(&slots[offset..end]);
                if let Some((task, err)) = &halted {
                    tracing::warn!(task = %task, error = %err, "stopping after task failure");
                }
            }

            offset = end;
            if halted.is_some() {
                break;
            }

            if self.config.adaptive_batching && received > 0 {
                sizer.record(received, failures);
            }
        }

        let pool_stats = pool.statistics();
        tracing::debug!(
            submitted = pool_stats.submitted,
            processed = pool_stats.processed,
            pending = pool_stats.pending(),
            "worker pool drained"
        );
        pool.stop();
        pool.join().await;

        let cancelled = cancel.is_cancelled();
        let results: Vec<SyncResult> = slots
            .into_iter()
            .zip(tasks)
            .map(|(slot, task)| match slot {
                Some(result) => result,
                None if cancelled => SyncResult::failed(
                    task,
                    ReplicationError::Cancelled("run cancelled before task completed".to_string()),
                    Duration::ZERO,
                    0,
                ),
                None => match &halted {
                    Some((trigger, _)) => SyncResult::skipped(
                        task,
                        format!("not dispatched: run halted after {} failed", trigger),
                        Duration::ZERO,
                    ),
                    None => SyncResult::failed(
                        task,
                        ReplicationError::Pool("worker pool exited before task completed".to_string()),
                        Duration::ZERO,
                        0,
                    ),
                },
            })
            .collect();

        tracing::info!(
            tasks = total,
            batches = batch_number,
            cancelled,
            halted = halted.is_some(),
            "replication run finished"
        );

        ExecutionOutcome {
            results,
            error: halted.map(|(task, source)| ReplicationError::StopOnError {
                task,
                source: Box::new(source),
            }),
        }
    }
}

/// Lowest-index failure in a batch, ignoring cancellations
fn first_terminal_failure(batch: &[Option<SyncResult>]) -> Option<(String, ReplicationError)> {
    batch.iter().flatten().find_map(|result| match result.error() {
        Some(err) if !err.is_cancellation() => Some((result.task.to_string(), err.clone())),
        _ => None,
    })
}

struct Job {
    index: usize,
    task: SyncTask,
}

struct JobResult {
    index: usize,
    result: SyncResult,
}

/// Per-worker task execution: timeout, retry and backoff
struct TaskRunner {
    copier: Arc<dyn Copier>,
    observer: Option<Arc<dyn TaskObserver>>,
    backoff: BackoffPolicy,
    config: SyncConfig,
}

#[async_trait]
impl JobHandler<Job, JobResult> for TaskRunner {
    async fn handle(&self, worker_id: usize, job: Job, cancel: &CancellationToken) -> JobResult {
        let Job { index, task } = job;
        if let Some(observer) = &self.observer {
            observer.task_started(&task).await;
        }
        let result = self.run(worker_id, task, cancel).await;
        JobResult { index, result }
    }
}

impl TaskRunner {
    async fn run(&self, worker_id: usize, task: SyncTask, cancel: &CancellationToken) -> SyncResult {
        let started = Instant::now();

        if self.config.dry_run {
            tracing::info!(task = %task, "dry run, copy skipped");
            return SyncResult::skipped(task, "dry run", started.elapsed());
        }

        let source = task.source();
        let destination = task.destination();
        let max_attempts = self.config.retry_attempts + 1;
        // One budget covers every attempt and every backoff wait of this task.
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return SyncResult::failed(
                    task,
                    ReplicationError::Cancelled("cancelled before next attempt".to_string()),
                    started.elapsed(),
                    attempt,
                );
            }
            if attempt > 0 && tokio::time::Instant::now() >= deadline {
                tracing::warn!(task = %task, attempts = attempt, "task deadline reached before retry");
                return SyncResult::failed(
                    task,
                    ReplicationError::Timeout(self.config.timeout),
                    started.elapsed(),
                    attempt,
                );
            }
            attempt += 1;
            tracing::debug!(worker_id, task = %task, attempt, "copy attempt");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ReplicationError::Cancelled("cancelled during copy".to_string())),
                copied = tokio::time::timeout_at(
                    deadline,
                    self.copier.copy(&source, &destination, cancel),
                ) => copied.unwrap_or(Err(ReplicationError::Timeout(self.config.timeout))),
            };

            let err = match outcome {
                Ok(bytes) => {
                    tracing::info!(task = %task, bytes, attempts = attempt, "copy succeeded");
                    return SyncResult::succeeded(task, bytes, started.elapsed(), attempt);
                }
                Err(err) => err,
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if err.is_cancellation() || !err.is_retryable() || attempt >= max_attempts || remaining.is_zero() {
                if !err.is_cancellation() {
                    tracing::warn!(task = %task, attempts = attempt, error = %err, "copy failed");
                }
                return SyncResult::failed(task, err, started.elapsed(), attempt);
            }

            tracing::debug!(task = %task, attempt, remaining_ms = remaining.as_millis() as u64, error = %err, "retrying");
            if !self.backoff.wait_bounded(attempt, remaining, cancel).await {
                return SyncResult::failed(
                    task,
                    ReplicationError::Cancelled("cancelled during retry backoff".to_string()),
                    started.elapsed(),
                    attempt,
                );
            }
        }
    }
}

/// Next-batch sizing from the previous batch's success rate
#[derive(Debug)]
struct BatchSizer {
    current: usize,
    min: usize,
    max: usize,
    adaptive: bool,
    recent_failures: VecDeque<bool>,
}

impl BatchSizer {
    fn new(config: &SyncConfig) -> Self {
        Self {
            current: config.batch_size.max(1),
            min: config.min_batch_size.max(1),
            max: config.max_batch_size.max(1),
            adaptive: config.adaptive_batching,
            recent_failures: VecDeque::with_capacity(RECENT_BATCH_WINDOW),
        }
    }

    fn current(&self) -> usize {
        self.current
    }

    fn record(&mut self, completed: usize, failed: usize) {
        if !self.adaptive || completed == 0 {
            return;
        }
        let success_rate = (completed - failed) as f64 / completed as f64;
        let recently_failed = self.recent_failures.iter().any(|failed| *failed);
        let old = self.current;

        let next = if success_rate < 0.5 {
            old / 2
        } else if success_rate < 0.8 {
            old - old / 4
        } else if success_rate >= 0.95 && !recently_failed {
            old + (old / 4).max(1)
        } else {
            old
        };
        self.current = next.clamp(self.min, self.max);

        if self.recent_failures.len() == RECENT_BATCH_WINDOW {
            self.recent_failures.pop_front();
        }
        self.recent_failures.push_back(success_rate < 0.8);

        if self.current != old {
            tracing::info!(
                old_size = old,
                new_size = self.current,
                success_rate = format!("{:.1}%", success_rate * 100.0),
                "adjusted batch size"
            );
        }
    }
}
