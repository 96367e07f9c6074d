//! Bounded worker pool with cooperative cancellation
//!
//! A fixed set of workers pull jobs from a shared queue, run them through a
//! [`JobHandler`] and publish results on an unbounded stream. The result
//! stream has exactly one closing owner: every worker holds a sender clone and
//! the pool itself holds none, so the stream ends when the last worker exits.
//! `stop()` only signals cancellation and never touches the stream, which
//! makes shutdown race-free regardless of call ordering.

use super::{ConcurrencyError, PoolStatistics};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Queue slots per worker before `submit` starts waiting
const JOB_QUEUE_DEPTH: usize = 16;

/// Work executed by each pool worker
#[async_trait]
pub trait JobHandler<J, R>: Send + Sync + 'static
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Run one job. Implementations must observe `cancel` at every
    /// suspension point and return promptly once it fires.
    async fn handle(&self, worker_id: usize, job: J, cancel: &CancellationToken) -> R;
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    live_workers: AtomicUsize,
}

/// Fixed-size pool of async workers.
///
/// Instantiate one pool per run; nothing here is process-global.
pub struct WorkerPool<J, R> {
    workers: usize,
    jobs: Option<mpsc::Sender<J>>,
    results: mpsc::UnboundedReceiver<R>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
    counters: Arc<Counters>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `workers` executors (at least one).
    ///
    /// The pool observes a child of `parent`: cancelling the parent stops the
    /// pool, stopping the pool leaves the parent untouched.
    pub fn start<H>(workers: usize, handler: H, parent: CancellationToken) -> Self
    where
        H: JobHandler<J, R>,
    {
        let workers = workers.max(1);
        let cancel = parent.child_token();
        let (job_tx, job_rx) = mpsc::channel(workers * JOB_QUEUE_DEPTH);
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let job_rx = Arc::new(Mutex::new(job_rx));
        let handler = Arc::new(handler);
        let counters = Arc::new(Counters::default());
        counters.live_workers.store(workers, Ordering::SeqCst);

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&job_rx),
                    result_tx.clone(),
                    Arc::clone(&handler),
                    cancel.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        // Workers are now the only owners of the result stream.
        drop(result_tx);

        tracing::debug!(workers, "worker pool started");

        Self {
            workers,
            jobs: Some(job_tx),
            results: result_rx,
            cancel,
            handles,
            stopped: AtomicBool::new(false),
            counters,
        }
    }

    /// Queue a job, waiting for queue space if necessary.
    pub async fn submit(&self, job: J) -> Result<(), ConcurrencyError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ConcurrencyError::PoolStopped);
        }
        let sender = self.jobs.as_ref().ok_or(ConcurrencyError::QueueClosed)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConcurrencyError::Cancelled),
            sent = sender.send(job) => {
                sent.map_err(|_| ConcurrencyError::QueueClosed)?;
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Stop accepting jobs. Workers drain what is queued, then exit.
    pub fn close(&mut self) {
        self.jobs.take();
    }

    /// Signal cancellation. Idempotent and safe to call at any time.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(workers = self.workers, "worker pool stopping");
            self.cancel.cancel();
        }
    }

    /// Next published result, or `None` once every worker has exited.
    pub async fn next_result(&mut self) -> Option<R> {
        self.results.recv().await
    }

    /// Close the queue and wait for every worker to exit.
    pub async fn join(mut self) {
        self.close();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "worker task ended abnormally");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
            && !self.cancel.is_cancelled()
            && self.counters.live_workers.load(Ordering::Acquire) > 0
    }

    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            workers: self.workers,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            live_workers: self.counters.live_workers.load(Ordering::Acquire),
        }
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        // Detached workers must not outlive their pool.
        if !self.handles.is_empty() {
            self.cancel.cancel();
        }
    }
}

async fn worker_loop<J, R, H>(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<J>>>,
    results: mpsc::UnboundedSender<R>,
    handler: Arc<H>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) where
    J: Send + 'static,
    R: Send + 'static,
    H: JobHandler<J, R>,
{
    tracing::trace!(worker_id, "worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = async { jobs.lock().await.recv().await } => job,
        };

        let Some(job) = job else {
            break;
        };

        let result = handler.handle(worker_id, job, &cancel).await;
        counters.processed.fetch_add(1, Ordering::Relaxed);

        if results.send(result).is_err() {
            tracing::debug!(worker_id, "result stream dropped by consumer");
            break;
        }
    }

    counters.live_workers.fetch_sub(1, Ordering::AcqRel);
    tracing::trace!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Square;

    #[async_trait]
    impl JobHandler<u64, u64> for Square {
        async fn handle(&self, _worker_id: usize, job: u64, _cancel: &CancellationToken) -> u64 {
            job * job
        }
    }

    /// Sleeps for a long time unless cancelled
    struct Sleeper;

    #[async_trait]
    impl JobHandler<u64, Option<u64>> for Sleeper {
        async fn handle(
            &self,
            _worker_id: usize,
            job: u64,
            cancel: &CancellationToken,
        ) -> Option<u64> {
            tokio::select! {
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep(Duration::from_secs(30)) => Some(job),
            }
        }
    }

    #[tokio::test]
    async fn test_processes_every_job_then_closes_stream() {
        let mut pool = WorkerPool::start(3, Square, CancellationToken::new());
        for n in 1..=20u64 {
            pool.submit(n).await.unwrap();
        }
        pool.close();

        let mut results = Vec::new();
        while let Some(result) = pool.next_result().await {
            results.push(result);
        }
        results.sort_unstable();

        let expected: Vec<u64> = (1..=20u64).map(|n| n * n).collect();
        assert_eq!(results, expected);
        assert_eq!(pool.statistics().processed, 20);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_zero_workers_normalized_to_one() {
        let pool: WorkerPool<u64, u64> = WorkerPool::start(0, Square, CancellationToken::new());
        assert_eq!(pool.worker_count(), 1);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_undrained_results_do_not_block_workers() {
        let mut pool = WorkerPool::start(2, Square, CancellationToken::new());
        for n in 0..500u64 {
            pool.submit(n).await.unwrap();
        }
        pool.close();

        // Nobody reads the result stream; workers must still finish.
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("pool deadlocked on undrained results");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_with_inflight_jobs() {
        let mut pool = WorkerPool::start(4, Sleeper, CancellationToken::new());
        for n in 0..8u64 {
            pool.submit(n).await.unwrap();
        }

        pool.stop();
        pool.stop();
        assert!(!pool.is_running());
        assert!(matches!(
            pool.submit(99).await,
            Err(ConcurrencyError::PoolStopped)
        ));

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            while let Some(result) = pool.next_result().await {
                seen.push(result);
            }
            seen
        })
        .await
        .expect("stream did not close after stop");
        assert!(drained.iter().all(Option::is_none));

        pool.stop();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_workers() {
        let parent = CancellationToken::new();
        let mut pool = WorkerPool::start(2, Sleeper, parent.clone());
        pool.submit(1).await.unwrap();
        pool.submit(2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        parent.cancel();

        let started = std::time::Instant::now();
        while pool.next_result().await.is_some() {}
        assert!(started.elapsed() < Duration::from_secs(2));
        pool.join().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let pool: WorkerPool<u64, u64> = WorkerPool::start(1, Square, parent.clone());
        pool.stop();
        assert!(!parent.is_cancelled());
        pool.join().await;
    }
}
