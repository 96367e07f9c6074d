//! Concurrency primitives for the replication engine
//!
//! This module provides the bounded [`WorkerPool`] the batch executor is built
//! on, and the [`BackoffPolicy`] used between retry attempts.
//!
//! ## Usage Example
//!
//! ```no_run
//! use registry_replicator::concurrency::{JobHandler, WorkerPool};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Doubler;
//!
//! #[async_trait::async_trait]
//! impl JobHandler<u64, u64> for Doubler {
//!     async fn handle(&self, _worker_id: usize, job: u64, _cancel: &CancellationToken) -> u64 {
//!         job * 2
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pool = WorkerPool::start(4, Doubler, CancellationToken::new());
//! pool.submit(21).await?;
//! pool.close();
//! while let Some(result) = pool.next_result().await {
//!     assert_eq!(result, 42);
//! }
//! pool.join().await;
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod retry;

pub use pool::{JobHandler, WorkerPool};
pub use retry::BackoffPolicy;

/// Worker pool error types
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("Worker pool is stopped")]
    PoolStopped,

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Submission cancelled")]
    Cancelled,
}

/// Point-in-time counters for a worker pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// Number of worker executors
    pub workers: usize,
    /// Jobs accepted by `submit`
    pub submitted: u64,
    /// Jobs whose result has been published
    pub processed: u64,
    /// Workers that have not exited yet
    pub live_workers: usize,
}

impl PoolStatistics {
    /// Jobs accepted but not yet finished
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.processed)
    }
}
