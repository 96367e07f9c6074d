//! Run-wide replication policy

use crate::concurrency::BackoffPolicy;
use crate::error::{ReplicationError, Result, handlers::ValidationErrorHandler};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_PARALLELISM: usize = 3;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_BATCH_SIZE: usize = 1;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

pub const MAX_RETRY_ATTEMPTS: u32 = 20;
pub const MAX_PARALLELISM: usize = 1024;

/// Policy supplied once when a [`BatchExecutor`](crate::sync::BatchExecutor)
/// is constructed.
///
/// Zero values for sizes, parallelism and timeout mean "use the default";
/// call [`SyncConfig::normalized`] to resolve them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tasks dispatched together before the next batch starts (default 10)
    pub batch_size: usize,
    /// Maximum concurrent workers (default 3)
    pub parallelism: usize,
    /// Retries after the first failed attempt (default 3)
    pub retry_attempts: u32,
    /// Time budget of a single attempt (default 300s)
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Base delay of the exponential backoff (default 5s)
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,
    /// Backoff ceiling (default 60s)
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
    /// Keep going after a task fails terminally (default true)
    pub continue_on_error: bool,
    /// Schedule everything but never call the copier
    pub dry_run: bool,
    /// Resize batches from the previous batch's success rate
    pub adaptive_batching: bool,
    /// Lower bound for adaptive batch sizes (default 1)
    pub min_batch_size: usize,
    /// Upper bound for adaptive batch sizes (default 50)
    pub max_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            continue_on_error: true,
            dry_run: false,
            adaptive_batching: false,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl SyncConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_adaptive_batching(mut self, min: usize, max: usize) -> Self {
        self.adaptive_batching = true;
        self.min_batch_size = min;
        self.max_batch_size = max;
        self
    }

    /// Replace zero values with their documented defaults.
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.parallelism == 0 {
            self.parallelism = DEFAULT_PARALLELISM;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.min_batch_size == 0 {
            self.min_batch_size = DEFAULT_MIN_BATCH_SIZE;
        }
        if self.max_batch_size == 0 {
            self.max_batch_size = DEFAULT_MAX_BATCH_SIZE;
        }
        if self.adaptive_batching && self.min_batch_size <= self.max_batch_size {
            self.batch_size = self.batch_size.clamp(self.min_batch_size, self.max_batch_size);
        }
        self
    }

    /// Reject values that cannot be normalized safely.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ReplicationError::Configuration(format!(
                "retry_attempts must be at most {} (got {})",
                MAX_RETRY_ATTEMPTS, self.retry_attempts
            )));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(ReplicationError::Configuration(format!(
                "parallelism must be at most {} (got {})",
                MAX_PARALLELISM, self.parallelism
            )));
        }
        if self.max_backoff < self.retry_backoff {
            return Err(ReplicationError::Configuration(
                "max_backoff must be >= retry_backoff".to_string(),
            ));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(ReplicationError::Configuration(
                "min_batch_size must be <= max_batch_size".to_string(),
            ));
        }
        ValidationErrorHandler::validate_timeout(self.timeout.as_secs())?;
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry_backoff, self.max_backoff)
    }
}

/// Durations as (fractional) seconds in serialized configs and checkpoints
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
