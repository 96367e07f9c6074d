//! Result aggregation and duration estimation

use super::{SyncResult, SyncTask};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_PARALLELISM};
use serde::Serialize;
use std::time::Duration;

/// Assumed cost of one copy when estimating a run
pub const DEFAULT_TASK_COST: Duration = Duration::from_secs(30);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Aggregate view over a set of results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_bytes: u64,
    /// Percentage of results that succeeded
    pub success_rate: f64,
    /// MB/s over the summed task durations
    pub throughput_mbps: f64,
    #[serde(with = "crate::config::duration_secs")]
    pub average_duration: Duration,
    #[serde(with = "crate::config::duration_secs")]
    pub total_duration: Duration,
}

pub fn calculate_statistics(results: &[SyncResult]) -> BatchStatistics {
    let total = results.len();
    if total == 0 {
        return BatchStatistics::default();
    }

    let completed = results.iter().filter(|r| r.is_success()).count();
    let failed = results.iter().filter(|r| r.is_failure()).count();
    let skipped = results.iter().filter(|r| r.is_skipped()).count();
    let total_bytes: u64 = results.iter().map(SyncResult::bytes_copied).sum();
    let total_duration: Duration = results.iter().map(|r| r.duration).sum();

    let seconds = total_duration.as_secs_f64();
    let throughput_mbps = if seconds > 0.0 {
        total_bytes as f64 / BYTES_PER_MB / seconds
    } else {
        0.0
    };

    BatchStatistics {
        total,
        completed,
        failed,
        skipped,
        total_bytes,
        success_rate: completed as f64 / total as f64 * 100.0,
        throughput_mbps,
        average_duration: mean_duration(total_duration, total),
        total_duration,
    }
}

fn mean_duration(sum: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(count) => sum / count,
        Err(_) => Duration::from_secs_f64(sum.as_secs_f64() / count as f64),
    }
}

/// Wall-clock estimate for running `tasks` with the given knobs.
pub fn estimate_duration(tasks: &[SyncTask], parallelism: usize, batch_size: usize) -> Duration {
    estimate_duration_with_cost(tasks.len(), parallelism, batch_size, DEFAULT_TASK_COST)
}

/// Batches run back to back; within a batch, tasks run in waves of
/// `min(parallelism, batch_len)`. More workers never lengthen the estimate.
pub fn estimate_duration_with_cost(
    task_count: usize,
    parallelism: usize,
    batch_size: usize,
    task_cost: Duration,
) -> Duration {
    if task_count == 0 {
        return Duration::ZERO;
    }
    let parallelism = if parallelism == 0 { DEFAULT_PARALLELISM } else { parallelism };
    let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };

    let mut waves: u64 = 0;
    let mut remaining = task_count;
    while remaining > 0 {
        let batch = remaining.min(batch_size);
        let lanes = parallelism.min(batch);
        waves += batch.div_ceil(lanes) as u64;
        remaining -= batch;
    }

    task_cost.saturating_mul(u32::try_from(waves).unwrap_or(u32::MAX))
}
