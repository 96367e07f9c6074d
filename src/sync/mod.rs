//! Batch replication: tasks, ordering, execution and statistics
//!
//! ```text
//! task list -> optimize_batches -> BatchExecutor::execute -> calculate_statistics
//! ```

pub mod executor;
pub mod optimizer;
pub mod stats;
pub mod task;

pub use executor::{BatchExecutor, ExecutionOutcome, TaskObserver};
pub use optimizer::optimize_batches;
pub use stats::{
    BatchStatistics, DEFAULT_TASK_COST, calculate_statistics, estimate_duration,
    estimate_duration_with_cost,
};
pub use task::{SyncResult, SyncTask, TaskOutcome};
