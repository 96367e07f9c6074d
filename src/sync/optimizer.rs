//! Task ordering ahead of execution

use super::SyncTask;

/// Reorder tasks: descending priority, then grouped by source registry so
/// consecutive copies reuse connections and credentials.
///
/// The sort is stable, so tasks that tie on both keys keep their input order.
pub fn optimize_batches(mut tasks: Vec<SyncTask>) -> Vec<SyncTask> {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.source_registry.cmp(&b.source_registry))
    });
    tasks
}
