//! Resume decisions

use super::store::CheckpointStore;
use super::types::{Checkpoint, CheckpointSummary, RepoStatus, RepoTask, ResumeOptions, RunStatus};
use crate::error::{ReplicationError, Result};

/// Whether a repository in `status` still needs work under `options`.
///
/// Pending and interrupted (in-progress) repositories always do; failed ones
/// only when retrying; completed ones only when forced or not skipped.
pub fn needs_work(status: RepoStatus, options: &ResumeOptions) -> bool {
    match status {
        RepoStatus::Pending | RepoStatus::InProgress => true,
        RepoStatus::Failed => options.retry_failed,
        RepoStatus::Completed => options.force || !options.skip_completed,
    }
}

/// Remaining work, in checkpoint order.
pub fn remaining_repositories(checkpoint: &Checkpoint, options: &ResumeOptions) -> Vec<RepoTask> {
    checkpoint
        .repo_tasks
        .iter()
        .filter(|task| needs_work(task.status, options))
        .cloned()
        .collect()
}

/// Summaries of every checkpoint that has not completed
pub async fn resumable_checkpoints(store: &dyn CheckpointStore) -> Result<Vec<CheckpointSummary>> {
    Ok(store
        .list()
        .await?
        .iter()
        .filter(|checkpoint| checkpoint.status.is_resumable())
        .map(Checkpoint::summary)
        .collect())
}

/// Load a checkpoint for resumption, record `options` in it and mark the run
/// in progress again. Returns the checkpoint and its remaining work.
pub async fn prepare_resume(
    store: &dyn CheckpointStore,
    id: &str,
    options: ResumeOptions,
) -> Result<(Checkpoint, Vec<RepoTask>)> {
    let mut checkpoint = store.load(id).await?;
    if !checkpoint.status.is_resumable() && !options.force && options.skip_completed {
        return Err(ReplicationError::Checkpoint(format!(
            "checkpoint {} already completed; use force to run it again",
            id
        )));
    }

    checkpoint.resume = options;
    checkpoint.set_run_status(RunStatus::InProgress, None);
    store.save(&checkpoint).await?;

    let remaining = remaining_repositories(&checkpoint, &options);
    tracing::info!(
        checkpoint_id = id,
        remaining = remaining.len(),
        total = checkpoint.repo_tasks.len(),
        "resuming checkpoint"
    );
    Ok((checkpoint, remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;

    fn checkpoint() -> Checkpoint {
        let mut checkpoint = Checkpoint::new("src", "", "dst", "").with_id("resume-me");
        for repo in ["A", "B", "C"] {
            checkpoint.add_repository(repo, repo);
        }
        checkpoint.set_repo_status("A", RepoStatus::InProgress, None).unwrap();
        checkpoint.set_repo_status("A", RepoStatus::Completed, None).unwrap();
        checkpoint.set_repo_status("B", RepoStatus::InProgress, None).unwrap();
        checkpoint.set_repo_status("B", RepoStatus::Failed, Some("timeout".into())).unwrap();
        checkpoint
    }

    fn names(tasks: &[RepoTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.repository.as_str()).collect()
    }

    #[test]
    fn test_retry_failed_skips_completed() {
        let options = ResumeOptions {
            skip_completed: true,
            retry_failed: true,
            force: false,
        };
        assert_eq!(names(&remaining_repositories(&checkpoint(), &options)), vec!["B", "C"]);
    }

    #[test]
    fn test_defaults_only_resume_pending() {
        assert_eq!(
            names(&remaining_repositories(&checkpoint(), &ResumeOptions::default())),
            vec!["C"]
        );
    }

    #[test]
    fn test_force_includes_completed() {
        let options = ResumeOptions {
            skip_completed: true,
            retry_failed: false,
            force: true,
        };
        assert_eq!(names(&remaining_repositories(&checkpoint(), &options)), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_prepare_resume_records_options() {
        let store = MemoryCheckpointStore::new();
        let mut checkpoint = checkpoint();
        checkpoint.set_run_status(RunStatus::Interrupted, Some("ctrl-c".into()));
        store.create(checkpoint).await.unwrap();

        let options = ResumeOptions {
            retry_failed: true,
            ..Default::default()
        };
        let (loaded, remaining) = prepare_resume(&store, "resume-me", options).await.unwrap();
        assert_eq!(loaded.status, RunStatus::InProgress);
        assert_eq!(names(&remaining), vec!["B", "C"]);

        // Failed repositories may now be reopened.
        store
            .update_repo_status("resume-me", "B", RepoStatus::InProgress, None)
            .await
            .unwrap();

        let summaries = resumable_checkpoints(&store).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].completed, 1);
    }

    #[tokio::test]
    async fn test_completed_runs_need_force() {
        let store = MemoryCheckpointStore::new();
        let mut checkpoint = checkpoint();
        checkpoint.set_run_status(RunStatus::Completed, None);
        store.create(checkpoint).await.unwrap();

        assert!(prepare_resume(&store, "resume-me", ResumeOptions::default()).await.is_err());
        assert!(resumable_checkpoints(&store).await.unwrap().is_empty());
    }
}
