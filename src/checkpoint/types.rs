//! Persisted checkpoint model

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Newest checkpoint layout this build reads and writes
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Per-repository progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::InProgress => "in_progress",
            RepoStatus::Completed => "completed",
            RepoStatus::Failed => "failed",
        }
    }

    /// Legal moves: `pending -> in_progress -> completed | failed`, plus
    /// `failed -> in_progress` when retrying failures and
    /// `completed -> in_progress` when forced or not skipping completed work.
    /// Re-applying the current status is always allowed.
    pub fn can_transition(self, to: RepoStatus, options: &ResumeOptions) -> bool {
        use RepoStatus::*;
        self == to
            || matches!(
                (self, to),
                (Pending, InProgress) | (InProgress, Completed) | (InProgress, Failed)
            )
            || (self == Failed && to == InProgress && options.retry_failed)
            || (self == Completed
                && to == InProgress
                && (options.force || !options.skip_completed))
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_resumable(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a resumed run treats repositories that already finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeOptions {
    pub skip_completed: bool,
    pub retry_failed: bool,
    /// Re-run completed repositories even when `skip_completed` is set
    pub force: bool,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            skip_completed: true,
            retry_failed: false,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoTask {
    /// Source repository path
    pub repository: String,
    /// Destination repository path
    #[serde(default)]
    pub destination: String,
    pub status: RepoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl RepoTask {
    pub fn pending(repository: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            destination: destination.into(),
            status: RepoStatus::Pending,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// State of one tree replication run.
///
/// `repo_tasks` is the only record of per-repository progress; counts and
/// progress figures are always derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub source_registry: String,
    #[serde(default)]
    pub source_prefix: String,
    #[serde(default)]
    pub destination_registry: String,
    #[serde(default)]
    pub destination_prefix: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub resume: ResumeOptions,
    #[serde(default)]
    pub repo_tasks: Vec<RepoTask>,
}

fn default_version() -> u32 {
    CHECKPOINT_FORMAT_VERSION
}

impl Checkpoint {
    pub fn new(
        source_registry: impl Into<String>,
        source_prefix: impl Into<String>,
        destination_registry: impl Into<String>,
        destination_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_FORMAT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_registry: source_registry.into(),
            source_prefix: source_prefix.into(),
            destination_registry: destination_registry.into(),
            destination_prefix: destination_prefix.into(),
            status: RunStatus::InProgress,
            last_error: None,
            resume: ResumeOptions::default(),
            repo_tasks: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Append a pending entry unless the repository is already tracked.
    pub fn add_repository(&mut self, repository: impl Into<String>, destination: impl Into<String>) {
        let repository = repository.into();
        if self.repo_task(&repository).is_none() {
            self.repo_tasks.push(RepoTask::pending(repository, destination));
        }
    }

    pub fn repo_task(&self, repository: &str) -> Option<&RepoTask> {
        self.repo_tasks.iter().find(|task| task.repository == repository)
    }

    /// Move one repository to `status`, recording `error` for failures.
    pub fn set_repo_status(
        &mut self,
        repository: &str,
        status: RepoStatus,
        error: Option<String>,
    ) -> Result<()> {
        let options = self.resume;
        let task = self
            .repo_tasks
            .iter_mut()
            .find(|task| task.repository == repository)
            .ok_or_else(|| {
                ReplicationError::NotFound(format!("repository {} in checkpoint", repository))
            })?;

        if !task.status.can_transition(status, &options) {
            return Err(ReplicationError::InvalidTransition {
                repository: repository.to_string(),
                from: task.status.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now();
        task.status = status;
        task.last_error = match status {
            RepoStatus::Failed => error,
            _ => None,
        };
        task.updated_at = now;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_run_status(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.last_error = error;
        self.updated_at = Utc::now();
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.repo_tasks.iter().filter(|task| task.status == status).count()
    }

    /// Finished repositories (completed or failed) as a percentage
    pub fn progress(&self) -> f64 {
        if self.repo_tasks.is_empty() {
            return 0.0;
        }
        let done = self.count(RepoStatus::Completed) + self.count(RepoStatus::Failed);
        done as f64 / self.repo_tasks.len() as f64 * 100.0
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            source_registry: self.source_registry.clone(),
            source_prefix: self.source_prefix.clone(),
            destination_registry: self.destination_registry.clone(),
            destination_prefix: self.destination_prefix.clone(),
            status: self.status,
            total: self.repo_tasks.len(),
            pending: self.count(RepoStatus::Pending),
            in_progress: self.count(RepoStatus::InProgress),
            completed: self.count(RepoStatus::Completed),
            failed: self.count(RepoStatus::Failed),
            progress: self.progress(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Derived, read-only overview of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub source_registry: String,
    pub source_prefix: String,
    pub destination_registry: String,
    pub destination_prefix: String,
    pub status: RunStatus,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointSummary {
    /// Wall-clock time between creation and the last update
    pub fn elapsed(&self) -> std::time::Duration {
        (self.updated_at - self.created_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        let mut checkpoint = Checkpoint::new("src", "team", "dst", "mirror/team").with_id("cp-1");
        checkpoint.add_repository("team/a", "mirror/team/a");
        checkpoint.add_repository("team/b", "mirror/team/b");
        checkpoint
    }

    #[test]
    fn test_new_repositories_start_pending() {
        let mut checkpoint = checkpoint();
        checkpoint.add_repository("team/a", "elsewhere");
        assert_eq!(checkpoint.repo_tasks.len(), 2);
        assert!(checkpoint.repo_tasks.iter().all(|t| t.status == RepoStatus::Pending));
        assert_eq!(checkpoint.status, RunStatus::InProgress);
    }

    #[test]
    fn test_forward_transitions() {
        let mut checkpoint = checkpoint();
        checkpoint.set_repo_status("team/a", RepoStatus::InProgress, None).unwrap();
        checkpoint
            .set_repo_status("team/a", RepoStatus::Failed, Some("denied".into()))
            .unwrap();
        assert_eq!(checkpoint.repo_task("team/a").unwrap().last_error.as_deref(), Some("denied"));

        let err = checkpoint
            .set_repo_status("team/b", RepoStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failed_reopens_only_when_retrying() {
        let mut checkpoint = checkpoint();
        checkpoint.set_repo_status("team/a", RepoStatus::InProgress, None).unwrap();
        checkpoint.set_repo_status("team/a", RepoStatus::Failed, Some("boom".into())).unwrap();
        assert!(checkpoint.set_repo_status("team/a", RepoStatus::InProgress, None).is_err());

        checkpoint.resume.retry_failed = true;
        checkpoint.set_repo_status("team/a", RepoStatus::InProgress, None).unwrap();
        assert!(checkpoint.repo_task("team/a").unwrap().last_error.is_none());
    }

    #[test]
    fn test_completed_reopens_only_when_forced() {
        let mut checkpoint = checkpoint();
        checkpoint.set_repo_status("team/b", RepoStatus::InProgress, None).unwrap();
        checkpoint.set_repo_status("team/b", RepoStatus::Completed, None).unwrap();
        assert!(checkpoint.set_repo_status("team/b", RepoStatus::InProgress, None).is_err());
        checkpoint.resume.force = true;
        assert!(checkpoint.set_repo_status("team/b", RepoStatus::InProgress, None).is_ok());
    }

    #[test]
    fn test_summary_is_derived_from_repo_tasks() {
        let mut checkpoint = checkpoint();
        checkpoint.set_repo_status("team/a", RepoStatus::InProgress, None).unwrap();
        checkpoint.set_repo_status("team/a", RepoStatus::Completed, None).unwrap();

        let summary = checkpoint.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert!((summary.progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "id": "old", "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z",
            "status": "interrupted", "progress": 42.0, "future_field": {"x": 1},
            "repo_tasks": [{"repository": "a", "status": "completed", "tag_tasks": []}]
        }"#;
        let checkpoint: Checkpoint = serde_json::from_str(json).unwrap();
        assert_eq!(checkpoint.version, CHECKPOINT_FORMAT_VERSION);
        assert_eq!(checkpoint.status, RunStatus::Interrupted);
        assert_eq!(checkpoint.repo_tasks[0].status, RepoStatus::Completed);
        assert!(checkpoint.resume.skip_completed);
    }
}
