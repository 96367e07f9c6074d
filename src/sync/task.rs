//! Replication tasks and their results

use crate::error::ReplicationError;
use crate::registry::ImageReference;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One source tag to one destination tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTask {
    pub source_registry: String,
    pub source_repository: String,
    pub source_tag: String,
    pub destination_registry: String,
    pub destination_repository: String,
    pub destination_tag: String,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
}

impl SyncTask {
    /// Copy `source` to `destination`, keeping the tag.
    pub fn new(source: ImageReference, destination_registry: &str, destination_repository: &str) -> Self {
        Self {
            destination_registry: destination_registry.to_string(),
            destination_repository: destination_repository.to_string(),
            destination_tag: source.tag.clone(),
            source_registry: source.registry,
            source_repository: source.repository,
            source_tag: source.tag,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_destination_tag(mut self, tag: impl Into<String>) -> Self {
        self.destination_tag = tag.into();
        self
    }

    pub fn source(&self) -> ImageReference {
        ImageReference::new(&self.source_registry, &self.source_repository, &self.source_tag)
    }

    pub fn destination(&self) -> ImageReference {
        ImageReference::new(
            &self.destination_registry,
            &self.destination_repository,
            &self.destination_tag,
        )
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

/// Terminal state of a task. Exactly one applies.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded { bytes: u64 },
    Failed(ReplicationError),
    Skipped { reason: String },
}

/// Outcome of one [`SyncTask`], never mutated after the worker produced it.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub task: SyncTask,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    /// Copy attempts made (0 when the copier was never called)
    pub attempts: u32,
}

impl SyncResult {
    pub fn succeeded(task: SyncTask, bytes: u64, duration: Duration, attempts: u32) -> Self {
        Self {
            task,
            outcome: TaskOutcome::Succeeded { bytes },
            duration,
            attempts,
        }
    }

    pub fn failed(task: SyncTask, error: ReplicationError, duration: Duration, attempts: u32) -> Self {
        Self {
            task,
            outcome: TaskOutcome::Failed(error),
            duration,
            attempts,
        }
    }

    pub fn skipped(task: SyncTask, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            task,
            outcome: TaskOutcome::Skipped {
                reason: reason.into(),
            },
            duration,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Skipped { .. })
    }

    pub fn error(&self) -> Option<&ReplicationError> {
        match &self.outcome {
            TaskOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    /// Bytes moved; zero unless the task succeeded
    pub fn bytes_copied(&self) -> u64 {
        match self.outcome {
            TaskOutcome::Succeeded { bytes } => bytes,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_keeps_tag_by_default() {
        let task = SyncTask::new(
            ImageReference::new("docker.io", "library/redis", "7"),
            "mirror.local",
            "cache/redis",
        );
        assert_eq!(task.destination().to_string(), "mirror.local/cache/redis:7");
        assert_eq!(
            task.to_string(),
            "docker.io/library/redis:7 -> mirror.local/cache/redis:7"
        );
    }

    #[test]
    fn test_result_exposes_a_single_terminal_state() {
        let task = SyncTask::new(ImageReference::new("r1", "a", "1"), "r2", "a");
        let ok = SyncResult::succeeded(task.clone(), 42, Duration::from_millis(5), 1);
        assert!(ok.is_success() && !ok.is_failure() && !ok.is_skipped());
        assert_eq!(ok.bytes_copied(), 42);

        let failed = SyncResult::failed(
            task.clone(),
            ReplicationError::Permanent("denied".into()),
            Duration::ZERO,
            1,
        );
        assert!(failed.error().is_some());
        assert_eq!(failed.bytes_copied(), 0);

        let skipped = SyncResult::skipped(task, "dry run", Duration::ZERO);
        assert_eq!(skipped.skip_reason(), Some("dry run"));
        assert!(skipped.error().is_none());
    }

    #[test]
    fn test_task_file_priority_defaults_to_zero() {
        let task: SyncTask = serde_json::from_str(
            r#"{"source_registry": "r1", "source_repository": "a", "source_tag": "1",
                "destination_registry": "r2", "destination_repository": "b", "destination_tag": "1"}"#,
        )
        .unwrap();
        assert_eq!(task.priority, 0);
    }
}
