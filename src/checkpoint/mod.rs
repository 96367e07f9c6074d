//! Checkpoints for resumable tree replication

pub mod resume;
pub mod store;
pub mod types;

pub use resume::{needs_work, prepare_resume, remaining_repositories, resumable_checkpoints};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use types::{
    CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointSummary, RepoStatus, RepoTask, ResumeOptions,
    RunStatus,
};
