//! Registry Replicator Library
//!
//! Batch replication of container images between registries: a cancellable
//! worker pool, a batch executor with retries and timeouts, repository path
//! mapping, and checkpoints that let tree-wide runs resume after interruption.

pub mod checkpoint;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod registry;
pub mod sync;
pub mod tree;

pub use config::SyncConfig;
pub use error::{ReplicationError, Result};
pub use sync::{BatchExecutor, SyncResult, SyncTask};
pub use tree::TreeReplicator;
