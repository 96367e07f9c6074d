//! Configuration management module
//!
//! Precedence, lowest first: built-in defaults, the JSON config file,
//! `REPLICATOR_*` environment variables, command-line flags.

use super::args::ExecutionArgs;
use crate::config::SyncConfig;
use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHECKPOINT_DIR: &str = ".replicator/checkpoints";
pub const DEFAULT_COPY_TOOL: &str = "skopeo";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_enabled: bool,
    pub copy_tool: String,
    /// Arguments placed before the source and destination references
    pub copy_args: Vec<String>,
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            checkpoint_enabled: true,
            copy_tool: DEFAULT_COPY_TOOL.to_string(),
            copy_args: Vec::new(),
            verbose: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.sync.clone().normalized().validate()?;
        if self.copy_tool.trim().is_empty() {
            return Err(ReplicationError::Configuration(
                "copy_tool cannot be empty".to_string(),
            ));
        }
        if self.checkpoint_enabled && self.checkpoint_dir.as_os_str().is_empty() {
            return Err(ReplicationError::Configuration(
                "checkpoint_dir cannot be empty when checkpoints are enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Read a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ReplicationError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        Self::default().with_vars(|key| std::env::var(key).ok())
    }

    /// Apply `REPLICATOR_*` values supplied by `lookup`. Unparseable values
    /// are ignored.
    pub fn with_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }
        fn flag(value: Option<String>) -> Option<bool> {
            value.map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        }

        if let Some(workers) = parsed(lookup("REPLICATOR_WORKERS")) {
            self.sync.parallelism = workers;
        }
        if let Some(batch_size) = parsed(lookup("REPLICATOR_BATCH_SIZE")) {
            self.sync.batch_size = batch_size;
        }
        if let Some(retry) = parsed(lookup("REPLICATOR_RETRY_ATTEMPTS")) {
            self.sync.retry_attempts = retry;
        }
        if let Some(timeout) = parsed::<u64>(lookup("REPLICATOR_TIMEOUT")) {
            self.sync.timeout = Duration::from_secs(timeout);
        }
        if let Some(continue_on_error) = flag(lookup("REPLICATOR_CONTINUE_ON_ERROR")) {
            self.sync.continue_on_error = continue_on_error;
        }
        if let Some(dry_run) = flag(lookup("REPLICATOR_DRY_RUN")) {
            self.sync.dry_run = dry_run;
        }
        if let Some(dir) = lookup("REPLICATOR_CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(tool) = lookup("REPLICATOR_COPY_TOOL") {
            self.copy_tool = tool;
        }
        if let Some(verbose) = flag(lookup("REPLICATOR_VERBOSE")) {
            self.verbose = verbose;
        }
        self
    }

    /// Merge with another config, preferring its non-default values
    pub fn merge(mut self, other: &AppConfig) -> Self {
        let default = AppConfig::default();
        let default_sync = &default.sync;
        let sync = &other.sync;

        if sync.batch_size != default_sync.batch_size {
            self.sync.batch_size = sync.batch_size;
        }
        if sync.parallelism != default_sync.parallelism {
            self.sync.parallelism = sync.parallelism;
        }
        if sync.retry_attempts != default_sync.retry_attempts {
            self.sync.retry_attempts = sync.retry_attempts;
        }
        if sync.timeout != default_sync.timeout {
            self.sync.timeout = sync.timeout;
        }
        if sync.retry_backoff != default_sync.retry_backoff {
            self.sync.retry_backoff = sync.retry_backoff;
        }
        if sync.max_backoff != default_sync.max_backoff {
            self.sync.max_backoff = sync.max_backoff;
        }
        if sync.continue_on_error != default_sync.continue_on_error {
            self.sync.continue_on_error = sync.continue_on_error;
        }
        if sync.dry_run != default_sync.dry_run {
            self.sync.dry_run = sync.dry_run;
        }
        if sync.adaptive_batching != default_sync.adaptive_batching {
            self.sync.adaptive_batching = sync.adaptive_batching;
            self.sync.min_batch_size = sync.min_batch_size;
            self.sync.max_batch_size = sync.max_batch_size;
        }
        if other.checkpoint_dir != default.checkpoint_dir {
            self.checkpoint_dir = other.checkpoint_dir.clone();
        }
        if other.checkpoint_enabled != default.checkpoint_enabled {
            self.checkpoint_enabled = other.checkpoint_enabled;
        }
        if other.copy_tool != default.copy_tool {
            self.copy_tool = other.copy_tool.clone();
        }
        if other.copy_args != default.copy_args {
            self.copy_args = other.copy_args.clone();
        }
        if other.verbose != default.verbose {
            self.verbose = other.verbose;
        }

        self
    }

    /// Apply command-line execution flags on top of this config.
    pub fn with_execution_args(mut self, args: &ExecutionArgs) -> Self {
        if let Some(workers) = args.workers {
            self.sync.parallelism = workers;
        }
        if let Some(batch_size) = args.batch_size {
            self.sync.batch_size = batch_size;
        }
        if let Some(retry) = args.retry {
            self.sync.retry_attempts = retry;
        }
        if let Some(timeout) = args.timeout {
            self.sync.timeout = Duration::from_secs(timeout);
        }
        if args.stop_on_error {
            self.sync.continue_on_error = false;
        }
        if args.dry_run {
            self.sync.dry_run = true;
        }
        if args.adaptive {
            self.sync.adaptive_batching = true;
        }
        if let Some(tool) = &args.copy_tool {
            self.copy_tool = tool.clone();
        }
        self
    }
}
