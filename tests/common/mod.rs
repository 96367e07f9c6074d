#![allow(dead_code)]

use async_trait::async_trait;
use registry_replicator::config::SyncConfig;
use registry_replicator::error::{ReplicationError, Result};
use registry_replicator::registry::{Copier, ImageReference, InventoryRegistryClient};
use registry_replicator::sync::SyncTask;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the scripted copier does for one source repository
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { bytes: u64, delay: Duration },
    Permanent,
    /// Fail transiently this many times, then succeed
    Flaky { failures: usize },
    AlwaysTransient,
    /// Sleep far beyond any test timeout
    Hang,
}

/// Copier driven by per-repository behaviors; unknown repositories succeed.
pub struct ScriptedCopier {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedCopier {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, repository: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(repository.to_string(), behavior);
        self
    }

    pub fn calls(&self, repository: &str) -> usize {
        self.calls.lock().unwrap().get(repository).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Copier for ScriptedCopier {
    async fn copy(
        &self,
        source: &ImageReference,
        _destination: &ImageReference,
        _cancel: &CancellationToken,
    ) -> Result<u64> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(source.repository.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behavior = self.behaviors.get(&source.repository).cloned().unwrap_or(Behavior::Succeed {
            bytes: 1024,
            delay: Duration::from_millis(5),
        });
        match behavior {
            Behavior::Succeed { bytes, delay } => {
                tokio::time::sleep(delay).await;
                Ok(bytes)
            }
            Behavior::Permanent => Err(ReplicationError::Permanent(format!(
                "manifest unknown: {}",
                source
            ))),
            Behavior::Flaky { failures } if call <= failures => Err(ReplicationError::Transient(
                format!("connection reset ({})", call),
            )),
            Behavior::Flaky { .. } => Ok(2048),
            Behavior::AlwaysTransient => {
                Err(ReplicationError::Transient("503 service unavailable".to_string()))
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
        }
    }
}

/// One task per repository name, `src.example.com/<repo>:latest`
pub fn tasks(repositories: &[&str]) -> Vec<SyncTask> {
    repositories
        .iter()
        .map(|repo| {
            SyncTask::new(
                ImageReference::new("src.example.com", *repo, "latest"),
                "dst.example.com",
                &format!("mirror/{}", repo),
            )
        })
        .collect()
}

/// Millisecond backoff so retry tests stay fast
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_backoff(Duration::from_millis(1), Duration::from_millis(10))
        .with_timeout(Duration::from_secs(10))
}

pub fn source_registry() -> InventoryRegistryClient {
    InventoryRegistryClient::new("src.example.com")
        .with_repository("team/api", ["v1", "v2", "latest"])
        .with_repository("team/web", ["v1", "v1-rc1"])
        .with_repository("team/worker", ["v3"])
        .with_repository("other/tool", ["1.0"])
}
