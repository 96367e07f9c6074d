//! Copier backed by an external image-copy tool

use super::{Copier, ImageReference};
use crate::error::{ReplicationError, Result, handlers::CopyFailureHandler};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Runs `<program> <args...> docker://<source> docker://<destination>` per copy.
///
/// The child process is killed if the copy is cancelled. The tool does not
/// report transfer sizes, so successful copies count zero bytes unless the
/// tool prints a `bytes=<n>` line on stdout.
#[derive(Debug, Clone)]
pub struct CommandCopier {
    program: String,
    args: Vec<String>,
    transport: String,
}

impl CommandCopier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            transport: "docker://".to_string(),
        }
    }

    /// `skopeo copy --all`, leaving retries to the engine
    pub fn skopeo() -> Self {
        Self::new("skopeo").with_args(["copy", "--all", "--retry-times", "0"])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the tool for one copy
    pub fn command_line(&self, source: &ImageReference, destination: &ImageReference) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(format!("{}{}", self.transport, source));
        args.push(format!("{}{}", self.transport, destination));
        args
    }

    fn parse_bytes(stdout: &str) -> u64 {
        stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("bytes="))
            .filter_map(|value| value.trim().parse::<u64>().ok())
            .last()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Copier for CommandCopier {
    async fn copy(
        &self,
        source: &ImageReference,
        destination: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut command = Command::new(&self.program);
        command
            .args(self.command_line(source, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReplicationError::Configuration(format!(
                    "Copy tool '{}' not found in PATH",
                    self.program
                ))
            } else {
                ReplicationError::Io(format!("Failed to start '{}': {}", self.program, e))
            }
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ReplicationError::Cancelled(format!(
                    "copy {} -> {} aborted",
                    source, destination
                )));
            }
            output = child.wait_with_output() => output?,
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(Self::parse_bytes(&stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(CopyFailureHandler::classify(
                output.status.code(),
                &stderr,
                &format!("copy {} -> {}", source, destination),
            ))
        }
    }
}
