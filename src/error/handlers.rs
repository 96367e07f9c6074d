//! Standardized error classification for copy failures and input validation

use crate::error::{ReplicationError, Result};

/// Maps the diagnostic output of an external image-copy tool onto the
/// transient / permanent taxonomy.
pub struct CopyFailureHandler;

impl CopyFailureHandler {
    /// Classify a failed copy from the tool's exit code and stderr text.
    pub fn classify(exit_code: Option<i32>, stderr: &str, context: &str) -> ReplicationError {
        let text = stderr.to_lowercase();
        let summary = Self::summarize(stderr);

        if Self::is_permanent_failure(&text) {
            return ReplicationError::Permanent(format!("{} rejected: {}", context, summary));
        }

        if Self::is_rate_limited(&text) {
            return ReplicationError::Transient(format!(
                "Rate limited during {}: {}",
                context, summary
            ));
        }

        match exit_code {
            // Killed by a signal; treat as an interrupted transfer.
            None => ReplicationError::Transient(format!("{} interrupted: {}", context, summary)),
            Some(code) => ReplicationError::Transient(format!(
                "{} failed (exit status {}): {}",
                context, code, summary
            )),
        }
    }

    /// Failures no amount of retrying will fix
    pub fn is_permanent_failure(lowercase_text: &str) -> bool {
        const PERMANENT_MARKERS: &[&str] = &[
            "unauthorized",
            "denied",
            "forbidden",
            "manifest unknown",
            "name unknown",
            "not found",
            "invalid reference",
            "invalid reference format",
            "repository name must",
            "unsupported",
        ];
        PERMANENT_MARKERS
            .iter()
            .any(|marker| lowercase_text.contains(marker))
    }

    pub fn is_rate_limited(lowercase_text: &str) -> bool {
        lowercase_text.contains("toomanyrequests") || lowercase_text.contains("429")
    }

    /// Last non-empty line of tool output, which is where copy tools put the
    /// actual error.
    fn summarize(stderr: &str) -> String {
        stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no diagnostic output")
            .to_string()
    }
}

/// Validation error utilities
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    /// Repository paths as accepted by OCI distribution registries
    pub fn validate_repository(repository: &str) -> Result<()> {
        if repository.is_empty() {
            return Err(ReplicationError::Configuration(
                "Repository name cannot be empty".to_string(),
            ));
        }

        if repository.starts_with('/') || repository.ends_with('/') || repository.contains("//")
        {
            return Err(ReplicationError::Configuration(format!(
                "Invalid repository path: {}",
                repository
            )));
        }

        if repository.chars().any(|c| c.is_whitespace() || c.is_ascii_uppercase()) {
            return Err(ReplicationError::Configuration(format!(
                "Repository path must be lowercase without whitespace: {}",
                repository
            )));
        }

        Ok(())
    }

    pub fn validate_tag(tag: &str) -> Result<()> {
        if tag.is_empty() || tag.len() > 128 {
            return Err(ReplicationError::Configuration(format!(
                "Tag must be between 1 and 128 characters: '{}'",
                tag
            )));
        }

        if tag.starts_with('.') || tag.starts_with('-') {
            return Err(ReplicationError::Configuration(format!(
                "Tag cannot start with '.' or '-': {}",
                tag
            )));
        }

        Ok(())
    }

    /// Standard numeric range validation
    pub fn validate_timeout(timeout_secs: u64) -> Result<()> {
        if timeout_secs > 86400 {
            // 24 hours
            return Err(ReplicationError::Configuration(
                "Timeout cannot exceed 24 hours (86400 seconds)".to_string(),
            ));
        }

        Ok(())
    }
}
