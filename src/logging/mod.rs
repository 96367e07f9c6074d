//! Output control for the command-line tool
//!
//! Two channels coexist. Engine diagnostics are `tracing` events, routed by
//! [`init_tracing`] to stderr and filtered with `RUST_LOG`. Operator-facing
//! output (headings, outcomes, summaries) goes through the [`Logger`], which
//! honors `--verbose` and `--quiet`.

use crate::checkpoint::CheckpointSummary;
use crate::sync::{BatchStatistics, SyncResult, SyncTask, TaskObserver, TaskOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise engine events at `warn` and above are
/// shown, or `debug` with `verbose`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "registry_replicator=debug"
    } else {
        "registry_replicator=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Option<Instant>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Some(Instant::now()),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Some(Instant::now()),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            println!("\n=== {} ===", title);
        }
    }

    /// Sub-section heading
    pub fn subsection(&self, title: &str) {
        if !self.quiet {
            println!("\n--- {} ---", title);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("ℹ️  {}", message);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("✅ {}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            println!("⚠️  WARNING: {}", message);
        }
    }

    /// Errors are shown even in quiet mode
    pub fn error(&self, message: &str) {
        eprintln!("❌ ERROR: {}", message);
    }

    pub fn step(&self, message: &str) {
        if !self.quiet {
            println!("▶️  {}", message);
        }
    }

    /// Only shown in verbose mode
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("   {}", message);
        }
    }

    /// Key-value pair summary display
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if !self.quiet {
            self.subsection(title);
            let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
            for (key, value) in items {
                println!("  {:<width$} : {}", key, value, width = width);
            }
        }
    }

    pub fn list(&self, title: &str, items: &[String]) {
        if !self.quiet {
            self.subsection(title);
            for (i, item) in items.iter().enumerate() {
                println!("  {}. {}", i + 1, item);
            }

            if items.is_empty() {
                println!("  (No items to display)");
            }
        }
    }

    /// Raw output for machine-readable documents; printed even when quiet
    pub fn raw(&self, content: &str) {
        println!("{}", content);
    }

    /// One line per failed or skipped task; successes only when verbose
    pub fn task_result(&self, result: &SyncResult) {
        match &result.outcome {
            TaskOutcome::Succeeded { bytes } => self.detail(&format!(
                "✓ {} ({}, {}, {} attempt(s))",
                result.task,
                self.format_size(*bytes),
                self.format_duration(result.duration),
                result.attempts
            )),
            TaskOutcome::Failed(err) => self.warning(&format!(
                "{} failed after {} attempt(s): {}",
                result.task, result.attempts, err
            )),
            TaskOutcome::Skipped { reason } => {
                self.detail(&format!("- {} skipped: {}", result.task, reason))
            }
        }
    }

    pub fn statistics(&self, title: &str, stats: &BatchStatistics) {
        self.summary_kv(
            title,
            &[
                ("Tasks", stats.total.to_string()),
                ("Completed", stats.completed.to_string()),
                ("Failed", stats.failed.to_string()),
                ("Skipped", stats.skipped.to_string()),
                ("Transferred", self.format_size(stats.total_bytes)),
                ("Success rate", format!("{:.2}%", stats.success_rate)),
                ("Throughput", format!("{:.2} MB/s", stats.throughput_mbps)),
                ("Average task", self.format_duration(stats.average_duration)),
            ],
        );
    }

    pub fn checkpoint_table(&self, summaries: &[CheckpointSummary]) {
        if self.quiet {
            return;
        }
        if summaries.is_empty() {
            println!("  (No checkpoints found)");
            return;
        }
        println!(
            "  {:<36}  {:<11}  {:>7}  {:>9}  {:>6}  {}",
            "ID", "STATUS", "REPOS", "PROGRESS", "FAILED", "UPDATED"
        );
        for summary in summaries {
            println!(
                "  {:<36}  {:<11}  {:>7}  {:>8.1}%  {:>6}  {}",
                summary.id,
                summary.status.as_str(),
                summary.total,
                summary.progress,
                summary.failed,
                summary.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    /// Format file size in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs == 0 {
            format!("{}ms", duration.as_millis())
        } else if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|start| start.elapsed()).unwrap_or_default()
    }
}

/// Prints a progress line as each task finishes
pub struct ProgressReporter {
    logger: Logger,
    total: usize,
    finished: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(logger: Logger, total: usize) -> Self {
        Self {
            logger,
            total,
            finished: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskObserver for ProgressReporter {
    async fn task_started(&self, task: &SyncTask) {
        self.logger.detail(&format!("→ {}", task));
    }

    async fn task_finished(&self, result: &SyncResult) {
        let done = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        let mark = match result.outcome {
            TaskOutcome::Succeeded { .. } => "ok",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Skipped { .. } => "skipped",
        };
        self.logger
            .step(&format!("[{}/{}] {} {}", done, self.total, mark, result.task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_size(512), "512 B");
        assert_eq!(logger.format_size(1536), "1.5 KB");
        assert_eq!(logger.format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(logger.format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_duration() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(logger.format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }
}
