//! Command-line argument parsing

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registry-replicator")]
#[command(about = "Replicate container images between registries in resumable batches")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(long = "quiet", short = 'q', global = true, help = "Only print errors and results")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long = "config", global = true, help = "Path to a JSON configuration file")]
    pub config: Option<PathBuf>,

    /// Checkpoint directory
    #[arg(
        long = "checkpoint-dir",
        global = true,
        help = "Directory holding checkpoint files"
    )]
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replicate the images listed in a task file
    Sync(SyncArgs),

    /// Replicate every repository below a source prefix
    ReplicateTree(TreeArgs),

    /// Inspect and manage checkpoints
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
}

/// Knobs shared by every command that copies images
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ExecutionArgs {
    /// Number of concurrent copy workers
    #[arg(long = "workers", short = 'j', help = "Number of concurrent copy workers")]
    pub workers: Option<usize>,

    #[arg(long = "batch-size", short = 'b', help = "Tasks dispatched per batch")]
    pub batch_size: Option<usize>,

    #[arg(long = "retry", help = "Retry attempts after a failed copy")]
    pub retry: Option<u32>,

    #[arg(long = "timeout", short = 't', help = "Time budget per task, retries included, in seconds")]
    pub timeout: Option<u64>,

    #[arg(long = "stop-on-error", help = "Stop dispatching after the first failed task")]
    pub stop_on_error: bool,

    #[arg(long = "dry-run", short = 'n', help = "Plan and schedule without copying")]
    pub dry_run: bool,

    #[arg(long = "adaptive", help = "Resize batches from the observed success rate")]
    pub adaptive: bool,

    #[arg(long = "copy-tool", help = "Image copy program (default: skopeo)")]
    pub copy_tool: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(ClapArgs, Debug)]
pub struct SyncArgs {
    /// JSON file with an array of tasks
    #[arg(long = "tasks", short = 'f', help = "JSON file holding an array of sync tasks")]
    pub tasks: PathBuf,

    #[command(flatten)]
    pub execution: ExecutionArgs,

    #[arg(long = "estimate", help = "Only print the duration estimate")]
    pub estimate: bool,

    #[arg(long = "output", short = 'o', value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(ClapArgs, Debug)]
pub struct TreeArgs {
    /// Source registry inventory
    #[arg(long = "source", short = 's', help = "JSON inventory of the source registry")]
    pub source: PathBuf,

    /// Destination registry host
    #[arg(long = "destination", short = 'd', help = "Destination registry host")]
    pub destination: String,

    #[arg(
        long = "destination-inventory",
        help = "JSON inventory of the destination registry, used to skip repository creation"
    )]
    pub destination_inventory: Option<PathBuf>,

    #[arg(long = "source-prefix", default_value = "", help = "Only repositories below this path")]
    pub source_prefix: String,

    #[arg(long = "dest-prefix", default_value = "", help = "Destination path replacing the source prefix")]
    pub dest_prefix: String,

    #[arg(long = "mapping", help = "JSON file with repository mapping rules")]
    pub mapping: Option<PathBuf>,

    #[arg(long = "exclude-repo", help = "Repository wildcard to skip (repeatable)")]
    pub exclude_repo: Vec<String>,

    #[arg(long = "include-tag", help = "Only tags matching this wildcard (repeatable)")]
    pub include_tag: Vec<String>,

    #[arg(long = "exclude-tag", help = "Tag wildcard to skip (repeatable)")]
    pub exclude_tag: Vec<String>,

    #[arg(long = "latest", value_name = "N", help = "Only the N newest tags of each repository")]
    pub latest: Option<usize>,

    #[arg(long = "no-checkpoint", help = "Keep progress in memory only")]
    pub no_checkpoint: bool,

    #[arg(long = "resume", help = "Resume the run recorded in this checkpoint")]
    pub resume: Option<String>,

    #[arg(long = "no-skip-completed", help = "Re-run repositories already completed")]
    pub no_skip_completed: bool,

    #[arg(long = "retry-failed", help = "Retry repositories that failed previously")]
    pub retry_failed: bool,

    #[arg(long = "force", help = "Re-run completed repositories")]
    pub force: bool,

    #[arg(long = "no-create-repositories", help = "Never create destination repositories")]
    pub no_create_repositories: bool,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// List checkpoints
    List {
        #[arg(long = "all", help = "Include completed runs")]
        all: bool,
    },
    /// Print one checkpoint
    Show { id: String },
    /// Delete a checkpoint
    Delete { id: String },
    /// Write a checkpoint in portable form
    Export {
        id: String,
        #[arg(long = "output", short = 'o', help = "Write to a file instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Register a previously exported checkpoint
    Import { file: PathBuf },
    /// Repositories a resume would work on
    Remaining {
        id: String,
        #[arg(long = "retry-failed")]
        retry_failed: bool,
        #[arg(long = "force")]
        force: bool,
        #[arg(long = "no-skip-completed")]
        no_skip_completed: bool,
    },
    /// Delete checkpoints not updated recently
    Prune {
        #[arg(long = "older-than-days", default_value = "30")]
        older_than_days: u64,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_sync_flags() {
        let args = Args::try_parse_from([
            "registry-replicator",
            "sync",
            "-f",
            "tasks.json",
            "-j",
            "8",
            "--stop-on-error",
            "--output",
            "json",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Sync(sync) => {
                assert_eq!(sync.execution.workers, Some(8));
                assert!(sync.execution.stop_on_error);
                assert_eq!(sync.output, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_tree_resume_flags() {
        let args = Args::try_parse_from([
            "registry-replicator",
            "replicate-tree",
            "--source",
            "inventory.json",
            "--destination",
            "mirror.local",
            "--resume",
            "abc",
            "--retry-failed",
            "--exclude-tag",
            "*-rc*",
            "--exclude-tag",
            "nightly",
            "--latest",
            "5",
        ])
        .unwrap();
        match args.command {
            Command::ReplicateTree(tree) => {
                assert_eq!(tree.resume.as_deref(), Some("abc"));
                assert!(tree.retry_failed);
                assert_eq!(tree.exclude_tag, vec!["*-rc*", "nightly"]);
                assert_eq!(tree.latest, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_checkpoint_subcommands() {
        let args =
            Args::try_parse_from(["registry-replicator", "checkpoint", "prune", "--older-than-days", "7"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Checkpoint(CheckpointCommand::Prune { older_than_days: 7 })
        ));
    }
}
