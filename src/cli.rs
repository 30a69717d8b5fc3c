use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,        // global --quiet
    pub no_color: bool,     // global --no-color
    pub dry_run: bool,      // global --dry-run
    pub workspace: PathBuf, // global --workspace
}

#[derive(Parser)]
#[command(name = "swing")]
#[command(about = "Apply, preview and undo file edits described in LLM replies")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Workspace root that edit paths are relative to
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the changes a reply would make without writing anything
    Preview(PreviewArgs),

    /// Apply the changes from a reply (previews only unless --yes)
    Apply(ApplyArgs),

    /// List recorded operations, newest first
    History(HistoryArgs),

    /// Restore the files of one operation to their pre-edit content
    Rollback(RollbackArgs),

    /// Delete old backup snapshots
    Cleanup(CleanupArgs),

    /// List available edit strategies
    Strategies(StrategiesArgs),

    /// Initialize a swing.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Inputs shared by preview and apply
#[derive(Args, Debug, Clone)]
pub struct ReplyInput {
    /// Edit strategy (defaults to `default_strategy` from config)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// File holding the model reply; `-` reads stdin
    #[arg(short, long)]
    pub response: PathBuf,

    /// Context files the reply refers to (workspace-relative)
    pub files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub input: ReplyInput,

    /// Output the structured preview as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub input: ReplyInput,

    /// Description recorded with the operation
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Write changes to files (required for write operations)
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output results in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Number of operations to show (defaults to `history.limit`)
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Emit JSON instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RollbackArgs {
    /// Operation id from `swing history`
    pub operation_id: String,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Remove snapshots older than N days (defaults to `history.cleanup_days`)
    #[arg(long)]
    pub older_than_days: Option<u64>,

    /// Emit JSON result instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct StrategiesArgs {
    /// Emit JSON instead of human text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,

    /// Write the script into this directory instead of stdout
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}
