use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Stage, describe and archive directory trees")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Override the configuration directory for this invocation
    #[arg(long, global = true, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    /// Load settings from this file instead of <config dir>/stowage.toml
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy, describe and archive one or more directories
    Transfer(TransferArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Clone, Debug)]
pub struct TransferArgs {
    /// Directories to transfer; several run concurrently
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<PathBuf>,
    /// Sibling entries processed together while walking a directory
    #[arg(long, short = 'b')]
    pub batch_size: Option<usize>,
    /// Directory that receives one workspace per transferred source
    #[arg(long, value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,
    /// Jobs allowed to run at once across all transfers
    #[arg(long)]
    pub max_concurrency: Option<usize>,
    /// Cap on file operations in flight within a single walk
    #[arg(long)]
    pub max_in_flight: Option<usize>,
    /// Emit one JSON report per line instead of text
    #[arg(long)]
    pub json: bool,
    /// Show an interactive progress indicator
    #[arg(long, short = 'p')]
    pub progress: bool,
}
