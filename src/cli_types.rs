use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "repobrief")]
#[command(about = "Keep a one-line-per-file description index of a repository up to date")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Extra configuration file, layered over the user and project files
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refresh the index for a repository
    Index(IndexArgs),
    /// Manage the git hook that refreshes the index after each commit
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Repository root
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Describe files locally without calling the description service
    #[arg(long)]
    pub free: bool,

    /// Show what would be analyzed without calling anything or writing files
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore the digest store and reanalyze every file
    #[arg(long)]
    pub full: bool,

    /// Files per batch request
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Index file to write, relative to the repository root
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Project name used as the index heading
    #[arg(long)]
    pub project: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HookAction {
    /// Install a post-commit hook that runs `repobrief index`
    Install {
        /// Repository root
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Replace an existing hook that was not installed by repobrief
        #[arg(long)]
        force: bool,
    },
    /// Remove the hook installed by repobrief
    Uninstall {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Repository root whose project configuration is layered in
    #[arg(default_value = ".")]
    pub path: PathBuf,
}
