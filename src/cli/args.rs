//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this configuration file
//! - `--debug`: Enable debug logging

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::persist::WriteStrategy;

/// cforge - edit Git-hosted content through provider APIs
#[derive(Parser, Debug)]
#[command(name = "cforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $CONTENTFORGE_CONFIG, ./contentforge.toml,
    /// then the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List files below a directory
    #[command(after_help = "\
EXAMPLES:
    # Direct children of content/posts on the configured branch
    cforge ls content/posts

    # Everything up to three levels deep, as JSON
    cforge ls content --depth 3 --json")]
    Ls {
        /// Directory relative to the repository root
        #[arg(default_value = "")]
        path: String,

        /// How many levels to descend (1 = direct children)
        #[arg(long, default_value_t = 1)]
        depth: u32,

        /// Branch to read (defaults to the configured branch)
        #[arg(long)]
        branch: Option<String>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a file's content
    Cat {
        /// File path relative to the repository root
        path: String,

        /// Branch to read (defaults to the configured branch)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Write files to a branch as one persist operation
    #[command(after_help = "\
EXAMPLES:
    # Create a new post from a local file
    cforge put content/posts/hello.md=./hello.md --new -m \"Create hello\"

    # Update two files, failing if either changed since sha was read
    cforge put content/a.md=./a.md content/b.md=./b.md -m \"Update\"")]
    Put {
        /// `REMOTE=LOCAL` pairs: repository path and the local file to upload
        #[arg(required = true, value_name = "REMOTE=LOCAL")]
        files: Vec<String>,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// The files are new; skip sha lookup
        #[arg(long = "new")]
        new_entry: bool,

        /// Target branch (defaults to the configured branch)
        #[arg(long)]
        branch: Option<String>,

        /// Add a Signed-off-by trailer where the provider supports it
        #[arg(long)]
        signoff: bool,

        /// Force a write strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Editorial workflow for one entry
    Entry {
        #[command(subcommand)]
        action: EntryAction,
    },
}

/// Editorial workflow actions.
#[derive(Subcommand, Debug)]
pub enum EntryAction {
    /// Show the entry's status as the provider reports it
    Status(EntryArgs),
    /// Open a pull request for review (draft -> pending_review)
    Submit(EntryArgs),
    /// Mark ready to publish (pending_review -> pending_publish)
    Approve(EntryArgs),
    /// Merge and delete the workflow branch (pending_publish -> published)
    Publish(EntryArgs),
}

/// Identifies one entry.
#[derive(clap::Args, Debug, Clone)]
pub struct EntryArgs {
    /// Collection name, e.g. `posts`
    pub collection: String,
    /// Entry slug
    pub slug: String,
}

/// Write strategy argument.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    Atomic,
    Sequential,
}

impl From<StrategyArg> for WriteStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Atomic => WriteStrategy::AtomicTree,
            StrategyArg::Sequential => WriteStrategy::Sequential,
        }
    }
}
