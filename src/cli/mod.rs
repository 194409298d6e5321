//! cli
//!
//! Command-line interface for contentforge.
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap, installs logging,
//! loads configuration and hands a backend to the library engines. Errors
//! become `anyhow` errors here and nowhere else.

pub mod args;
pub mod commands;

pub use args::Cli;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Shared state for command handlers.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Explicit configuration file, if given.
    pub config: Option<std::path::PathBuf>,
    pub debug: bool,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    let ctx = Context {
        config: cli.config.clone(),
        debug: cli.debug,
    };
    commands::dispatch(cli.command, &ctx)
}

/// Log to stderr; `--debug` wins over `RUST_LOG`.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("contentforge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when run is called in-process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
