//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Async Commands
//!
//! Every command talks to a provider, so each handler is a synchronous
//! wrapper that builds a tokio runtime and blocks on its async body.

mod entry;
mod put;
mod tree;

pub use entry::entry;
pub use put::put;
pub use tree::{cat, ls};

use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::args::Command;
use super::Context;
use crate::core::config::Config;
use crate::forge::{create_backend, Backend};

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Ls {
            path,
            depth,
            branch,
            json,
        } => tree::ls(ctx, &path, depth, branch.as_deref(), json),
        Command::Cat { path, branch } => tree::cat(ctx, &path, branch.as_deref()),
        Command::Put {
            files,
            message,
            new_entry,
            branch,
            signoff,
            strategy,
        } => put::put(
            ctx,
            &files,
            put::PutOptions {
                message,
                new_entry,
                branch,
                signoff,
                strategy: strategy.map(Into::into),
            },
        ),
        Command::Entry { action } => entry::entry(ctx, action),
    }
}

/// Load configuration and build the configured backend.
pub(crate) fn open_backend(ctx: &Context) -> Result<(Config, Arc<dyn Backend>)> {
    let config = Config::load(ctx.config.as_deref()).context("Failed to load configuration")?;
    let backend = create_backend(config.backend(), config.session())
        .context("Failed to create backend")?;
    Ok((config, backend))
}

/// Run an async command body to completion.
pub(crate) fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(future)
}
