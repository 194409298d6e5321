//! cli::commands::entry
//!
//! Editorial workflow commands.
//!
//! The CLI keeps no state between runs, so every action starts by
//! reconciling the entry against its live pull request and then applies one
//! transition.
//!
//! # Example
//!
//! ```bash
//! cforge entry submit posts hello    # draft -> pending_review
//! cforge entry approve posts hello   # pending_review -> pending_publish
//! cforge entry publish posts hello   # pending_publish -> published
//! cforge entry status posts hello
//! ```

use anyhow::{bail, Result};

use super::{block_on, open_backend};
use crate::cli::args::{EntryAction, EntryArgs};
use crate::cli::Context;
use crate::workflow::{EditorialStatus, WorkflowEngine, WorkflowError};

/// Run an entry action.
pub fn entry(ctx: &Context, action: EntryAction) -> Result<()> {
    let (args, target) = match action {
        EntryAction::Status(args) => (args, None),
        EntryAction::Submit(args) => (args, Some(EditorialStatus::PendingReview)),
        EntryAction::Approve(args) => (args, Some(EditorialStatus::PendingPublish)),
        EntryAction::Publish(args) => (args, Some(EditorialStatus::Published)),
    };
    block_on(run(ctx, args, target))
}

async fn run(ctx: &Context, args: EntryArgs, target: Option<EditorialStatus>) -> Result<()> {
    let (config, backend) = open_backend(ctx)?;
    let engine = WorkflowEngine::new(backend, config.workflow().clone());

    let mut entry = engine.entry(&args.collection, &args.slug)?;
    engine.reconcile(&mut entry).await?;

    let Some(to) = target else {
        println!("{}/{}: {}", entry.collection, entry.slug, entry.status);
        println!("  branch: {}", entry.branch);
        if let Some(number) = entry.pr {
            println!("  pull request: #{}", number);
        }
        return Ok(());
    };

    match engine.transition(&mut entry, to).await {
        Ok(()) => {
            println!("{}/{}: {}", entry.collection, entry.slug, entry.status);
            Ok(())
        }
        Err(WorkflowError::InvalidTransition { from, .. }) => {
            bail!(
                "{}/{} is {}; it cannot move to {}.",
                args.collection,
                args.slug,
                from,
                to
            )
        }
        Err(WorkflowError::WorkflowConflict { branch, source }) => {
            bail!(
                "Cannot publish: {}\n\nResolve the conflicts on '{}' and try again.",
                source,
                branch
            )
        }
        Err(e) => Err(e.into()),
    }
}
