//! cli::commands::tree
//!
//! Read-only commands: `ls` and `cat`.
//!
//! # Example
//!
//! ```bash
//! cforge ls content/posts
//! cforge ls content --depth 2 --json
//! cforge cat content/posts/hello.md --branch cms/posts/hello
//! ```

use std::io::Write;

use anyhow::{Context as _, Result};

use super::{block_on, open_backend};
use crate::cli::Context;
use crate::tree::TreeResolver;

/// Run the ls command.
pub fn ls(ctx: &Context, path: &str, depth: u32, branch: Option<&str>, json: bool) -> Result<()> {
    block_on(async {
        let (config, backend) = open_backend(ctx)?;
        let branch = branch.unwrap_or(config.backend().branch.as_str());

        let mut resolver = TreeResolver::new(backend);
        let files = resolver
            .list_files(branch, path, depth)
            .await
            .with_context(|| format!("Failed to list '{}' on {}", path, branch))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&files)?);
        } else if files.is_empty() {
            eprintln!("No files under '{}' on {}.", path, branch);
        } else {
            for file in &files {
                let size = file.size.map(|s| s.to_string()).unwrap_or_default();
                println!("{}  {:>8}  {}", &file.sha[..file.sha.len().min(12)], size, file.path);
            }
        }
        Ok(())
    })
}

/// Run the cat command.
pub fn cat(ctx: &Context, path: &str, branch: Option<&str>) -> Result<()> {
    block_on(async {
        let (config, backend) = open_backend(ctx)?;
        let branch = branch.unwrap_or(config.backend().branch.as_str());
        let content = backend
            .read_file(branch, path)
            .await
            .with_context(|| format!("Failed to read '{}' on {}", path, branch))?;
        std::io::stdout().write_all(&content)?;
        Ok(())
    })
}
