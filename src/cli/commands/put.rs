//! cli::commands::put
//!
//! Upload local files through the persist engine.
//!
//! Files ending in a known text extension become data files; everything else
//! is uploaded as a binary asset. Either way the write contract is the same.

use std::path::Path;

use anyhow::{bail, Context as _, Result};

use super::{block_on, open_backend};
use crate::cli::Context;
use crate::core::paths;
use crate::core::types::{Asset, DataFile};
use crate::persist::{PersistEngine, PersistError, PersistOptions, WriteStrategy};

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "json", "yml", "yaml", "toml", "html", "txt"];

/// Options for the put command.
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub message: String,
    pub new_entry: bool,
    pub branch: Option<String>,
    pub signoff: bool,
    pub strategy: Option<WriteStrategy>,
}

/// Split a `REMOTE=LOCAL` argument.
fn parse_pair(arg: &str) -> Result<(String, &Path)> {
    match arg.split_once('=') {
        Some((remote, local)) if !paths::normalize(remote).is_empty() && !local.is_empty() => {
            Ok((paths::normalize(remote), Path::new(local)))
        }
        _ => bail!("Expected REMOTE=LOCAL, got '{}'", arg),
    }
}

fn is_text(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Read the local side of every pair.
fn collect(files: &[String]) -> Result<(Vec<DataFile>, Vec<Asset>)> {
    let mut data_files = Vec::new();
    let mut assets = Vec::new();
    for arg in files {
        let (remote, local) = parse_pair(arg)?;
        let bytes =
            std::fs::read(local).with_context(|| format!("Failed to read {}", local.display()))?;
        if is_text(&remote) {
            let raw = String::from_utf8(bytes)
                .with_context(|| format!("{} is not valid UTF-8", local.display()))?;
            let slug = Path::new(&remote)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            data_files.push(DataFile::new(remote, slug, raw));
        } else {
            assets.push(Asset::new(remote, bytes));
        }
    }
    Ok((data_files, assets))
}

/// Run the put command.
pub fn put(ctx: &Context, files: &[String], opts: PutOptions) -> Result<()> {
    let (data_files, assets) = collect(files)?;

    block_on(async {
        let (config, backend) = open_backend(ctx)?;
        let branch = opts
            .branch
            .clone()
            .unwrap_or_else(|| config.backend().branch.clone());

        let mut options = PersistOptions::new(opts.message.clone())
            .new_entry(opts.new_entry)
            .branch(branch.clone())
            .signoff(opts.signoff);
        if let Some(strategy) = opts.strategy {
            options = options.strategy(strategy);
        }

        let engine = PersistEngine::new(backend);
        match engine.persist_files(&data_files, &assets, options).await {
            Ok(result) => {
                for file in &result.files {
                    println!("{}  {}", file.sha.as_deref().unwrap_or("-"), file.path);
                }
                println!(
                    "Committed {} file(s) to {} at {} ({})",
                    result.files.len(),
                    branch,
                    result.head(&branch).unwrap_or("-"),
                    result.strategy
                );
                Ok(())
            }
            Err(PersistError::Partial {
                strategy,
                committed,
                source,
            }) => {
                for file in &committed {
                    eprintln!("committed: {}", file.path);
                }
                bail!(
                    "{} stopped after {} file(s); re-read the tree before retrying: {}",
                    strategy,
                    committed.len(),
                    source
                )
            }
            Err(e) if e.is_conflict() => {
                bail!("{}\n\nThe remote changed since it was read. Re-read and retry.", e)
            }
            Err(e) => Err(e.into()),
        }
    })
}
