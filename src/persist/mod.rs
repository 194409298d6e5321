//! persist
//!
//! Writing an entry's files to a branch.
//!
//! # Design
//!
//! [`PersistEngine::persist_files`] turns data files and assets into provider
//! writes under optimistic concurrency:
//!
//! - New entries skip sha resolution entirely; every write is a create.
//! - Existing entries resolve each distinct containing directory once, before
//!   any write. A caller-supplied `base_sha` that no longer matches fails the
//!   whole call with a conflict before anything is written. Every write then
//!   carries the resolved sha as its precondition.
//! - Backends with an atomic primitive get one commit for all files
//!   ([`WriteStrategy::AtomicTree`]). Others get one commit per file
//!   ([`WriteStrategy::Sequential`]); a failure part-way through reports what
//!   was already committed as [`PersistError::Partial`].
//!
//! Committed files are never rolled back, including on cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::cancel::CancelToken;
use crate::core::paths;
use crate::core::types::{Asset, DataFile};
use crate::forge::{Backend, FileChange, FileWrite, ForgeError, TreeCommit, WriteReceipt};
use crate::tree::TreeResolver;

/// How files reach the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// One commit containing every file.
    AtomicTree,
    /// One commit per file, in input order.
    Sequential,
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStrategy::AtomicTree => write!(f, "atomic tree commit"),
            WriteStrategy::Sequential => write!(f, "sequential per-file write"),
        }
    }
}

/// Options for one persist call.
#[derive(Debug, Clone, Default)]
pub struct PersistOptions {
    pub commit_message: String,
    /// The entry does not exist yet; skip sha resolution.
    pub new_entry: bool,
    /// Target branch; the repository's default branch when `None`.
    pub branch: Option<String>,
    pub signoff: bool,
    /// Force a strategy instead of picking from capabilities.
    pub strategy: Option<WriteStrategy>,
    pub cancel: Option<CancelToken>,
}

impl PersistOptions {
    pub fn new(commit_message: impl Into<String>) -> Self {
        Self {
            commit_message: commit_message.into(),
            ..Default::default()
        }
    }

    pub fn new_entry(mut self, new_entry: bool) -> Self {
        self.new_entry = new_entry;
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn signoff(mut self, signoff: bool) -> Self {
        self.signoff = signoff;
        self
    }

    pub fn strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A file that made it into a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedFile {
    pub path: String,
    /// Blob sha, when the provider reports it.
    pub sha: Option<String>,
}

/// Outcome of a successful persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    pub strategy: WriteStrategy,
    /// New head commit per branch touched.
    pub heads: BTreeMap<String, String>,
    pub files: Vec<CommittedFile>,
}

impl CommitResult {
    /// Head of `branch` after the persist.
    pub fn head(&self, branch: &str) -> Option<&str> {
        self.heads.get(branch).map(String::as_str)
    }
}

/// Errors from persisting files.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Nothing was committed.
    #[error(transparent)]
    Forge(#[from] ForgeError),

    /// Some files were committed before `source` stopped the write.
    #[error("{strategy} stopped after {} of the files were committed: {source}", committed.len())]
    Partial {
        strategy: WriteStrategy,
        committed: Vec<CommittedFile>,
        source: ForgeError,
    },
}

impl PersistError {
    /// The underlying provider error.
    pub fn forge_error(&self) -> &ForgeError {
        match self {
            PersistError::Forge(e) => e,
            PersistError::Partial { source, .. } => source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.forge_error().is_conflict()
    }
}

#[derive(Debug)]
struct PendingWrite {
    path: String,
    content: Vec<u8>,
    base_sha: Option<String>,
    expected_sha: Option<String>,
}

/// Persists entry files through a backend.
#[derive(Clone)]
pub struct PersistEngine {
    backend: Arc<dyn Backend>,
}

impl PersistEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The strategy a persist would use given `requested`.
    ///
    /// # Errors
    ///
    /// `NotImplemented` when an atomic commit is requested from a backend
    /// without one.
    pub fn select_strategy(
        &self,
        requested: Option<WriteStrategy>,
    ) -> Result<WriteStrategy, ForgeError> {
        let atomic = self.backend.capabilities().supports_atomic_commit;
        match requested {
            Some(WriteStrategy::AtomicTree) if !atomic => Err(ForgeError::NotImplemented(
                format!("{} has no atomic commit primitive", self.backend.name()),
            )),
            Some(strategy) => Ok(strategy),
            None if atomic => Ok(WriteStrategy::AtomicTree),
            None => Ok(WriteStrategy::Sequential),
        }
    }

    /// Write `data_files` then `assets` to the target branch.
    ///
    /// # Errors
    ///
    /// - `PersistError::Forge(Conflict)` when a sha precondition fails
    /// - `PersistError::Partial` when a sequential write fails after some
    ///   files were committed
    pub async fn persist_files(
        &self,
        data_files: &[DataFile],
        assets: &[Asset],
        options: PersistOptions,
    ) -> Result<CommitResult, PersistError> {
        let strategy = self.select_strategy(options.strategy)?;
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| self.backend.repository().default_branch.clone());

        let mut pending: Vec<PendingWrite> = data_files
            .iter()
            .map(|f| PendingWrite {
                path: paths::normalize(&f.path),
                content: f.raw.clone().into_bytes(),
                base_sha: f.base_sha.clone(),
                expected_sha: None,
            })
            .chain(assets.iter().map(|a| PendingWrite {
                path: paths::normalize(&a.path),
                content: a.content.clone(),
                base_sha: a.base_sha.clone(),
                expected_sha: None,
            }))
            .collect();

        if !options.new_entry {
            self.resolve_preconditions(&branch, &mut pending, &options)
                .await?;
        }

        tracing::debug!(
            backend = self.backend.name(),
            branch = %branch,
            files = pending.len(),
            %strategy,
            "persisting files"
        );

        let result = match strategy {
            WriteStrategy::AtomicTree => self.commit_atomic(&branch, pending, &options).await?,
            WriteStrategy::Sequential => self.write_sequential(&branch, pending, &options).await?,
        };

        tracing::info!(
            backend = self.backend.name(),
            branch = %branch,
            head = result.head(&branch).unwrap_or("-"),
            files = result.files.len(),
            "committed"
        );
        Ok(result)
    }

    /// Resolve current shas, one listing per distinct directory, and check
    /// caller-supplied base shas against them.
    async fn resolve_preconditions(
        &self,
        branch: &str,
        pending: &mut [PendingWrite],
        options: &PersistOptions,
    ) -> Result<(), PersistError> {
        let mut resolver = TreeResolver::new(self.backend.clone());
        for write in pending.iter_mut() {
            check_cancelled(options)?;
            let current = resolver.resolve_sha(branch, &write.path).await?;
            if let Some(base) = &write.base_sha {
                if current.as_deref() != Some(base.as_str()) {
                    return Err(crate::forge::sha_mismatch(
                        self.backend.name(),
                        &write.path,
                        base,
                        current.as_deref(),
                    )
                    .into());
                }
            }
            write.expected_sha = current;
        }
        Ok(())
    }

    async fn commit_atomic(
        &self,
        branch: &str,
        pending: Vec<PendingWrite>,
        options: &PersistOptions,
    ) -> Result<CommitResult, PersistError> {
        check_cancelled(options)?;
        let paths: Vec<String> = pending.iter().map(|w| w.path.clone()).collect();
        let receipt = self
            .backend
            .commit_files(TreeCommit {
                branch: branch.to_string(),
                message: options.commit_message.clone(),
                changes: pending
                    .into_iter()
                    .map(|w| FileChange {
                        path: w.path,
                        content: w.content,
                        expected_sha: w.expected_sha,
                    })
                    .collect(),
            })
            .await?;

        let mut result = CommitResult {
            strategy: WriteStrategy::AtomicTree,
            heads: BTreeMap::new(),
            files: Vec::new(),
        };
        for path in paths {
            result.files.push(committed(&receipt, path));
        }
        result.heads.insert(branch.to_string(), receipt.commit.sha);
        Ok(result)
    }

    async fn write_sequential(
        &self,
        branch: &str,
        pending: Vec<PendingWrite>,
        options: &PersistOptions,
    ) -> Result<CommitResult, PersistError> {
        let mut result = CommitResult {
            strategy: WriteStrategy::Sequential,
            heads: BTreeMap::new(),
            files: Vec::new(),
        };

        for write in pending {
            let path = write.path.clone();
            let outcome = match check_cancelled(options) {
                Err(e) => Err(e),
                Ok(()) => {
                    self.backend
                        .write_file(
                            FileWrite::new(branch, write.path, write.content, &options.commit_message)
                                .with_sha(write.expected_sha)
                                .with_signoff(options.signoff),
                        )
                        .await
                }
            };

            match outcome {
                Ok(receipt) => {
                    tracing::debug!(path = %path, commit = %receipt.commit.sha, "wrote file");
                    result.files.push(committed(&receipt, path));
                    result.heads.insert(branch.to_string(), receipt.commit.sha);
                }
                Err(source) if result.files.is_empty() => return Err(source.into()),
                Err(source) => {
                    tracing::warn!(
                        path = %path,
                        committed = result.files.len(),
                        error = %source,
                        "sequential write stopped part-way"
                    );
                    return Err(PersistError::Partial {
                        strategy: WriteStrategy::Sequential,
                        committed: result.files,
                        source,
                    });
                }
            }
        }
        Ok(result)
    }
}

impl std::fmt::Debug for PersistEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistEngine")
            .field("backend", &self.backend.name())
            .finish()
    }
}

fn committed(receipt: &WriteReceipt, path: String) -> CommittedFile {
    let sha = receipt.blobs.get(&path).cloned();
    CommittedFile { path, sha }
}

fn check_cancelled(options: &PersistOptions) -> Result<(), ForgeError> {
    match &options.cancel {
        Some(token) if token.is_cancelled() => Err(ForgeError::Cancelled),
        _ => Ok(()),
    }
}
