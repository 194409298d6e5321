//! workflow
//!
//! Editorial workflow: draft, review and publish through branches and pull
//! requests.
//!
//! # Design
//!
//! Each entry under workflow lives on its own branch,
//! `{prefix}/{collection}/{slug}`, and its review state is carried by the pull
//! request from that branch to the base branch:
//!
//! | transition | provider effect |
//! |---|---|
//! | draft → pending_review | create the branch if absent, open (or reuse) a PR |
//! | pending_review → pending_publish | mark the PR ready |
//! | pending_publish → published | merge the PR, delete the branch |
//!
//! The caller owns [`WorkflowEntry`]; a transition updates it only when every
//! provider call succeeded. [`WorkflowEngine::reconcile`] re-derives the
//! status from the live PR when the caller's copy may be stale.
//!
//! With the workflow disabled, [`WorkflowEngine::save_entry`] writes straight
//! to the base branch and the only transition is draft → published.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use contentforge::core::config::schema::WorkflowConfig;
//! use contentforge::core::types::{DataFile, Repository};
//! use contentforge::forge::mock::MockBackend;
//! use contentforge::persist::PersistOptions;
//! use contentforge::workflow::{EditorialStatus, WorkflowEngine};
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MockBackend::new(Repository::new("owner", "repo", "master")));
//! let config = WorkflowConfig { enabled: true, ..Default::default() };
//! let engine = WorkflowEngine::new(backend, config);
//!
//! let mut entry = engine.entry("posts", "hello").unwrap();
//! engine
//!     .save_entry(
//!         &mut entry,
//!         &[DataFile::new("content/posts/hello.md", "hello", "# Hello")],
//!         &[],
//!         PersistOptions::new("Create posts “hello”").new_entry(true),
//!     )
//!     .await
//!     .unwrap();
//!
//! engine.transition(&mut entry, EditorialStatus::PendingReview).await.unwrap();
//! engine.transition(&mut entry, EditorialStatus::PendingPublish).await.unwrap();
//! engine.transition(&mut entry, EditorialStatus::Published).await.unwrap();
//! assert_eq!(entry.status, EditorialStatus::Published);
//! # });
//! ```

mod status;

pub use status::EditorialStatus;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::config::schema::WorkflowConfig;
use crate::core::naming;
use crate::core::types::{Asset, BranchRef, DataFile, TypeError};
use crate::forge::{ApiError, Backend, CreatePrRequest, ForgeError, PrState, PullRequest};
use crate::persist::{CommitResult, PersistEngine, PersistError, PersistOptions};

/// Caller-owned editorial record of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowEntry {
    pub collection: String,
    pub slug: String,
    /// Workflow branch holding the entry's unpublished edits.
    pub branch: String,
    pub status: EditorialStatus,
    /// Number of the PR backing the review, once opened.
    pub pr: Option<u64>,
}

/// Errors from editorial workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot move {collection}/{slug} from {from} to {to}")]
    InvalidTransition {
        collection: String,
        slug: String,
        from: EditorialStatus,
        to: EditorialStatus,
    },

    /// The provider refused to merge; the branch needs manual resolution.
    #[error("cannot publish {branch}: {source}")]
    WorkflowConflict { branch: String, source: ForgeError },

    #[error("editorial workflow unsupported: {0}")]
    Unsupported(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] TypeError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Drives entries through the editorial states.
pub struct WorkflowEngine {
    backend: Arc<dyn Backend>,
    persist: PersistEngine,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(backend: Arc<dyn Backend>, config: WorkflowConfig) -> Self {
        Self {
            persist: PersistEngine::new(backend.clone()),
            backend,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn base_branch(&self) -> &str {
        &self.backend.repository().default_branch
    }

    /// A fresh draft record for `collection`/`slug`.
    pub fn entry(&self, collection: &str, slug: &str) -> Result<WorkflowEntry, WorkflowError> {
        let branch = naming::workflow_branch(&self.config.branch_prefix, collection, slug)?;
        Ok(WorkflowEntry {
            collection: collection.to_string(),
            slug: slug.to_string(),
            branch: branch.into(),
            status: EditorialStatus::Draft,
            pr: None,
        })
    }

    /// Persist an entry's files.
    ///
    /// With the workflow enabled the files go to the entry's branch, which is
    /// created from the base head when missing; editing a published entry
    /// starts a new draft. With it disabled the files go to the base branch
    /// and the entry is published.
    pub async fn save_entry(
        &self,
        entry: &mut WorkflowEntry,
        data_files: &[DataFile],
        assets: &[Asset],
        options: PersistOptions,
    ) -> Result<CommitResult, WorkflowError> {
        if !self.config.enabled {
            let options = options.branch(self.base_branch());
            let result = self.persist.persist_files(data_files, assets, options).await?;
            entry.status = EditorialStatus::Published;
            return Ok(result);
        }

        let branch = self.ensure_branch(&entry.branch).await?;
        let result = self
            .persist
            .persist_files(data_files, assets, options.branch(branch.name))
            .await?;
        if entry.status.is_terminal() {
            entry.status = EditorialStatus::Draft;
            entry.pr = None;
        }
        Ok(result)
    }

    /// Move `entry` to `to`, performing the provider side of the transition.
    ///
    /// On error `entry` is left unchanged.
    pub async fn transition(
        &self,
        entry: &mut WorkflowEntry,
        to: EditorialStatus,
    ) -> Result<(), WorkflowError> {
        let from = entry.status;
        if !from.can_transition(to, self.config.enabled) {
            return Err(WorkflowError::InvalidTransition {
                collection: entry.collection.clone(),
                slug: entry.slug.clone(),
                from,
                to,
            });
        }

        let pr = match to {
            // Only reachable with the workflow disabled: content is already on
            // the base branch.
            EditorialStatus::Published if !self.config.enabled => entry.pr,
            EditorialStatus::PendingReview => Some(self.open_review(entry).await?.number),
            EditorialStatus::PendingPublish => {
                let number = self.current_pr(entry).await?;
                self.backend.mark_ready(number).await?;
                Some(number)
            }
            EditorialStatus::Published => {
                let number = self.current_pr(entry).await?;
                self.publish(entry, number).await?;
                Some(number)
            }
            EditorialStatus::Draft => entry.pr,
        };

        tracing::info!(
            collection = %entry.collection,
            slug = %entry.slug,
            from = %from,
            to = %to,
            pr = ?pr,
            "editorial transition"
        );
        entry.status = to;
        entry.pr = pr;
        Ok(())
    }

    /// Re-derive `entry`'s status from the provider.
    ///
    /// An open PR decides the status. A merged PR means published only while
    /// the branch is gone or still at the merged head; commits made after the
    /// merge put the entry back in draft, as does a closed PR. No PR means
    /// draft, unless the entry was published and its branch is gone. With the
    /// workflow disabled the caller's status stands.
    pub async fn reconcile(
        &self,
        entry: &mut WorkflowEntry,
    ) -> Result<EditorialStatus, WorkflowError> {
        if !self.config.enabled {
            return Ok(entry.status);
        }
        self.require_pull_requests()?;

        let status = match self.backend.find_pr_by_head(&entry.branch).await? {
            Some(pr) if pr.state == PrState::Open => {
                entry.pr = Some(pr.number);
                EditorialStatus::from_pull_request(&pr)
            }
            Some(pr) => {
                let branch = self.backend.get_branch(&entry.branch).await?;
                let merged_is_current = pr.state == PrState::Merged
                    && match &branch {
                        None => true,
                        Some(b) => pr.head_sha.as_deref() == Some(b.head_sha.as_str()),
                    };
                if merged_is_current {
                    entry.pr = Some(pr.number);
                    EditorialStatus::Published
                } else {
                    tracing::debug!(
                        branch = %entry.branch,
                        number = pr.number,
                        state = %pr.state,
                        "pull request no longer tracks the entry"
                    );
                    entry.pr = None;
                    EditorialStatus::Draft
                }
            }
            None => {
                let branch_gone = self.backend.get_branch(&entry.branch).await?.is_none();
                if entry.status.is_terminal() && branch_gone {
                    EditorialStatus::Published
                } else {
                    entry.pr = None;
                    EditorialStatus::Draft
                }
            }
        };

        if status != entry.status {
            tracing::info!(
                branch = %entry.branch,
                was = %entry.status,
                now = %status,
                "reconciled editorial status"
            );
        }
        entry.status = status;
        Ok(status)
    }

    fn require_pull_requests(&self) -> Result<(), WorkflowError> {
        if self.backend.capabilities().supports_pull_requests {
            Ok(())
        } else {
            Err(WorkflowError::Unsupported(format!(
                "{} has no pull requests",
                self.backend.name()
            )))
        }
    }

    /// The workflow branch, created from the base head when missing.
    async fn ensure_branch(&self, name: &str) -> Result<BranchRef, WorkflowError> {
        if let Some(branch) = self.backend.get_branch(name).await? {
            return Ok(branch);
        }
        let base = self.base_branch();
        let head = self.backend.get_branch(base).await?.ok_or_else(|| {
            ForgeError::NotFound(ApiError::new(
                self.backend.name(),
                404,
                format!("base branch {} not found", base),
            ))
        })?;
        tracing::debug!(branch = name, from = %head.head_sha, "creating workflow branch");
        Ok(self.backend.create_branch(name, &head.head_sha).await?)
    }

    async fn open_review(&self, entry: &WorkflowEntry) -> Result<PullRequest, WorkflowError> {
        self.require_pull_requests()?;
        self.ensure_branch(&entry.branch).await?;

        if let Some(pr) = self.backend.find_pr_by_head(&entry.branch).await? {
            if pr.state == PrState::Open {
                tracing::debug!(number = pr.number, "reusing open pull request");
                return Ok(pr);
            }
        }

        let pr = self
            .backend
            .create_pr(CreatePrRequest {
                head: entry.branch.clone(),
                base: self.base_branch().to_string(),
                title: format!("Update {} “{}”", entry.collection, entry.slug),
                body: Some(format!(
                    "Editorial changes to `{}/{}`.",
                    entry.collection, entry.slug
                )),
            })
            .await?;
        Ok(pr)
    }

    /// Number of the entry's open PR.
    async fn current_pr(&self, entry: &WorkflowEntry) -> Result<u64, WorkflowError> {
        self.require_pull_requests()?;
        if let Some(number) = entry.pr {
            return Ok(number);
        }
        match self.backend.find_pr_by_head(&entry.branch).await? {
            Some(pr) if pr.state == PrState::Open => Ok(pr.number),
            _ => Err(ForgeError::NotFound(ApiError::new(
                self.backend.name(),
                404,
                format!("no open pull request from {}", entry.branch),
            ))
            .into()),
        }
    }

    async fn publish(&self, entry: &WorkflowEntry, number: u64) -> Result<(), WorkflowError> {
        match self.backend.merge_pr(number, self.config.merge_method).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                return Err(WorkflowError::WorkflowConflict {
                    branch: entry.branch.clone(),
                    source: e,
                })
            }
            Err(e) => return Err(e.into()),
        }
        match self.backend.delete_branch(&entry.branch).await {
            Ok(()) => Ok(()),
            // Providers may delete the head branch on merge.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}
