//! forge::traits
//!
//! Backend trait definition for content repositories hosted on a Git provider.
//!
//! # Design
//!
//! The `Backend` trait is async because backend operations involve network
//! I/O. Providers differ in what they can do, so every backend reports
//! [`Capabilities`] and operations outside them fail with
//! [`ForgeError::NotImplemented`] rather than being emulated.
//!
//! Paths passed to and returned from a backend are repository-root relative
//! without leading or trailing `/` (see [`crate::core::paths`]).
//!
//! # Example
//!
//! ```ignore
//! use contentforge::forge::{Backend, FileWrite};
//!
//! async fn save(backend: &dyn Backend) -> Result<(), ForgeError> {
//!     let receipt = backend
//!         .write_file(FileWrite::new("master", "content/posts/a.md", b"hi".to_vec(), "Add a"))
//!         .await?;
//!     println!("new head {}", receipt.commit.sha);
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::auth::AuthError;
use crate::core::types::{BranchRef, Commit, Repository, TreeEntry};

/// Label marking a pull request as ready to publish.
pub const READY_LABEL: &str = "cms/pending_publish";

/// A non-success response from a provider.
///
/// Serializes to the caller-facing shape
/// `{"name": "API_ERROR", "status": .., "message": .., "api": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{api} API error {status}: {message}")]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error message extracted from the response body
    pub message: String,
    /// Provider name (`github`, `gitlab`, `gitea`, `git`)
    pub api: String,
    /// Request path or repository path the error relates to
    pub path: Option<String>,
}

impl ApiError {
    pub fn new(api: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            api: api.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Error name on the caller-facing surface.
    pub fn name(&self) -> &'static str {
        "API_ERROR"
    }
}

impl Serialize for ApiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Surface<'a> {
            name: &'static str,
            status: u16,
            message: &'a str,
            api: &'a str,
        }

        Surface {
            name: self.name(),
            status: self.status,
            message: &self.message,
            api: &self.api,
        }
        .serialize(serializer)
    }
}

/// Errors from backend operations.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    /// Network or connection error. Not retried automatically.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the session timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The session's cancel token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// 404.
    #[error("not found: {0}")]
    NotFound(ApiError),

    /// 409/412, or a write whose sha precondition no longer holds.
    #[error("conflict: {0}")]
    Conflict(ApiError),

    /// 401/403.
    #[error("authentication failed: {0}")]
    Auth(ApiError),

    /// The credential provider could not produce a token.
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] AuthError),

    /// Rate limit still exceeded after bounded retries.
    #[error("rate limited by {api} after {attempts} attempts")]
    RateLimited { api: String, attempts: u32 },

    /// Any other non-success status.
    #[error("{0}")]
    Api(ApiError),

    /// The provider answered with a body we could not interpret.
    #[error("invalid response from {api}: {message}")]
    Validation { api: String, message: String },

    /// The operation is outside this backend's capabilities.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl ForgeError {
    /// Classify a non-success status.
    ///
    /// ```
    /// use contentforge::forge::{ApiError, ForgeError};
    ///
    /// let err = ForgeError::from_api(ApiError::new("gitea", 404, "some error"));
    /// assert!(matches!(err, ForgeError::NotFound(_)));
    /// assert_eq!(err.status(), Some(404));
    /// ```
    pub fn from_api(error: ApiError) -> Self {
        match error.status {
            401 | 403 => ForgeError::Auth(error),
            404 => ForgeError::NotFound(error),
            409 | 412 => ForgeError::Conflict(error),
            _ => ForgeError::Api(error),
        }
    }

    /// Reclassify a write rejection that means "the file changed under you".
    ///
    /// Providers report a stale or missing sha precondition, or a create over
    /// an existing file, as 400/422 with a message rather than 409.
    pub fn into_write_conflict(self) -> Self {
        match self {
            ForgeError::Api(error) if matches!(error.status, 400 | 422) => {
                let message = error.message.to_lowercase();
                if message.contains("sha") || message.contains("exist") {
                    ForgeError::Conflict(error)
                } else {
                    ForgeError::Api(error)
                }
            }
            other => other,
        }
    }

    /// The provider error behind this failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ForgeError::NotFound(e)
            | ForgeError::Conflict(e)
            | ForgeError::Auth(e)
            | ForgeError::Api(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ForgeError::RateLimited { .. } => Some(429),
            other => other.api_error().map(|e| e.status),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ForgeError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ForgeError::Conflict(_))
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ForgeError::Network(_) | ForgeError::Timeout(_) | ForgeError::RateLimited { .. } => {
                true
            }
            ForgeError::Api(e) => e.status >= 500,
            _ => false,
        }
    }
}

/// What a backend can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Several files can be committed as one commit.
    pub supports_atomic_commit: bool,
    /// Branches can be reviewed through pull/merge requests.
    pub supports_pull_requests: bool,
}

/// A sequential single-file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub branch: String,
    pub path: String,
    pub content: Vec<u8>,
    pub message: String,
    /// Current blob sha of the file; `None` creates a new file.
    pub sha: Option<String>,
    pub signoff: bool,
}

impl FileWrite {
    pub fn new(
        branch: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            branch: branch.into(),
            path: path.into(),
            content: content.into(),
            message: message.into(),
            sha: None,
            signoff: false,
        }
    }

    pub fn with_sha(mut self, sha: Option<String>) -> Self {
        self.sha = sha;
        self
    }

    pub fn with_signoff(mut self, signoff: bool) -> Self {
        self.signoff = signoff;
        self
    }
}

/// One file inside an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: Vec<u8>,
    /// Blob sha the file must still have; `None` for new files.
    pub expected_sha: Option<String>,
}

/// An atomic multi-file commit on one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeCommit {
    pub branch: String,
    pub message: String,
    pub changes: Vec<FileChange>,
}

/// What a provider reported after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// The commit now at the head of the branch.
    pub commit: Commit,
    /// Blob sha per written path, when the provider reports them.
    pub blobs: BTreeMap<String, String>,
}

impl WriteReceipt {
    pub fn new(commit: Commit) -> Self {
        Self {
            commit,
            blobs: BTreeMap::new(),
        }
    }

    pub fn with_blob(mut self, path: impl Into<String>, sha: impl Into<String>) -> Self {
        self.blobs.insert(path.into(), sha.into());
        self
    }
}

/// Request to create a pull request.
#[derive(Debug, Clone)]
pub struct CreatePrRequest {
    /// Head branch name (the branch with changes)
    pub head: String,
    /// Base branch name (the branch to merge into)
    pub base: String,
    /// PR title
    pub title: String,
    /// PR body/description
    pub body: Option<String>,
}

/// Pull request information returned from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    /// PR number (merge request iid on GitLab)
    pub number: u64,
    /// Web URL for viewing
    pub url: String,
    pub state: PrState,
    /// Head branch name
    pub head: String,
    /// Commit the head branch pointed at, frozen once the PR is merged
    pub head_sha: Option<String>,
    /// Base branch name
    pub base: String,
    pub title: String,
    /// Approved for publishing (carries [`READY_LABEL`])
    pub ready: bool,
    pub labels: Vec<String>,
    pub reviewers: Vec<String>,
}

impl PullRequest {
    /// Derive `ready` from a label list.
    pub fn ready_from_labels(labels: &[String]) -> bool {
        labels.iter().any(|l| l == READY_LABEL)
    }
}

/// PR state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    /// PR is open and awaiting review/merge
    Open,
    /// PR is closed without being merged
    Closed,
    /// PR has been merged
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Closed => write!(f, "closed"),
            PrState::Merged => write!(f, "merged"),
        }
    }
}

/// Merge method for publishing a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Create a merge commit
    #[default]
    Merge,
    /// Squash all commits and merge
    Squash,
    /// Rebase commits onto base branch
    Rebase,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeMethod::Merge => write!(f, "merge"),
            MergeMethod::Squash => write!(f, "squash"),
            MergeMethod::Rebase => write!(f, "rebase"),
        }
    }
}

/// The Backend trait: one content repository on one provider.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// All methods return `Result<T, ForgeError>`. Callers should handle:
/// - `NotFound`: path, branch or PR doesn't exist
/// - `Conflict`: a sha or ref precondition no longer holds; re-read and retry
/// - `Auth` / `Credentials`: re-authenticate
/// - `RateLimited`: back off for longer than the session's retry policy did
/// - `NotImplemented`: check [`Capabilities`] first
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provider name used in errors (e.g., "github", "gitea").
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn repository(&self) -> &Repository;

    /// List the tree below `path` on `branch`.
    ///
    /// With `depth <= 1` only direct children are returned; with a larger
    /// depth the full recursive listing is returned and callers trim it.
    /// Entries include both blobs and trees, with root-relative paths.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the branch or directory doesn't exist
    async fn list_tree(
        &self,
        branch: &str,
        path: &str,
        depth: u32,
    ) -> Result<Vec<TreeEntry>, ForgeError>;

    /// Read raw file content.
    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError>;

    /// Look up a branch. `Ok(None)` when it doesn't exist.
    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError>;

    /// Create `name` pointing at `from_sha`.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the branch already exists (on providers that say so)
    async fn create_branch(&self, name: &str, from_sha: &str) -> Result<BranchRef, ForgeError>;

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError>;

    /// Write a single file as its own commit.
    ///
    /// A write carrying `sha` must be rejected with `Conflict` if the file's
    /// current sha differs; a write without `sha` must not overwrite an
    /// existing file.
    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        let _ = write;
        Err(ForgeError::NotImplemented(format!(
            "{} has no per-file write endpoint",
            self.name()
        )))
    }

    /// Commit several files at once with a non-forced ref update.
    async fn commit_files(&self, commit: TreeCommit) -> Result<WriteReceipt, ForgeError> {
        let _ = commit;
        Err(ForgeError::NotImplemented(format!(
            "{} has no atomic commit primitive",
            self.name()
        )))
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let _ = request;
        Err(self.no_pull_requests())
    }

    /// Most recent PR (any state) whose head is `head`.
    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        let _ = head;
        Err(self.no_pull_requests())
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let _ = number;
        Err(self.no_pull_requests())
    }

    /// Mark a PR ready to publish.
    async fn mark_ready(&self, number: u64) -> Result<(), ForgeError> {
        let _ = number;
        Err(self.no_pull_requests())
    }

    /// Merge a PR.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the provider refuses the merge (conflicts, not mergeable)
    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), ForgeError> {
        let _ = (number, method);
        Err(self.no_pull_requests())
    }

    #[doc(hidden)]
    fn no_pull_requests(&self) -> ForgeError {
        ForgeError::NotImplemented(format!("{} has no pull requests", self.name()))
    }
}
