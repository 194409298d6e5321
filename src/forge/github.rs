//! forge::github
//!
//! GitHub backend over the REST API.
//!
//! # Design
//!
//! - Tree listings use `git/trees/{branch}:{path}`, recursive when depth > 1.
//! - Single-file writes use the contents API, whose `sha` field is GitHub's
//!   own optimistic-concurrency check.
//! - Multi-file writes go through the git data API: blobs, one tree on top of
//!   the head commit's tree, one commit, then a non-forced ref update. A head
//!   that moved in between makes the ref update fail as not-fast-forward,
//!   which surfaces as [`ForgeError::Conflict`].
//! - Readiness for publishing is the [`READY_LABEL`] on the pull request.
//!
//! # Example
//!
//! ```ignore
//! use contentforge::forge::github::GitHubBackend;
//!
//! let backend = GitHubBackend::new(repo, "https://api.github.com", session);
//! let entries = backend.list_tree("master", "content/posts", 1).await?;
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::traits::{
    ApiError, Backend, Capabilities, CreatePrRequest, FileWrite, ForgeError, MergeMethod,
    PrState, PullRequest, TreeCommit, WriteReceipt, READY_LABEL,
};
use super::transport::{ProviderClient, RequestOptions};
use crate::auth::AuthScheme;
use crate::core::paths;
use crate::core::session::Session;
use crate::core::types::{Author, BranchRef, Commit, EntryKind, Repository, TreeEntry};

/// Default GitHub API base URL.
pub const DEFAULT_API_ROOT: &str = "https://api.github.com";

/// GitHub backend.
#[derive(Debug, Clone)]
pub struct GitHubBackend {
    client: ProviderClient,
    repo: Repository,
}

impl GitHubBackend {
    /// Create a backend for `repo` against `api_root` (GitHub Enterprise
    /// roots end in `/api/v3`).
    pub fn new(repo: Repository, api_root: impl Into<String>, session: Session) -> Self {
        Self {
            client: ProviderClient::new("github", api_root, AuthScheme::Token, session),
            repo,
        }
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Build a path below `repos/{owner}/{name}`.
    fn repo_path(&self, path: &str) -> String {
        format!("repos/{}/{}/{}", self.repo.owner, self.repo.name, path)
    }

    async fn head_sha(&self, branch: &str) -> Result<String, ForgeError> {
        let reference: GitHubRef = self
            .client
            .request(
                &self.repo_path(&format!("git/ref/heads/{}", branch)),
                RequestOptions::get(),
            )
            .await?;
        Ok(reference.object.sha)
    }

    /// Check `expected_sha` preconditions against the tree at `head`. A
    /// change without one must not find the path already present.
    async fn verify_expected(&self, head: &str, commit: &TreeCommit) -> Result<(), ForgeError> {
        let mut listings: BTreeMap<String, Vec<TreeEntry>> = BTreeMap::new();
        for change in &commit.changes {
            let path = paths::normalize(&change.path);
            let dir = paths::parent_dir(&change.path);
            if !listings.contains_key(&dir) {
                let entries = match self.list_tree(head, &dir, 1).await {
                    Ok(entries) => entries,
                    Err(e) if e.is_not_found() => Vec::new(),
                    Err(e) => return Err(e),
                };
                listings.insert(dir.clone(), entries);
            }
            let current = listings
                .get(&dir)
                .and_then(|entries| entries.iter().find(|e| e.path == path))
                .map(|e| e.sha.as_str());
            match (&change.expected_sha, current) {
                (Some(expected), current) if current != Some(expected.as_str()) => {
                    return Err(super::sha_mismatch(self.name(), &path, expected, current));
                }
                (None, Some(_)) => {
                    return Err(ForgeError::Conflict(
                        ApiError::new(self.name(), 409, format!("'{}' already exists", path))
                            .with_path(path),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for GitHubBackend {
    fn name(&self) -> &'static str {
        "github"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_atomic_commit: true,
            supports_pull_requests: true,
        }
    }

    fn repository(&self) -> &Repository {
        &self.repo
    }

    async fn list_tree(
        &self,
        branch: &str,
        path: &str,
        depth: u32,
    ) -> Result<Vec<TreeEntry>, ForgeError> {
        let base = paths::normalize(path);
        let branch_ref = urlencoding::encode(branch);
        let tree_ref = if base.is_empty() {
            branch_ref.into_owned()
        } else {
            format!("{}:{}", branch_ref, urlencoding::encode(&base))
        };
        let mut options = RequestOptions::get();
        if depth > 1 {
            options = options.param("recursive", 1);
        }

        let tree: GitTree = self
            .client
            .request(&self.repo_path(&format!("git/trees/{}", tree_ref)), options)
            .await?;
        if tree.truncated {
            tracing::warn!(branch, path = %base, "github truncated the tree listing");
        }
        Ok(tree.into_entries(&base))
    }

    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError> {
        let response = self
            .client
            .request_raw(
                &self.repo_path(&format!("contents/{}", paths::encode_segments(path))),
                RequestOptions::get()
                    .param("ref", branch)
                    .header("accept", "application/vnd.github.raw"),
            )
            .await?;
        Ok(response.body)
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError> {
        match self.head_sha(name).await {
            Ok(head_sha) => Ok(Some(BranchRef {
                name: name.to_string(),
                head_sha,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_branch(&self, name: &str, from_sha: &str) -> Result<BranchRef, ForgeError> {
        let body = json!({ "ref": format!("refs/heads/{}", name), "sha": from_sha });
        let reference: GitHubRef = self
            .client
            .request(&self.repo_path("git/refs"), RequestOptions::post(body))
            .await
            .map_err(ForgeError::into_write_conflict)?;
        tracing::info!(branch = name, sha = %reference.object.sha, "created branch");
        Ok(BranchRef {
            name: name.to_string(),
            head_sha: reference.object.sha,
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.repo_path(&format!("git/refs/heads/{}", name)),
                RequestOptions::delete(),
            )
            .await?;
        Ok(())
    }

    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        let path = paths::normalize(&write.path);
        let mut body = json!({
            "message": write.message,
            "content": BASE64.encode(&write.content),
            "branch": write.branch,
        });
        if let Some(sha) = &write.sha {
            body["sha"] = json!(sha);
        }

        let response: ContentsResponse = self
            .client
            .request(
                &self.repo_path(&format!("contents/{}", paths::encode_segments(&path))),
                RequestOptions::put(body),
            )
            .await
            .map_err(ForgeError::into_write_conflict)?;

        let mut receipt = WriteReceipt::new(response.commit.into());
        if let Some(content) = response.content {
            receipt = receipt.with_blob(path, content.sha);
        }
        Ok(receipt)
    }

    async fn commit_files(&self, commit: TreeCommit) -> Result<WriteReceipt, ForgeError> {
        let head = self.head_sha(&commit.branch).await?;
        self.verify_expected(&head, &commit).await?;

        let head_commit: GitCommit = self
            .client
            .request(
                &self.repo_path(&format!("git/commits/{}", head)),
                RequestOptions::get(),
            )
            .await?;

        let mut blobs = BTreeMap::new();
        let mut tree = Vec::with_capacity(commit.changes.len());
        for change in &commit.changes {
            let blob: ShaOnly = self
                .client
                .request(
                    &self.repo_path("git/blobs"),
                    RequestOptions::post(json!({
                        "content": BASE64.encode(&change.content),
                        "encoding": "base64",
                    })),
                )
                .await?;
            let path = paths::normalize(&change.path);
            tree.push(json!({
                "path": path,
                "mode": "100644",
                "type": "blob",
                "sha": blob.sha,
            }));
            blobs.insert(path, blob.sha);
        }

        let new_tree: ShaOnly = self
            .client
            .request(
                &self.repo_path("git/trees"),
                RequestOptions::post(json!({ "base_tree": head_commit.tree.sha, "tree": tree })),
            )
            .await?;

        let created: GitCommit = self
            .client
            .request(
                &self.repo_path("git/commits"),
                RequestOptions::post(json!({
                    "message": commit.message,
                    "tree": new_tree.sha,
                    "parents": [head],
                })),
            )
            .await?;

        self.client
            .request_raw(
                &self.repo_path(&format!("git/refs/heads/{}", commit.branch)),
                RequestOptions::patch(json!({ "sha": created.sha, "force": false })),
            )
            .await
            .map_err(|e| match e {
                // "Update is not a fast forward"
                ForgeError::Api(api) if api.status == 422 => ForgeError::Conflict(api),
                other => other,
            })?;

        tracing::info!(branch = %commit.branch, sha = %created.sha, files = blobs.len(), "committed tree");
        Ok(WriteReceipt {
            commit: created.into_commit(head),
            blobs,
        })
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let pr: GitHubPullRequest = self
            .client
            .request(
                &self.repo_path("pulls"),
                RequestOptions::post(json!({
                    "head": request.head,
                    "base": request.base,
                    "title": request.title,
                    "body": request.body,
                })),
            )
            .await?;
        Ok(pr.into())
    }

    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        // GitHub requires owner:branch to filter by head
        let prs: Vec<GitHubPullRequest> = self
            .client
            .request(
                &self.repo_path("pulls"),
                RequestOptions::get()
                    .param("head", format!("{}:{}", self.repo.owner, head))
                    .param("state", "all")
                    .param("sort", "created")
                    .param("direction", "desc"),
            )
            .await?;
        Ok(prs
            .into_iter()
            .map(PullRequest::from)
            .filter(|pr| pr.head == head)
            .max_by_key(|pr| pr.number))
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let pr: GitHubPullRequest = self
            .client
            .request(
                &self.repo_path(&format!("pulls/{}", number)),
                RequestOptions::get(),
            )
            .await?;
        Ok(pr.into())
    }

    async fn mark_ready(&self, number: u64) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.repo_path(&format!("issues/{}/labels", number)),
                RequestOptions::post(json!({ "labels": [READY_LABEL] })),
            )
            .await?;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.repo_path(&format!("pulls/{}/merge", number)),
                RequestOptions::put(json!({ "merge_method": method.to_string() })),
            )
            .await
            .map_err(|e| match e {
                // 405: not mergeable
                ForgeError::Api(api) if api.status == 405 => ForgeError::Conflict(api),
                other => other,
            })?;
        tracing::info!(number, %method, "merged pull request");
        Ok(())
    }
}

// Response types for GitHub API

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    object: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct GitTree {
    #[serde(default)]
    tree: Vec<GitTreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GitTreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    size: Option<u64>,
}

impl GitTree {
    /// Convert listing-relative paths to root-relative entries; submodules
    /// (`commit` items) are dropped.
    fn into_entries(self, base: &str) -> Vec<TreeEntry> {
        self.tree
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    _ => return None,
                };
                Some(TreeEntry::new(paths::join(base, &item.path), kind, item.sha).with_size(item.size))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    sha: String,
    #[serde(default)]
    message: String,
    tree: ShaOnly,
    #[serde(default)]
    author: Option<GitAuthor>,
}

impl GitCommit {
    fn into_commit(self, parent: String) -> Commit {
        Commit {
            sha: self.sha,
            message: self.message,
            parent_sha: Some(parent),
            author: self.author.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitAuthor {
    name: String,
    email: String,
    date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<GitAuthor> for Author {
    fn from(a: GitAuthor) -> Self {
        Author {
            name: a.name,
            email: a.email,
            date: a.date,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: Option<ShaOnly>,
    commit: ContentsCommit,
}

#[derive(Debug, Deserialize)]
struct ContentsCommit {
    sha: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    parents: Vec<ShaOnly>,
    #[serde(default)]
    author: Option<GitAuthor>,
}

impl From<ContentsCommit> for Commit {
    fn from(c: ContentsCommit) -> Self {
        Commit {
            sha: c.sha,
            message: c.message,
            parent_sha: c.parents.into_iter().next().map(|p| p.sha),
            author: c.author.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    html_url: String,
    state: String,
    merged_at: Option<String>,
    #[serde(default)]
    merged: bool,
    title: String,
    head: GitHubRefName,
    base: GitHubRefName,
    #[serde(default)]
    labels: Vec<GitHubLabel>,
    #[serde(default)]
    requested_reviewers: Vec<GitHubUser>,
}

#[derive(Debug, Deserialize)]
struct GitHubRefName {
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

impl From<GitHubPullRequest> for PullRequest {
    fn from(pr: GitHubPullRequest) -> Self {
        let state = if pr.merged || pr.merged_at.is_some() {
            PrState::Merged
        } else if pr.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        };
        let labels: Vec<String> = pr.labels.into_iter().map(|l| l.name).collect();
        PullRequest {
            number: pr.number,
            url: pr.html_url,
            state,
            head: pr.head.ref_name,
            head_sha: pr.head.sha,
            base: pr.base.ref_name,
            title: pr.title,
            ready: PullRequest::ready_from_labels(&labels),
            labels,
            reviewers: pr.requested_reviewers.into_iter().map(|u| u.login).collect(),
        }
    }
}
