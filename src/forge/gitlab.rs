//! forge::gitlab
//!
//! GitLab backend over the REST API (`/api/v4`).
//!
//! # Design
//!
//! - The project is addressed by its URL-encoded full path, so nested groups
//!   (`group/sub/project`) need no id lookup.
//! - Tree listings page with `X-Next-Page`, which the transport follows.
//! - Multi-file writes use `POST repository/commits` with one action per file.
//!
//! GitLab's commit API has no blob-sha precondition. Before writing, files
//! that carry an expected sha are checked against `repository/files/{path}`
//! (`blob_id`), and a create over an existing file is refused by GitLab
//! itself. The window between that check and the commit is not closed.
//!
//! Readiness for publishing is the [`READY_LABEL`] added through
//! `add_labels`. Rebase merges are not offered by the merge endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::traits::{
    Backend, Capabilities, CreatePrRequest, FileChange, FileWrite, ForgeError, MergeMethod,
    PrState, PullRequest, TreeCommit, WriteReceipt, READY_LABEL,
};
use super::transport::{ProviderClient, RequestOptions};
use crate::auth::AuthScheme;
use crate::core::paths;
use crate::core::session::Session;
use crate::core::types::{Author, BranchRef, Commit, EntryKind, Repository, TreeEntry};

/// Default GitLab API base URL.
pub const DEFAULT_API_ROOT: &str = "https://gitlab.com/api/v4";

/// GitLab backend.
#[derive(Debug, Clone)]
pub struct GitLabBackend {
    client: ProviderClient,
    repo: Repository,
    project_id: String,
}

impl GitLabBackend {
    pub fn new(repo: Repository, api_root: impl Into<String>, session: Session) -> Self {
        let project_id = urlencoding::encode(&repo.full_name()).into_owned();
        Self {
            client: ProviderClient::new("gitlab", api_root, AuthScheme::Bearer, session),
            repo,
            project_id,
        }
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Encoded project id (`group%2Fproject`).
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn project_path(&self, path: &str) -> String {
        format!("projects/{}/{}", self.project_id, path)
    }

    fn file_path(&self, path: &str) -> String {
        self.project_path(&format!(
            "repository/files/{}",
            urlencoding::encode(&paths::normalize(path))
        ))
    }

    /// Current blob id of a file, `None` if it doesn't exist.
    async fn blob_id(&self, branch: &str, path: &str) -> Result<Option<String>, ForgeError> {
        let result: Result<GitLabFile, ForgeError> = self
            .client
            .request(&self.file_path(path), RequestOptions::get().param("ref", branch))
            .await;
        match result {
            Ok(file) => Ok(Some(file.blob_id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn verify_expected(&self, branch: &str, change: &FileChange) -> Result<(), ForgeError> {
        if let Some(expected) = &change.expected_sha {
            let current = self.blob_id(branch, &change.path).await?;
            if current.as_deref() != Some(expected.as_str()) {
                return Err(super::sha_mismatch(
                    self.name(),
                    &change.path,
                    expected,
                    current.as_deref(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for GitLabBackend {
    fn name(&self) -> &'static str {
        "gitlab"
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
        let mut options = RequestOptions::get()
            .param("ref", branch)
            .param("per_page", 100);
        if !base.is_empty() {
            options = options.param("path", &base);
        }
        if depth > 1 {
            options = options.param("recursive", true);
        }

        let items: Vec<GitLabTreeItem> = self
            .client
            .request_all(&self.project_path("repository/tree"), options)
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    _ => return None,
                };
                Some(TreeEntry::new(item.path, kind, item.id))
            })
            .collect())
    }

    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError> {
        let response = self
            .client
            .request_raw(
                &format!("{}/raw", self.file_path(path)),
                RequestOptions::get().param("ref", branch),
            )
            .await?;
        Ok(response.body)
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError> {
        let result: Result<GitLabBranch, ForgeError> = self
            .client
            .request(
                &self.project_path(&format!(
                    "repository/branches/{}",
                    urlencoding::encode(name)
                )),
                RequestOptions::get(),
            )
            .await;
        match result {
            Ok(branch) => Ok(Some(BranchRef {
                name: branch.name,
                head_sha: branch.commit.id,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_branch(&self, name: &str, from_sha: &str) -> Result<BranchRef, ForgeError> {
        let branch: GitLabBranch = self
            .client
            .request(
                &self.project_path("repository/branches"),
                RequestOptions::post(json!({ "branch": name, "ref": from_sha })),
            )
            .await
            .map_err(ForgeError::into_write_conflict)?;
        tracing::info!(branch = name, sha = %branch.commit.id, "created branch");
        Ok(BranchRef {
            name: branch.name,
            head_sha: branch.commit.id,
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.project_path(&format!(
                    "repository/branches/{}",
                    urlencoding::encode(name)
                )),
                RequestOptions::delete(),
            )
            .await?;
        Ok(())
    }

    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        let change = FileChange {
            path: write.path,
            content: write.content,
            expected_sha: write.sha,
        };
        self.commit_files(TreeCommit {
            branch: write.branch,
            message: write.message,
            changes: vec![change],
        })
        .await
    }

    async fn commit_files(&self, commit: TreeCommit) -> Result<WriteReceipt, ForgeError> {
        let mut actions = Vec::with_capacity(commit.changes.len());
        for change in &commit.changes {
            self.verify_expected(&commit.branch, change).await?;
            actions.push(json!({
                "action": if change.expected_sha.is_some() { "update" } else { "create" },
                "file_path": paths::normalize(&change.path),
                "content": BASE64.encode(&change.content),
                "encoding": "base64",
            }));
        }

        let created: GitLabCommit = self
            .client
            .request(
                &self.project_path("repository/commits"),
                RequestOptions::post(json!({
                    "branch": commit.branch,
                    "commit_message": commit.message,
                    "actions": actions,
                })),
            )
            .await
            .map_err(ForgeError::into_write_conflict)?;

        tracing::info!(branch = %commit.branch, sha = %created.id, files = commit.changes.len(), "committed actions");
        Ok(WriteReceipt::new(created.into()))
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let mr: MergeRequest = self
            .client
            .request(
                &self.project_path("merge_requests"),
                RequestOptions::post(json!({
                    "source_branch": request.head,
                    "target_branch": request.base,
                    "title": request.title,
                    "description": request.body.unwrap_or_default(),
                })),
            )
            .await?;
        Ok(mr.into())
    }

    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        let mrs: Vec<MergeRequest> = self
            .client
            .request(
                &self.project_path("merge_requests"),
                RequestOptions::get()
                    .param("source_branch", head)
                    .param("state", "all")
                    .param("order_by", "created_at")
                    .param("sort", "desc"),
            )
            .await?;
        Ok(mrs
            .into_iter()
            .map(PullRequest::from)
            .max_by_key(|pr| pr.number))
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let mr: MergeRequest = self
            .client
            .request(
                &self.project_path(&format!("merge_requests/{}", number)),
                RequestOptions::get(),
            )
            .await?;
        Ok(mr.into())
    }

    async fn mark_ready(&self, number: u64) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.project_path(&format!("merge_requests/{}", number)),
                RequestOptions::put(json!({ "add_labels": READY_LABEL })),
            )
            .await?;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), ForgeError> {
        let squash = match method {
            MergeMethod::Merge => false,
            MergeMethod::Squash => true,
            MergeMethod::Rebase => {
                return Err(ForgeError::NotImplemented(
                    "gitlab merge requests cannot be merged by rebase".into(),
                ))
            }
        };
        self.client
            .request_raw(
                &self.project_path(&format!("merge_requests/{}/merge", number)),
                RequestOptions::put(json!({ "squash": squash })),
            )
            .await
            .map_err(|e| match e {
                // 405/406/422: not mergeable in its current state
                ForgeError::Api(api) if matches!(api.status, 405 | 406 | 422) => {
                    ForgeError::Conflict(api)
                }
                other => other,
            })?;
        tracing::info!(number, %method, "merged merge request");
        Ok(())
    }
}

// Response types for GitLab API

#[derive(Debug, Deserialize)]
struct GitLabTreeItem {
    id: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GitLabFile {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
struct GitLabBranch {
    name: String,
    commit: GitLabBranchCommit,
}

#[derive(Debug, Deserialize)]
struct GitLabBranchCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    parent_ids: Vec<String>,
    author_name: Option<String>,
    author_email: Option<String>,
    authored_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<GitLabCommit> for Commit {
    fn from(c: GitLabCommit) -> Self {
        let author = match (c.author_name, c.author_email) {
            (Some(name), Some(email)) => Some(Author {
                name,
                email,
                date: c.authored_date,
            }),
            _ => None,
        };
        Commit {
            sha: c.id,
            message: c.message,
            parent_sha: c.parent_ids.into_iter().next(),
            author,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    web_url: String,
    state: String,
    title: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    reviewers: Vec<GitLabUser>,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

impl From<MergeRequest> for PullRequest {
    fn from(mr: MergeRequest) -> Self {
        let state = match mr.state.as_str() {
            "merged" => PrState::Merged,
            "opened" | "locked" => PrState::Open,
            _ => PrState::Closed,
        };
        PullRequest {
            number: mr.iid,
            url: mr.web_url,
            state,
            head: mr.source_branch,
            head_sha: mr.sha,
            base: mr.target_branch,
            title: mr.title,
            ready: PullRequest::ready_from_labels(&mr.labels),
            labels: mr.labels,
            reviewers: mr.reviewers.into_iter().map(|u| u.username).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend() -> GitLabBackend {
        GitLabBackend::new(
            Repository::new("group/sub", "site", "main"),
            DEFAULT_API_ROOT,
            Session::new(Arc::new(crate::auth::Anonymous)),
        )
    }

    #[test]
    fn project_id_is_encoded_full_path() {
        assert_eq!(backend().project_id(), "group%2Fsub%2Fsite");
    }

    #[test]
    fn file_path_encodes_slashes() {
        assert_eq!(
            backend().file_path("/content/posts/a.md"),
            "projects/group%2Fsub%2Fsite/repository/files/content%2Fposts%2Fa.md"
        );
    }

    #[test]
    fn merge_request_states() {
        let mr = |state: &str| MergeRequest {
            iid: 4,
            web_url: "https://gitlab.com/g/p/-/merge_requests/4".into(),
            state: state.into(),
            title: "t".into(),
            source_branch: "cms/posts/a".into(),
            target_branch: "main".into(),
            sha: Some("mr-head".into()),
            labels: vec![READY_LABEL.into()],
            reviewers: vec![],
        };
        assert_eq!(PullRequest::from(mr("opened")).state, PrState::Open);
        assert_eq!(PullRequest::from(mr("merged")).state, PrState::Merged);
        assert_eq!(PullRequest::from(mr("closed")).state, PrState::Closed);
        assert!(PullRequest::from(mr("opened")).ready);
        assert_eq!(PullRequest::from(mr("merged")).head_sha.as_deref(), Some("mr-head"));
    }

    #[tokio::test]
    async fn rebase_merge_not_offered() {
        let err = backend().merge_pr(1, MergeMethod::Rebase).await.unwrap_err();
        assert!(matches!(err, ForgeError::NotImplemented(_)));
    }
}
