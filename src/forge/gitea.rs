//! forge::gitea
//!
//! Gitea backend over the REST API (`/api/v1`).
//!
//! # Design
//!
//! Gitea has no multi-file commit primitive, so every file is its own
//! commit through the contents API:
//!
//! - new file: `POST contents/{path}` with `{branch, content, message, signoff}`
//! - update: `PUT contents/{path}` with the same body plus `sha`
//!
//! Gitea rejects an update whose `sha` is stale, which is the only
//! concurrency guard on this provider. Tree listings are paged: the response
//! is `truncated` until the last `page`.
//!
//! Readiness for publishing is the [`READY_LABEL`], created in the
//! repository on first use.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::traits::{
    Backend, Capabilities, CreatePrRequest, FileWrite, ForgeError, MergeMethod, PrState,
    PullRequest, WriteReceipt, READY_LABEL,
};
use super::transport::{ProviderClient, RequestOptions};
use crate::auth::AuthScheme;
use crate::core::paths;
use crate::core::session::Session;
use crate::core::types::{Author, BranchRef, Commit, EntryKind, Repository, TreeEntry};

/// Colour given to the readiness label when it has to be created.
const READY_LABEL_COLOR: &str = "#4caf50";

/// Gitea backend.
#[derive(Debug, Clone)]
pub struct GiteaBackend {
    client: ProviderClient,
    repo: Repository,
}

impl GiteaBackend {
    /// Create a backend for `repo`; `api_root` is e.g. `https://gitea.example.com/api/v1`.
    pub fn new(repo: Repository, api_root: impl Into<String>, session: Session) -> Self {
        Self {
            client: ProviderClient::new("gitea", api_root, AuthScheme::Token, session),
            repo,
        }
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    fn repo_path(&self, path: &str) -> String {
        format!("repos/{}/{}/{}", self.repo.owner, self.repo.name, path)
    }

    /// Id of the readiness label, creating the label if needed.
    async fn ready_label_id(&self) -> Result<u64, ForgeError> {
        let labels: Vec<GiteaLabel> = self
            .client
            .request_all(&self.repo_path("labels"), RequestOptions::get())
            .await?;
        if let Some(label) = labels.into_iter().find(|l| l.name == READY_LABEL) {
            return Ok(label.id);
        }

        let created: GiteaLabel = self
            .client
            .request(
                &self.repo_path("labels"),
                RequestOptions::post(json!({ "name": READY_LABEL, "color": READY_LABEL_COLOR })),
            )
            .await?;
        tracing::info!(label = READY_LABEL, id = created.id, "created readiness label");
        Ok(created.id)
    }
}

#[async_trait]
impl Backend for GiteaBackend {
    fn name(&self) -> &'static str {
        "gitea"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_atomic_commit: false,
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
        let request_path = self.repo_path(&format!("git/trees/{}", tree_ref));

        let mut entries = Vec::new();
        let mut page = 1u32;
        loop {
            let mut options = RequestOptions::get();
            if depth > 1 {
                options = options.param("recursive", 1);
            }
            if page > 1 {
                options = options.param("page", page);
            }

            let tree: GiteaTree = self.client.request(&request_path, options).await?;
            let truncated = tree.truncated && !tree.tree.is_empty();
            entries.extend(tree.tree.into_iter().filter_map(|item| item.into_entry(&base)));
            if !truncated {
                return Ok(entries);
            }
            page += 1;
        }
    }

    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError> {
        let response = self
            .client
            .request_raw(
                &self.repo_path(&format!("raw/{}", paths::encode_segments(path))),
                RequestOptions::get().param("ref", branch),
            )
            .await?;
        Ok(response.body)
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError> {
        let result: Result<GiteaBranch, ForgeError> = self
            .client
            .request(
                &self.repo_path(&format!("branches/{}", name)),
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
        let branch: GiteaBranch = self
            .client
            .request(
                &self.repo_path("branches"),
                RequestOptions::post(json!({
                    "new_branch_name": name,
                    "old_ref_name": from_sha,
                })),
            )
            .await?;
        tracing::info!(branch = name, sha = %branch.commit.id, "created branch");
        Ok(BranchRef {
            name: branch.name,
            head_sha: branch.commit.id,
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.repo_path(&format!("branches/{}", name)),
                RequestOptions::delete(),
            )
            .await?;
        Ok(())
    }

    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        let path = paths::normalize(&write.path);
        let mut body = json!({
            "branch": write.branch,
            "content": BASE64.encode(&write.content),
            "message": write.message,
            "signoff": write.signoff,
        });
        let options = match &write.sha {
            Some(sha) => {
                body["sha"] = json!(sha);
                RequestOptions::put(body)
            }
            None => RequestOptions::post(body),
        };

        let response: FileResponse = self
            .client
            .request(
                &self.repo_path(&format!("contents/{}", paths::encode_segments(&path))),
                options,
            )
            .await
            .map_err(ForgeError::into_write_conflict)?;

        tracing::debug!(path = %path, sha = %response.commit.sha, "wrote file");
        let mut receipt = WriteReceipt::new(response.commit.into());
        if let Some(content) = response.content {
            receipt = receipt.with_blob(path, content.sha);
        }
        Ok(receipt)
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        let pr: GiteaPullRequest = self
            .client
            .request(
                &self.repo_path("pulls"),
                RequestOptions::post(json!({
                    "head": request.head,
                    "base": request.base,
                    "title": request.title,
                    "body": request.body.unwrap_or_default(),
                })),
            )
            .await?;
        Ok(pr.into())
    }

    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        // Gitea resolves the newest pull request for a base/head pair; the
        // head is a wildcard route segment so it keeps its slashes.
        let lookup = format!(
            "pulls/{}/{}",
            urlencoding::encode(&self.repo.default_branch),
            paths::encode_segments(head)
        );
        match self
            .client
            .request::<GiteaPullRequest>(&self.repo_path(&lookup), RequestOptions::get())
            .await
        {
            Ok(pr) => Ok(Some(pr.into())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, ForgeError> {
        let pr: GiteaPullRequest = self
            .client
            .request(
                &self.repo_path(&format!("pulls/{}", number)),
                RequestOptions::get(),
            )
            .await?;
        Ok(pr.into())
    }

    async fn mark_ready(&self, number: u64) -> Result<(), ForgeError> {
        let label_id = self.ready_label_id().await?;
        self.client
            .request_raw(
                &self.repo_path(&format!("issues/{}/labels", number)),
                RequestOptions::post(json!({ "labels": [label_id] })),
            )
            .await?;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), ForgeError> {
        self.client
            .request_raw(
                &self.repo_path(&format!("pulls/{}/merge", number)),
                RequestOptions::post(json!({ "Do": method.to_string() })),
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

// Response types for Gitea API

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GiteaTree {
    #[serde(default)]
    tree: Vec<GiteaTreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GiteaTreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    size: Option<u64>,
}

impl GiteaTreeItem {
    fn into_entry(self, base: &str) -> Option<TreeEntry> {
        let kind = match self.kind.as_str() {
            "blob" => EntryKind::Blob,
            "tree" => EntryKind::Tree,
            _ => return None,
        };
        Some(TreeEntry::new(paths::join(base, &self.path), kind, self.sha).with_size(self.size))
    }
}

#[derive(Debug, Deserialize)]
struct GiteaBranch {
    name: String,
    commit: GiteaBranchCommit,
}

#[derive(Debug, Deserialize)]
struct GiteaBranchCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    content: Option<ShaOnly>,
    commit: FileCommit,
}

#[derive(Debug, Deserialize)]
struct FileCommit {
    sha: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    parents: Vec<ShaOnly>,
    #[serde(default)]
    author: Option<FileAuthor>,
}

#[derive(Debug, Deserialize)]
struct FileAuthor {
    name: String,
    email: String,
    date: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<FileCommit> for Commit {
    fn from(c: FileCommit) -> Self {
        Commit {
            sha: c.sha,
            message: c.message,
            parent_sha: c.parents.into_iter().next().map(|p| p.sha),
            author: c.author.map(|a| Author {
                name: a.name,
                email: a.email,
                date: a.date,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GiteaLabel {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct GiteaPullRequest {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    title: String,
    head: GiteaPrBranch,
    base: GiteaPrBranch,
    #[serde(default)]
    labels: Option<Vec<GiteaLabel>>,
    #[serde(default)]
    requested_reviewers: Option<Vec<GiteaUser>>,
}

#[derive(Debug, Deserialize)]
struct GiteaPrBranch {
    #[serde(rename = "ref")]
    ref_name: String,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GiteaUser {
    login: String,
}

impl From<GiteaPullRequest> for PullRequest {
    fn from(pr: GiteaPullRequest) -> Self {
        let state = if pr.merged {
            PrState::Merged
        } else if pr.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        };
        let labels: Vec<String> = pr
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| l.name)
            .collect();
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
            reviewers: pr
                .requested_reviewers
                .unwrap_or_default()
                .into_iter()
                .map(|u| u.login)
                .collect(),
        }
    }
}
