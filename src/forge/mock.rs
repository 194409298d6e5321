//! forge::mock
//!
//! Mock backend implementation for deterministic testing.
//!
//! # Design
//!
//! The mock backend keeps branches, files and pull requests in memory. Blob
//! shas are the hex SHA-256 of the content, so a sha changes exactly when the
//! content does. Every call is recorded as a [`MockOperation`], capabilities
//! are configurable, and failures can be injected per operation with
//! [`FailOn`].
//!
//! Out-of-band mutation ([`MockBackend::set_file`], [`MockBackend::set_pr_state`])
//! stands in for another editor or a reviewer acting on the provider.
//!
//! # Example
//!
//! ```
//! use contentforge::core::types::Repository;
//! use contentforge::forge::mock::MockBackend;
//! use contentforge::forge::{Backend, FileWrite};
//!
//! # tokio_test::block_on(async {
//! let backend = MockBackend::new(Repository::new("owner", "repo", "master"))
//!     .with_file("master", "content/posts/a.md", "hello");
//!
//! let entries = backend.list_tree("master", "content/posts", 1).await.unwrap();
//! assert_eq!(entries[0].sha, MockBackend::blob_sha(b"hello"));
//!
//! backend
//!     .write_file(FileWrite::new("master", "content/posts/b.md", "new", "Add b"))
//!     .await
//!     .unwrap();
//! assert_eq!(backend.file("master", "content/posts/b.md").unwrap(), b"new");
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::traits::{
    ApiError, Backend, Capabilities, CreatePrRequest, FileWrite, ForgeError, MergeMethod, PrState,
    PullRequest, TreeCommit, WriteReceipt, READY_LABEL,
};
use crate::core::paths;
use crate::core::types::{BranchRef, Commit, EntryKind, Repository, TreeEntry};

/// Mock backend for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MockBackend {
    /// Internal state shared across clones.
    inner: Arc<Mutex<MockInner>>,
    /// Repository identity (immutable).
    repo: Repository,
}

/// Internal mutable state.
#[derive(Debug)]
struct MockInner {
    capabilities: Capabilities,
    branches: BTreeMap<String, MockBranch>,
    prs: BTreeMap<u64, PullRequest>,
    next_pr_number: u64,
    commit_counter: u64,
    fail_on: Vec<FailOn>,
    operations: Vec<MockOperation>,
}

#[derive(Debug, Clone)]
struct MockBranch {
    head: String,
    files: BTreeMap<String, Vec<u8>>,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    ListTree(ForgeError),
    ReadFile(ForgeError),
    GetBranch(ForgeError),
    CreateBranch(ForgeError),
    DeleteBranch(ForgeError),
    /// Fail write_file for one path only.
    WriteFile { path: String, error: ForgeError },
    CommitFiles(ForgeError),
    CreatePr(ForgeError),
    FindPrByHead(ForgeError),
    GetPr(ForgeError),
    MarkReady(ForgeError),
    MergePr(ForgeError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    ListTree {
        branch: String,
        path: String,
        depth: u32,
    },
    ReadFile {
        branch: String,
        path: String,
    },
    GetBranch {
        name: String,
    },
    CreateBranch {
        name: String,
        from_sha: String,
    },
    DeleteBranch {
        name: String,
    },
    WriteFile {
        branch: String,
        path: String,
        sha: Option<String>,
        signoff: bool,
    },
    CommitFiles {
        branch: String,
        paths: Vec<String>,
    },
    CreatePr {
        head: String,
        base: String,
        title: String,
    },
    FindPrByHead {
        head: String,
    },
    GetPr {
        number: u64,
    },
    MarkReady {
        number: u64,
    },
    MergePr {
        number: u64,
        method: MergeMethod,
    },
}

impl MockOperation {
    /// Whether this operation changes repository content.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            MockOperation::WriteFile { .. } | MockOperation::CommitFiles { .. }
        )
    }
}

impl MockBackend {
    /// Create a mock with an empty default branch; both capabilities on.
    pub fn new(repo: Repository) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(
            repo.default_branch.clone(),
            MockBranch {
                head: commit_sha(0, "", "initial"),
                files: BTreeMap::new(),
            },
        );
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                capabilities: Capabilities {
                    supports_atomic_commit: true,
                    supports_pull_requests: true,
                },
                branches,
                prs: BTreeMap::new(),
                next_pr_number: 1,
                commit_counter: 0,
                fail_on: Vec::new(),
                operations: Vec::new(),
            })),
            repo,
        }
    }

    /// Override the reported capabilities.
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        self.inner.lock().unwrap().capabilities = capabilities;
        self
    }

    /// Seed a file without recording an operation or creating a commit.
    pub fn with_file(self, branch: &str, path: &str, content: impl Into<Vec<u8>>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let head = commit_sha(0, "", branch);
            inner
                .branches
                .entry(branch.to_string())
                .or_insert_with(|| MockBranch {
                    head,
                    files: BTreeMap::new(),
                })
                .files
                .insert(paths::normalize(path), content.into());
        }
        self
    }

    /// Configure the mock to fail on a specific operation.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().fail_on.push(fail_on);
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().fail_on.clear();
    }

    /// Change a file out of band, as another editor would. Advances the head.
    pub fn set_file(&self, branch: &str, path: &str, content: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        let head = inner.next_commit("external edit");
        if let Some(b) = inner.branches.get_mut(branch) {
            b.files.insert(paths::normalize(path), content.into());
            b.head = head;
        }
    }

    /// Change a PR's state out of band, as a reviewer would.
    pub fn set_pr_state(&self, number: u64, state: PrState) {
        let mut inner = self.inner.lock().unwrap();
        let Some(pr) = inner.prs.get(&number) else {
            return;
        };
        let head_sha = inner.branch_head(&pr.head);
        if let Some(pr) = inner.prs.get_mut(&number) {
            pr.state = state;
            pr.head_sha = head_sha;
        }
    }

    /// Content-addressed blob identity used by the mock.
    pub fn blob_sha(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Current content of a file.
    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .branches
            .get(branch)
            .and_then(|b| b.files.get(&paths::normalize(path)).cloned())
    }

    /// Current head sha of a branch.
    pub fn head(&self, branch: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.branches.get(branch).map(|b| b.head.clone())
    }

    pub fn branch_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.branches.keys().cloned().collect()
    }

    /// Get a PR by number (for test verification).
    pub fn pr(&self, number: u64) -> Option<PullRequest> {
        let inner = self.inner.lock().unwrap();
        inner.prs.get(&number).map(|pr| inner.view_pr(pr))
    }

    pub fn pr_count(&self) -> usize {
        self.inner.lock().unwrap().prs.len()
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Record an operation.
    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    /// Check if we should fail and return the error if so.
    fn check_fail(&self, expected: &str, path: Option<&str>) -> Result<(), ForgeError> {
        let inner = self.inner.lock().unwrap();
        for fail in &inner.fail_on {
            let hit = match fail {
                FailOn::ListTree(e) if expected == "list_tree" => Some(e),
                FailOn::ReadFile(e) if expected == "read_file" => Some(e),
                FailOn::GetBranch(e) if expected == "get_branch" => Some(e),
                FailOn::CreateBranch(e) if expected == "create_branch" => Some(e),
                FailOn::DeleteBranch(e) if expected == "delete_branch" => Some(e),
                FailOn::WriteFile { path: p, error }
                    if expected == "write_file" && path == Some(p.as_str()) =>
                {
                    Some(error)
                }
                FailOn::CommitFiles(e) if expected == "commit_files" => Some(e),
                FailOn::CreatePr(e) if expected == "create_pr" => Some(e),
                FailOn::FindPrByHead(e) if expected == "find_pr_by_head" => Some(e),
                FailOn::GetPr(e) if expected == "get_pr" => Some(e),
                FailOn::MarkReady(e) if expected == "mark_ready" => Some(e),
                FailOn::MergePr(e) if expected == "merge_pr" => Some(e),
                _ => None,
            };
            if let Some(e) = hit {
                return Err(e.clone());
            }
        }
        Ok(())
    }

    fn not_found(&self, what: String) -> ForgeError {
        ForgeError::NotFound(ApiError::new("mock", 404, format!("{} not found", what)))
    }

    fn require_pull_requests(&self) -> Result<(), ForgeError> {
        if self.inner.lock().unwrap().capabilities.supports_pull_requests {
            Ok(())
        } else {
            Err(self.no_pull_requests())
        }
    }
}

impl MockInner {
    fn next_commit(&mut self, message: &str) -> String {
        self.commit_counter += 1;
        commit_sha(self.commit_counter, "", message)
    }

    fn branch_head(&self, branch: &str) -> Option<String> {
        self.branches.get(branch).map(|b| b.head.clone())
    }

    /// A stored PR as the provider reports it: open PRs follow their branch.
    fn view_pr(&self, pr: &PullRequest) -> PullRequest {
        let mut view = pr.clone();
        if view.state == PrState::Open {
            view.head_sha = self.branch_head(&view.head);
        }
        view
    }

    /// Apply files to a branch as one commit; the caller checked preconditions.
    fn apply(
        &mut self,
        branch: &str,
        message: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<WriteReceipt, ForgeError> {
        self.commit_counter += 1;
        let counter = self.commit_counter;
        let b = self.branches.get_mut(branch).ok_or_else(|| {
            ForgeError::NotFound(ApiError::new("mock", 404, format!("branch {} not found", branch)))
        })?;
        let parent = b.head.clone();
        let sha = commit_sha(counter, &parent, message);

        let mut receipt = WriteReceipt::new(Commit {
            sha: sha.clone(),
            message: message.to_string(),
            parent_sha: Some(parent),
            author: None,
        });
        for (path, content) in files {
            receipt = receipt.with_blob(path.clone(), MockBackend::blob_sha(&content));
            b.files.insert(path, content);
        }
        b.head = sha;
        Ok(receipt)
    }

    fn current_sha(&self, branch: &str, path: &str) -> Result<Option<String>, ForgeError> {
        let b = self.branches.get(branch).ok_or_else(|| {
            ForgeError::NotFound(ApiError::new("mock", 404, format!("branch {} not found", branch)))
        })?;
        Ok(b.files.get(path).map(|c| MockBackend::blob_sha(c)))
    }

    /// Reject a write whose precondition no longer holds.
    fn check_precondition(
        &self,
        branch: &str,
        path: &str,
        expected: Option<&str>,
    ) -> Result<(), ForgeError> {
        let current = self.current_sha(branch, path)?;
        match (expected, current.as_deref()) {
            (Some(expected), current) if Some(expected) != current => {
                Err(super::sha_mismatch("mock", path, expected, current))
            }
            (None, Some(_)) => Err(ForgeError::Conflict(
                ApiError::new("mock", 422, format!("'{}' already exists", path)).with_path(path),
            )),
            _ => Ok(()),
        }
    }
}

fn commit_sha(counter: u64, parent: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(counter.to_be_bytes());
    hasher.update(parent.as_bytes());
    hasher.update(message.as_bytes());
    hex::encode(&hasher.finalize()[..20])
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.lock().unwrap().capabilities
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
        self.record(MockOperation::ListTree {
            branch: branch.to_string(),
            path: base.clone(),
            depth,
        });
        self.check_fail("list_tree", None)?;

        let inner = self.inner.lock().unwrap();
        let b = inner
            .branches
            .get(branch)
            .ok_or_else(|| self.not_found(format!("branch {}", branch)))?;

        let mut blobs = Vec::new();
        let mut trees = BTreeMap::new();
        for (file, content) in &b.files {
            let Some(rel) = paths::relative_to(&base, file) else {
                continue;
            };
            let segments: Vec<&str> = rel.split('/').collect();
            // Every ancestor directory below base is a tree entry.
            for i in 1..segments.len() {
                if depth <= 1 && i > 1 {
                    break;
                }
                let dir = paths::join(&base, &segments[..i].join("/"));
                trees
                    .entry(dir.clone())
                    .or_insert_with(|| MockBackend::blob_sha(dir.as_bytes()));
            }
            if depth > 1 || segments.len() == 1 {
                blobs.push(
                    TreeEntry::new(file.clone(), EntryKind::Blob, MockBackend::blob_sha(content))
                        .with_size(Some(content.len() as u64)),
                );
            }
        }

        if !base.is_empty() && blobs.is_empty() && trees.is_empty() {
            return Err(self.not_found(format!("directory {}", base)));
        }

        let mut entries: Vec<TreeEntry> = trees
            .into_iter()
            .map(|(dir, sha)| TreeEntry::new(dir, EntryKind::Tree, sha))
            .chain(blobs)
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError> {
        self.record(MockOperation::ReadFile {
            branch: branch.to_string(),
            path: paths::normalize(path),
        });
        self.check_fail("read_file", None)?;
        self.file(branch, path)
            .ok_or_else(|| self.not_found(format!("{}:{}", branch, path)))
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError> {
        self.record(MockOperation::GetBranch {
            name: name.to_string(),
        });
        self.check_fail("get_branch", None)?;
        Ok(self.head(name).map(|head_sha| BranchRef {
            name: name.to_string(),
            head_sha,
        }))
    }

    async fn create_branch(&self, name: &str, from_sha: &str) -> Result<BranchRef, ForgeError> {
        self.record(MockOperation::CreateBranch {
            name: name.to_string(),
            from_sha: from_sha.to_string(),
        });
        self.check_fail("create_branch", None)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.branches.contains_key(name) {
            return Err(ForgeError::Conflict(ApiError::new(
                "mock",
                409,
                format!("branch {} already exists", name),
            )));
        }
        let source = inner
            .branches
            .values()
            .find(|b| b.head == from_sha)
            .cloned()
            .ok_or_else(|| self.not_found(format!("commit {}", from_sha)))?;
        inner.branches.insert(name.to_string(), source);
        Ok(BranchRef {
            name: name.to_string(),
            head_sha: from_sha.to_string(),
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError> {
        self.record(MockOperation::DeleteBranch {
            name: name.to_string(),
        });
        self.check_fail("delete_branch", None)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| self.not_found(format!("branch {}", name)))
    }

    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        let path = paths::normalize(&write.path);
        self.record(MockOperation::WriteFile {
            branch: write.branch.clone(),
            path: path.clone(),
            sha: write.sha.clone(),
            signoff: write.signoff,
        });
        self.check_fail("write_file", Some(&path))?;

        let mut inner = self.inner.lock().unwrap();
        inner.check_precondition(&write.branch, &path, write.sha.as_deref())?;
        inner.apply(&write.branch, &write.message, vec![(path, write.content)])
    }

    async fn commit_files(&self, commit: TreeCommit) -> Result<WriteReceipt, ForgeError> {
        let files: Vec<String> = commit
            .changes
            .iter()
            .map(|c| paths::normalize(&c.path))
            .collect();
        self.record(MockOperation::CommitFiles {
            branch: commit.branch.clone(),
            paths: files.clone(),
        });
        if !self.capabilities().supports_atomic_commit {
            return Err(ForgeError::NotImplemented(
                "mock has no atomic commit primitive".into(),
            ));
        }
        self.check_fail("commit_files", None)?;

        let mut inner = self.inner.lock().unwrap();
        for (change, path) in commit.changes.iter().zip(&files) {
            inner.check_precondition(&commit.branch, path, change.expected_sha.as_deref())?;
        }
        let changes = files
            .into_iter()
            .zip(commit.changes.into_iter().map(|c| c.content))
            .collect();
        inner.apply(&commit.branch, &commit.message, changes)
    }

    async fn create_pr(&self, request: CreatePrRequest) -> Result<PullRequest, ForgeError> {
        self.record(MockOperation::CreatePr {
            head: request.head.clone(),
            base: request.base.clone(),
            title: request.title.clone(),
        });
        self.require_pull_requests()?;
        self.check_fail("create_pr", None)?;

        let mut inner = self.inner.lock().unwrap();
        if !inner.branches.contains_key(&request.head) {
            return Err(ForgeError::Api(ApiError::new(
                "mock",
                422,
                format!("head branch {} does not exist", request.head),
            )));
        }
        let number = inner.next_pr_number;
        inner.next_pr_number += 1;

        let head_sha = inner.branch_head(&request.head);
        let pr = PullRequest {
            number,
            url: format!("mock://{}/pulls/{}", self.repo.full_name(), number),
            state: PrState::Open,
            head: request.head,
            head_sha,
            base: request.base,
            title: request.title,
            ready: false,
            labels: Vec::new(),
            reviewers: Vec::new(),
        };
        inner.prs.insert(number, pr.clone());
        Ok(pr)
    }

    async fn find_pr_by_head(&self, head: &str) -> Result<Option<PullRequest>, ForgeError> {
        self.record(MockOperation::FindPrByHead {
            head: head.to_string(),
        });
        self.require_pull_requests()?;
        self.check_fail("find_pr_by_head", None)?;

        let inner = self.inner.lock().unwrap();
        Ok(inner
            .prs
            .values()
            .filter(|pr| pr.head == head)
            .max_by_key(|pr| pr.number)
            .map(|pr| inner.view_pr(pr)))
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, ForgeError> {
        self.record(MockOperation::GetPr { number });
        self.require_pull_requests()?;
        self.check_fail("get_pr", None)?;
        self.pr(number)
            .ok_or_else(|| self.not_found(format!("PR #{}", number)))
    }

    async fn mark_ready(&self, number: u64) -> Result<(), ForgeError> {
        self.record(MockOperation::MarkReady { number });
        self.require_pull_requests()?;
        self.check_fail("mark_ready", None)?;

        let mut inner = self.inner.lock().unwrap();
        let pr = inner
            .prs
            .get_mut(&number)
            .ok_or_else(|| self.not_found(format!("PR #{}", number)))?;
        if !pr.labels.iter().any(|l| l == READY_LABEL) {
            pr.labels.push(READY_LABEL.to_string());
        }
        pr.ready = true;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), ForgeError> {
        self.record(MockOperation::MergePr { number, method });
        self.require_pull_requests()?;
        self.check_fail("merge_pr", None)?;

        let mut inner = self.inner.lock().unwrap();
        let pr = inner
            .prs
            .get(&number)
            .cloned()
            .ok_or_else(|| self.not_found(format!("PR #{}", number)))?;
        if pr.state != PrState::Open {
            return Err(ForgeError::Conflict(ApiError::new(
                "mock",
                405,
                format!("PR #{} is {}", number, pr.state),
            )));
        }
        let files: Vec<(String, Vec<u8>)> = inner
            .branches
            .get(&pr.head)
            .map(|b| b.files.clone().into_iter().collect())
            .ok_or_else(|| self.not_found(format!("branch {}", pr.head)))?;
        let merged_head = inner.branch_head(&pr.head);
        inner.apply(&pr.base, &format!("Merge PR #{} ({})", number, method), files)?;
        if let Some(stored) = inner.prs.get_mut(&number) {
            stored.state = PrState::Merged;
            stored.head_sha = merged_head;
        }
        Ok(())
    }
}
