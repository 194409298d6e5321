//! forge::local
//!
//! Plain Git backend over a local repository, through libgit2.
//!
//! # Design
//!
//! The repository is opened per call; `git2::Repository` is not `Sync`, and
//! opening is cheap next to the object writes that follow. Commits are built
//! without touching any working tree:
//!
//! 1. resolve the branch head and its tree,
//! 2. check every expected blob sha against that tree,
//! 3. write blobs and an updated tree with `TreeUpdateBuilder`,
//! 4. create a dangling commit on top of the head,
//! 5. move the branch with a compare-and-swap ref update.
//!
//! A concurrent writer that moves the branch between steps 1 and 5 makes
//! step 5 fail, which surfaces as [`ForgeError::Conflict`].
//!
//! There are no pull requests; the editorial workflow is unavailable on this
//! backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{BranchType, ErrorCode, FileMode, ObjectType, Oid, Signature, TreeWalkMode, TreeWalkResult};

use super::traits::{
    ApiError, Backend, Capabilities, FileChange, FileWrite, ForgeError, TreeCommit, WriteReceipt,
};
use crate::core::paths;
use crate::core::types::{Author, BranchRef, Commit, EntryKind, Repository, TreeEntry};

/// Committer used when the repository has no `user.name`/`user.email`.
const FALLBACK_NAME: &str = "contentforge";
const FALLBACK_EMAIL: &str = "contentforge@localhost";

/// Local Git backend.
#[derive(Debug, Clone)]
pub struct LocalGitBackend {
    path: PathBuf,
    repo: Repository,
}

impl LocalGitBackend {
    /// Create a backend for the repository at `path` (bare or not).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `path` is not a Git repository.
    pub fn open(path: impl AsRef<Path>, repo: Repository) -> Result<Self, ForgeError> {
        let path = path.as_ref().to_path_buf();
        git2::Repository::open(&path).map_err(|e| git_error(e, &path.display().to_string()))?;
        Ok(Self { path, repo })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_repo(&self) -> Result<git2::Repository, ForgeError> {
        git2::Repository::open(&self.path).map_err(|e| git_error(e, &self.path.display().to_string()))
    }

    fn signature(repo: &git2::Repository) -> Result<Signature<'static>, ForgeError> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now(FALLBACK_NAME, FALLBACK_EMAIL).map_err(|e| git_error(e, "signature")),
        }
    }

    fn branch_commit<'r>(
        repo: &'r git2::Repository,
        branch: &str,
    ) -> Result<git2::Commit<'r>, ForgeError> {
        let reference = repo
            .find_branch(branch, BranchType::Local)
            .map_err(|e| git_error(e, branch))?;
        reference
            .get()
            .peel_to_commit()
            .map_err(|e| git_error(e, branch))
    }

    /// Blob id at `path` in `tree`, `None` if absent.
    fn blob_at(tree: &git2::Tree<'_>, path: &str) -> Option<Oid> {
        tree.get_path(Path::new(path))
            .ok()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .map(|entry| entry.id())
    }

    fn check_expected(tree: &git2::Tree<'_>, change: &FileChange) -> Result<(), ForgeError> {
        let path = paths::normalize(&change.path);
        let current = Self::blob_at(tree, &path).map(|oid| oid.to_string());
        match (&change.expected_sha, &current) {
            (Some(expected), current) if Some(expected) != current.as_ref() => Err(
                super::sha_mismatch("git", &path, expected, current.as_deref()),
            ),
            (None, Some(_)) => Err(ForgeError::Conflict(
                ApiError::new("git", 409, format!("'{}' already exists", path)).with_path(path),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for LocalGitBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_atomic_commit: true,
            supports_pull_requests: false,
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
        let repo = self.open_repo()?;
        let base = paths::normalize(path);
        let root = Self::branch_commit(&repo, branch)?
            .tree()
            .map_err(|e| git_error(e, branch))?;
        let tree = if base.is_empty() {
            root
        } else {
            let entry = root
                .get_path(Path::new(&base))
                .map_err(|e| git_error(e, &base))?;
            entry
                .to_object(&repo)
                .and_then(|o| o.peel_to_tree())
                .map_err(|e| git_error(e, &base))?
        };

        let size_of = |oid: Oid| repo.find_blob(oid).ok().map(|b| b.size() as u64);
        let mut entries = Vec::new();
        if depth <= 1 {
            for entry in tree.iter() {
                let Some(name) = entry.name() else { continue };
                let kind = match entry.kind() {
                    Some(ObjectType::Blob) => EntryKind::Blob,
                    Some(ObjectType::Tree) => EntryKind::Tree,
                    _ => continue,
                };
                let size = (kind == EntryKind::Blob).then(|| size_of(entry.id())).flatten();
                entries.push(
                    TreeEntry::new(paths::join(&base, name), kind, entry.id().to_string())
                        .with_size(size),
                );
            }
        } else {
            tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                let Some(name) = entry.name() else {
                    return TreeWalkResult::Ok;
                };
                let kind = match entry.kind() {
                    Some(ObjectType::Blob) => EntryKind::Blob,
                    Some(ObjectType::Tree) => EntryKind::Tree,
                    _ => return TreeWalkResult::Ok,
                };
                let size = (kind == EntryKind::Blob).then(|| size_of(entry.id())).flatten();
                let relative = format!("{}{}", root, name);
                entries.push(
                    TreeEntry::new(paths::join(&base, &relative), kind, entry.id().to_string())
                        .with_size(size),
                );
                TreeWalkResult::Ok
            })
            .map_err(|e| git_error(e, &base))?;
        }
        Ok(entries)
    }

    async fn read_file(&self, branch: &str, path: &str) -> Result<Vec<u8>, ForgeError> {
        let repo = self.open_repo()?;
        let path = paths::normalize(path);
        let tree = Self::branch_commit(&repo, branch)?
            .tree()
            .map_err(|e| git_error(e, branch))?;
        let oid = Self::blob_at(&tree, &path).ok_or_else(|| {
            ForgeError::NotFound(ApiError::new("git", 404, format!("'{}' not found", path)).with_path(path.clone()))
        })?;
        let blob = repo.find_blob(oid).map_err(|e| git_error(e, &path))?;
        Ok(blob.content().to_vec())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<BranchRef>, ForgeError> {
        let repo = self.open_repo()?;
        let head = match Self::branch_commit(&repo, name) {
            Ok(commit) => commit.id(),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(BranchRef {
            name: name.to_string(),
            head_sha: head.to_string(),
        }))
    }

    async fn create_branch(&self, name: &str, from_sha: &str) -> Result<BranchRef, ForgeError> {
        let repo = self.open_repo()?;
        let oid = Oid::from_str(from_sha).map_err(|e| git_error(e, from_sha))?;
        let commit = repo.find_commit(oid).map_err(|e| git_error(e, from_sha))?;
        repo.branch(name, &commit, false)
            .map_err(|e| git_error(e, name))?;
        tracing::info!(branch = name, sha = from_sha, "created branch");
        Ok(BranchRef {
            name: name.to_string(),
            head_sha: from_sha.to_string(),
        })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), ForgeError> {
        let repo = self.open_repo()?;
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .map_err(|e| git_error(e, name))?;
        branch.delete().map_err(|e| git_error(e, name))
    }

    async fn write_file(&self, write: FileWrite) -> Result<WriteReceipt, ForgeError> {
        self.commit_files(TreeCommit {
            branch: write.branch,
            message: write.message,
            changes: vec![FileChange {
                path: write.path,
                content: write.content,
                expected_sha: write.sha,
            }],
        })
        .await
    }

    async fn commit_files(&self, commit: TreeCommit) -> Result<WriteReceipt, ForgeError> {
        let repo = self.open_repo()?;
        let head = Self::branch_commit(&repo, &commit.branch)?;
        let head_tree = head.tree().map_err(|e| git_error(e, &commit.branch))?;

        for change in &commit.changes {
            Self::check_expected(&head_tree, change)?;
        }

        let mut builder = git2::build::TreeUpdateBuilder::new();
        let mut blobs = BTreeMap::new();
        for change in &commit.changes {
            let path = paths::normalize(&change.path);
            let oid = repo.blob(&change.content).map_err(|e| git_error(e, &path))?;
            builder.upsert(path.as_str(), oid, FileMode::Blob);
            blobs.insert(path, oid.to_string());
        }
        let tree_oid = builder
            .create_updated(&repo, &head_tree)
            .map_err(|e| git_error(e, &commit.branch))?;
        let tree = repo.find_tree(tree_oid).map_err(|e| git_error(e, &commit.branch))?;

        let signature = Self::signature(&repo)?;
        let new_oid = repo
            .commit(None, &signature, &signature, &commit.message, &tree, &[&head])
            .map_err(|e| git_error(e, &commit.branch))?;

        let refname = format!("refs/heads/{}", commit.branch);
        repo.reference_matching(&refname, new_oid, true, head.id(), &commit.message)
            .map_err(|e| match e.code() {
                ErrorCode::Modified | ErrorCode::Locked => ForgeError::Conflict(
                    ApiError::new("git", 409, format!("{} moved during commit", refname))
                        .with_path(refname.clone()),
                ),
                _ => git_error(e, &refname),
            })?;

        tracing::info!(branch = %commit.branch, sha = %new_oid, files = blobs.len(), "committed tree");
        Ok(WriteReceipt {
            commit: Commit {
                sha: new_oid.to_string(),
                message: commit.message,
                parent_sha: Some(head.id().to_string()),
                author: Some(Author {
                    name: signature.name().unwrap_or(FALLBACK_NAME).to_string(),
                    email: signature.email().unwrap_or(FALLBACK_EMAIL).to_string(),
                    date: chrono::DateTime::from_timestamp(signature.when().seconds(), 0),
                }),
            },
            blobs,
        })
    }
}

/// Map a libgit2 error onto the provider error taxonomy.
fn git_error(err: git2::Error, path: &str) -> ForgeError {
    let api = ApiError::new("git", 0, err.message().to_string()).with_path(path);
    match err.code() {
        ErrorCode::NotFound => ForgeError::NotFound(ApiError { status: 404, ..api }),
        ErrorCode::Exists | ErrorCode::Modified | ErrorCode::Locked => {
            ForgeError::Conflict(ApiError { status: 409, ..api })
        }
        ErrorCode::InvalidSpec => ForgeError::Validation {
            api: "git".to_string(),
            message: format!("{}: {}", path, err.message()),
        },
        _ => ForgeError::Api(ApiError { status: 500, ..api }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = git_error(
            git2::Error::new(ErrorCode::NotFound, git2::ErrorClass::Reference, "no ref"),
            "refs/heads/x",
        );
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn exists_maps_to_conflict() {
        let err = git_error(
            git2::Error::new(ErrorCode::Exists, git2::ErrorClass::Reference, "exists"),
            "refs/heads/x",
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn open_rejects_non_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = LocalGitBackend::open(dir.path(), Repository::new("local", "site", "master"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
