//! core::types
//!
//! Strong types for the content-repository data model.
//!
//! # Types
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Repository`] - Identity of the remote content store
//! - [`BranchRef`] - Branch name plus head commit
//! - [`TreeEntry`] - One node of a tree snapshot
//! - [`DataFile`] / [`Asset`] - Pending text and binary writes
//! - [`Commit`] - Commit metadata reported back by a provider
//!
//! # Validation
//!
//! Names that end up inside ref paths are validated at construction time so
//! an invalid workflow branch can never be sent to a provider.
//!
//! # Examples
//!
//! ```
//! use contentforge::core::types::{BranchName, Repository};
//!
//! let branch = BranchName::new("cms/posts/hello-world").unwrap();
//! assert_eq!(branch.as_str(), "cms/posts/hello-world");
//! assert!(BranchName::new("invalid..name").is_err());
//!
//! let repo = Repository::parse("owner/site", "master").unwrap();
//! assert_eq!(repo.full_name(), "owner/site");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid repository '{0}', expected 'owner/name'")]
    InvalidRepository(String),
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see `git check-ref-format`):
/// - Cannot be empty
/// - Cannot start with `.` or `-`
/// - Cannot end with `.lock` or `/`
/// - Cannot contain `..`, `@{`, `//`, or ASCII control characters
/// - Cannot contain spaces, `~`, `^`, `:`, `\`, `?`, `*`, `[`
/// - Cannot be exactly `@`
///
/// # Example
///
/// ```
/// use contentforge::core::types::BranchName;
///
/// let name = BranchName::new("cms/posts/my-post").unwrap();
/// assert_eq!(name.as_str(), "cms/posts/my-post");
///
/// assert!(BranchName::new("").is_err());
/// assert!(BranchName::new(".hidden").is_err());
/// assert!(BranchName::new("branch.lock").is_err());
/// assert!(BranchName::new("has space").is_err());
/// assert!(BranchName::new("@").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be empty".into(),
            ));
        }

        if name == "@" {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot be '@' (reserved)".into(),
            ));
        }

        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(format!(
                "branch name cannot start with '{}'",
                &name[..1]
            )));
        }

        if name.ends_with(".lock") {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot end with '.lock'".into(),
            ));
        }
        if name.ends_with('/') {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot end with '/'".into(),
            ));
        }

        for sequence in ["..", "@{", "//"] {
            if name.contains(sequence) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{sequence}'"
                )));
            }
        }

        const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
        for c in INVALID_CHARS {
            if name.contains(c) {
                return Err(TypeError::InvalidBranchName(format!(
                    "branch name cannot contain '{c}'"
                )));
            }
        }

        if name.chars().any(|c| c.is_ascii_control()) {
            return Err(TypeError::InvalidBranchName(
                "branch name cannot contain control characters".into(),
            ));
        }

        for component in name.split('/').filter(|c| !c.is_empty()) {
            if component.starts_with('.') {
                return Err(TypeError::InvalidBranchName(
                    "path component cannot start with '.'".into(),
                ));
            }
            if component.ends_with(".lock") {
                return Err(TypeError::InvalidBranchName(
                    "path component cannot end with '.lock'".into(),
                ));
            }
        }

        Ok(())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the remote content store. Immutable for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// User, organization, or (GitLab) group path such as `group/subgroup`
    pub owner: String,
    /// Repository or project name
    pub name: String,
    /// Branch content is published to
    pub default_branch: String,
}

impl Repository {
    /// Create a repository identity from its parts.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            default_branch: default_branch.into(),
        }
    }

    /// Parse an `owner/name` string.
    ///
    /// The split happens at the last `/` so nested GitLab groups stay in
    /// `owner`.
    ///
    /// ```
    /// use contentforge::core::types::Repository;
    ///
    /// let repo = Repository::parse("group/sub/site", "main").unwrap();
    /// assert_eq!(repo.owner, "group/sub");
    /// assert_eq!(repo.name, "site");
    /// assert!(Repository::parse("no-slash", "main").is_err());
    /// ```
    pub fn parse(full_name: &str, default_branch: &str) -> Result<Self, TypeError> {
        let trimmed = full_name.trim().trim_matches('/');
        let (owner, name) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| TypeError::InvalidRepository(full_name.to_string()))?;
        if owner.is_empty() || name.is_empty() || owner.split('/').any(str::is_empty) {
            return Err(TypeError::InvalidRepository(full_name.to_string()));
        }
        Ok(Self::new(owner, name, default_branch))
    }

    /// `owner/name` form used in REST paths.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A branch and the commit it currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub head_sha: String,
}

/// Kind of a tree snapshot node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Blob => write!(f, "blob"),
            EntryKind::Tree => write!(f, "tree"),
        }
    }
}

/// One node of a tree snapshot.
///
/// `path` is relative to the repository root and unique within one snapshot.
/// `sha` is the content-addressed identity used as an optimistic-concurrency
/// token: it changes if and only if the content changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl TreeEntry {
    /// Build an entry, deriving `name` from the final path segment.
    pub fn new(path: impl Into<String>, kind: EntryKind, sha: impl Into<String>) -> Self {
        let path = path.into();
        let name = crate::core::paths::file_name(&path).to_string();
        Self {
            path,
            name,
            kind,
            sha: sha.into(),
            size: None,
        }
    }

    /// Attach a size.
    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn is_blob(&self) -> bool {
        self.kind == EntryKind::Blob
    }
}

/// A pending text write belonging to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: String,
    pub slug: String,
    pub raw: String,
    /// Sha observed before editing; `None` for files that did not exist.
    pub base_sha: Option<String>,
}

impl DataFile {
    pub fn new(path: impl Into<String>, slug: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            slug: slug.into(),
            raw: raw.into(),
            base_sha: None,
        }
    }

    pub fn with_base_sha(mut self, sha: impl Into<String>) -> Self {
        self.base_sha = Some(sha.into());
        self
    }
}

/// Binary counterpart of [`DataFile`], same write contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub path: String,
    pub content: Vec<u8>,
    pub base_sha: Option<String>,
}

impl Asset {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            base_sha: None,
        }
    }

    pub fn with_base_sha(mut self, sha: impl Into<String>) -> Self {
        self.base_sha = Some(sha.into());
        self
    }
}

/// Commit author or committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// Commit metadata reported by a provider after a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    /// Exactly one parent on the linear-write path.
    pub parent_sha: Option<String>,
    pub author: Option<Author>,
}

impl Commit {
    /// A commit known only by its sha.
    pub fn from_sha(sha: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            message: String::new(),
            parent_sha: None,
            author: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod branch_name {
        use super::*;

        #[test]
        fn accepts_workflow_branches() {
            assert!(BranchName::new("cms/posts/hello").is_ok());
            assert!(BranchName::new("master").is_ok());
            assert!(BranchName::new("user@feature").is_ok());
        }

        #[test]
        fn rejects_invalid_sequences() {
            assert!(BranchName::new("a..b").is_err());
            assert!(BranchName::new("a//b").is_err());
            assert!(BranchName::new("a@{b").is_err());
            assert!(BranchName::new("-leading").is_err());
            assert!(BranchName::new("cms/.hidden/x").is_err());
            assert!(BranchName::new("cms/x.lock/y").is_err());
        }

        #[test]
        fn rejects_special_chars() {
            for bad in ["a b", "a~b", "a^b", "a:b", "a\\b", "a?b", "a*b", "a[b", "a\tb"] {
                assert!(BranchName::new(bad).is_err(), "{bad} should be rejected");
            }
        }

        #[test]
        fn serde_validates() {
            let ok: Result<BranchName, _> = serde_json::from_str("\"main\"");
            assert!(ok.is_ok());
            let bad: Result<BranchName, _> = serde_json::from_str("\"bad name\"");
            assert!(bad.is_err());
        }
    }

    mod repository {
        use super::*;

        #[test]
        fn parse_simple() {
            let repo = Repository::parse("owner/repo", "master").unwrap();
            assert_eq!(repo.owner, "owner");
            assert_eq!(repo.name, "repo");
            assert_eq!(repo.default_branch, "master");
            assert_eq!(repo.full_name(), "owner/repo");
        }

        #[test]
        fn parse_trims_slashes() {
            let repo = Repository::parse("/owner/repo/", "main").unwrap();
            assert_eq!(repo.full_name(), "owner/repo");
        }

        #[test]
        fn parse_rejects_malformed() {
            assert!(Repository::parse("", "main").is_err());
            assert!(Repository::parse("owner", "main").is_err());
            assert!(Repository::parse("owner/", "main").is_err());
            assert!(Repository::parse("a//b", "main").is_err());
        }
    }

    #[test]
    fn tree_entry_derives_name() {
        let entry = TreeEntry::new("content/posts/a.md", EntryKind::Blob, "abc");
        assert_eq!(entry.name, "a.md");
        assert!(entry.is_blob());
    }

    #[test]
    fn tree_entry_serializes_type_field() {
        let entry = TreeEntry::new("a.md", EntryKind::Blob, "abc").with_size(Some(3));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "blob");
        assert_eq!(json["size"], 3);
    }
}
