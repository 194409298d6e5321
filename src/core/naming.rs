//! core::naming
//!
//! Workflow branch naming.
//!
//! Every entry under editorial workflow lives on its own branch whose name is
//! derived deterministically from the collection and slug, so the same entry
//! always maps back to the same branch and pull request.

use super::types::{BranchName, TypeError};

/// Default prefix for workflow branches.
pub const DEFAULT_BRANCH_PREFIX: &str = "cms";

/// Turn an arbitrary string into a segment that is safe inside a ref name.
///
/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `-`.
/// Runs of `-` collapse and leading/trailing `-`/`.` are stripped.
///
/// # Example
///
/// ```
/// use contentforge::core::naming::sanitize_segment;
///
/// assert_eq!(sanitize_segment("Hello World"), "Hello-World");
/// assert_eq!(sanitize_segment("2024/01/post"), "2024-01-post");
/// assert_eq!(sanitize_segment("..x.."), "x");
/// ```
pub fn sanitize_segment(input: &str) -> String {
    let mapped: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let collapsed = mapped
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    // Stripping one suffix can expose another, so repeat until stable.
    let mut segment = collapsed;
    loop {
        let before = segment.len();
        while segment.contains("..") {
            segment = segment.replace("..", ".");
        }
        segment = segment.trim_matches(|c| c == '-' || c == '.').to_string();
        if let Some(stripped) = segment.strip_suffix(".lock") {
            segment = stripped.to_string();
        }
        if segment.len() == before {
            return segment;
        }
    }
}

/// Derive the workflow branch for an entry: `{prefix}/{collection}/{slug}`.
///
/// # Errors
///
/// Returns `TypeError::InvalidBranchName` if a component sanitizes to nothing.
///
/// # Example
///
/// ```
/// use contentforge::core::naming::workflow_branch;
///
/// let branch = workflow_branch("cms", "posts", "my first post").unwrap();
/// assert_eq!(branch.as_str(), "cms/posts/my-first-post");
/// ```
pub fn workflow_branch(prefix: &str, collection: &str, slug: &str) -> Result<BranchName, TypeError> {
    let parts = [prefix, collection, slug].map(sanitize_segment);
    if let Some(empty) = [prefix, collection, slug]
        .iter()
        .zip(parts.iter())
        .find(|(_, sanitized)| sanitized.is_empty())
    {
        return Err(TypeError::InvalidBranchName(format!(
            "'{}' has no characters usable in a branch name",
            empty.0
        )));
    }
    BranchName::new(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_valid() {
        assert_eq!(sanitize_segment("my-post_1.md"), "my-post_1.md");
    }

    #[test]
    fn sanitize_replaces_invalid() {
        assert_eq!(sanitize_segment("a:b?c"), "a-b-c");
        assert_eq!(sanitize_segment("  spaced  "), "spaced");
    }

    #[test]
    fn sanitize_strips_lock_suffix() {
        assert_eq!(sanitize_segment("entry.lock"), "entry");
    }

    #[test]
    fn workflow_branch_is_deterministic() {
        let a = workflow_branch("cms", "posts", "hello").unwrap();
        let b = workflow_branch("cms", "posts", "hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "cms/posts/hello");
    }

    #[test]
    fn workflow_branch_flattens_nested_slugs() {
        let branch = workflow_branch("cms", "posts", "2024/01/hello").unwrap();
        assert_eq!(branch.as_str(), "cms/posts/2024-01-hello");
    }

    #[test]
    fn workflow_branch_rejects_empty_components() {
        assert!(workflow_branch("cms", "posts", "???").is_err());
        assert!(workflow_branch("", "posts", "a").is_err());
    }
}
