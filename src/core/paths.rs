//! core::paths
//!
//! Repository path helpers.
//!
//! Provider APIs disagree on leading slashes, trailing slashes and whether a
//! listing returns paths relative to the listed directory or to the root.
//! Everything inside the crate uses normalized root-relative paths: no
//! leading or trailing `/`, no empty segments.

/// Normalize a repository path.
///
/// ```
/// use contentforge::core::paths::normalize;
///
/// assert_eq!(normalize("/content//posts/"), "content/posts");
/// assert_eq!(normalize("./content/posts"), "content/posts");
/// assert_eq!(normalize("/"), "");
/// ```
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a directory and a relative path.
pub fn join(dir: &str, rest: &str) -> String {
    let dir = normalize(dir);
    let rest = normalize(rest);
    match (dir.is_empty(), rest.is_empty()) {
        (true, _) => rest,
        (_, true) => dir,
        _ => format!("{dir}/{rest}"),
    }
}

/// Containing directory of a path (`""` for top-level files).
///
/// ```
/// use contentforge::core::paths::parent_dir;
///
/// assert_eq!(parent_dir("content/posts/a.md"), "content/posts");
/// assert_eq!(parent_dir("README.md"), "");
/// ```
pub fn parent_dir(path: &str) -> String {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Final path segment.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Path of `path` relative to `base`, or `None` when it lies outside `base`.
///
/// ```
/// use contentforge::core::paths::relative_to;
///
/// assert_eq!(relative_to("content", "content/posts/a.md").as_deref(), Some("posts/a.md"));
/// assert_eq!(relative_to("content", "contents/a.md"), None);
/// assert_eq!(relative_to("", "a.md").as_deref(), Some("a.md"));
/// ```
pub fn relative_to(base: &str, path: &str) -> Option<String> {
    let base = normalize(base);
    let path = normalize(path);
    if base.is_empty() {
        return Some(path);
    }
    path.strip_prefix(&base)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Number of segments of `path` below `base` (direct children are depth 1).
pub fn depth_below(base: &str, path: &str) -> Option<usize> {
    relative_to(base, path).map(|rest| rest.split('/').count())
}

/// Percent-encode each segment while keeping `/` separators.
///
/// ```
/// use contentforge::core::paths::encode_segments;
///
/// assert_eq!(encode_segments("content/my post.md"), "content/my%20post.md");
/// ```
pub fn encode_segments(path: &str) -> String {
    normalize(path)
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("a"), "a");
    }

    #[test]
    fn join_cases() {
        assert_eq!(join("", "a.md"), "a.md");
        assert_eq!(join("content/", "/a.md"), "content/a.md");
        assert_eq!(join("content", ""), "content");
    }

    #[test]
    fn file_name_cases() {
        assert_eq!(file_name("a/b/c.md"), "c.md");
        assert_eq!(file_name("c.md"), "c.md");
        assert_eq!(file_name("a/b/"), "b");
    }

    #[test]
    fn relative_to_rejects_self() {
        assert_eq!(relative_to("content", "content"), None);
    }

    #[test]
    fn depth_below_counts_segments() {
        assert_eq!(depth_below("content", "content/a.md"), Some(1));
        assert_eq!(depth_below("content", "content/posts/a.md"), Some(2));
        assert_eq!(depth_below("", "content/posts/a.md"), Some(3));
        assert_eq!(depth_below("other", "content/a.md"), None);
    }

    #[test]
    fn encode_segments_keeps_separators() {
        assert_eq!(encode_segments("/a b/c#d"), "a%20b/c%23d");
    }
}
