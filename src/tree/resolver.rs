//! tree::resolver
//!
//! Depth-limited file listings over a backend.
//!
//! # Design
//!
//! A [`TreeResolver`] lives for one logical operation (one persist, one
//! listing command). Listings are cached per `(branch, base)` pair together
//! with the depth they were fetched at:
//!
//! - a later request of equal or smaller depth is answered from the cache
//! - a deeper request refetches and replaces the cached listing
//! - a 404 for the directory is cached as an empty listing
//!
//! Results contain blobs only, sorted by path, each at most `depth` segments
//! below the base.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use contentforge::core::types::Repository;
//! use contentforge::forge::mock::MockBackend;
//! use contentforge::tree::TreeResolver;
//!
//! # tokio_test::block_on(async {
//! let backend = MockBackend::new(Repository::new("owner", "repo", "master"))
//!     .with_file("master", "content/posts/a.md", "a");
//! let mut resolver = TreeResolver::new(Arc::new(backend));
//!
//! let files = resolver.list_files("master", "content/posts", 1).await.unwrap();
//! assert_eq!(files[0].name, "a.md");
//!
//! // Served from the cache.
//! resolver.list_files("master", "content/posts", 1).await.unwrap();
//! assert_eq!(resolver.requests_issued(), 1);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::paths;
use crate::core::types::TreeEntry;
use crate::forge::{Backend, ForgeError};

#[derive(Debug, Clone)]
struct Listing {
    depth: u32,
    entries: Vec<TreeEntry>,
}

/// Per-operation tree cache.
pub struct TreeResolver {
    backend: Arc<dyn Backend>,
    cache: HashMap<(String, String), Listing>,
    requests: usize,
}

impl TreeResolver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
            requests: 0,
        }
    }

    /// Blobs under `base` at most `depth` segments deep, ordered by path.
    ///
    /// A depth of 0 is treated as 1.
    ///
    /// # Errors
    ///
    /// Any backend error other than `NotFound`.
    pub async fn list_files(
        &mut self,
        branch: &str,
        base: &str,
        depth: u32,
    ) -> Result<Vec<TreeEntry>, ForgeError> {
        let depth = depth.max(1);
        let base = paths::normalize(base);
        let key = (branch.to_string(), base.clone());

        let cached = self.cache.get(&key).filter(|listing| listing.depth >= depth);
        let entries = match cached {
            Some(listing) => {
                tracing::trace!(branch, base = %base, depth, "tree cache hit");
                listing.entries.clone()
            }
            None => {
                let listing = self.fetch(branch, &base, depth).await?;
                let entries = listing.entries.clone();
                self.cache.insert(key, listing);
                entries
            }
        };

        let mut files: Vec<TreeEntry> = entries
            .into_iter()
            .filter(|entry| entry.is_blob())
            .filter(|entry| {
                paths::depth_below(&base, &entry.path)
                    .is_some_and(|d| d <= depth as usize)
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Current blob sha of `path`, from its directory's depth-1 listing.
    pub async fn resolve_sha(
        &mut self,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, ForgeError> {
        let path = paths::normalize(path);
        let dir = paths::parent_dir(&path);
        let files = self.list_files(branch, &dir, 1).await?;
        Ok(files.into_iter().find(|e| e.path == path).map(|e| e.sha))
    }

    /// Number of listings fetched from the backend so far.
    pub fn requests_issued(&self) -> usize {
        self.requests
    }

    async fn fetch(&mut self, branch: &str, base: &str, depth: u32) -> Result<Listing, ForgeError> {
        self.requests += 1;
        tracing::debug!(
            backend = self.backend.name(),
            branch,
            base,
            depth,
            "listing tree"
        );
        match self.backend.list_tree(branch, base, depth).await {
            Ok(entries) => Ok(Listing {
                depth,
                entries: entries
                    .into_iter()
                    .map(|mut e| {
                        e.path = paths::normalize(&e.path);
                        e.name = paths::file_name(&e.path).to_string();
                        e
                    })
                    .collect(),
            }),
            Err(e) if e.is_not_found() => Ok(Listing {
                depth: u32::MAX,
                entries: Vec::new(),
            }),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TreeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeResolver")
            .field("backend", &self.backend.name())
            .field("cached", &self.cache.len())
            .field("requests", &self.requests)
            .finish()
    }
}
