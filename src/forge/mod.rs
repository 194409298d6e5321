//! forge
//!
//! Content repositories on Git hosting providers.
//!
//! # Architecture
//!
//! The [`Backend`] trait is the provider client surface: tree listings, file
//! reads and writes, branches and pull requests for one repository. The tree
//! resolver, persist engine and editorial workflow only see `dyn Backend`,
//! built through [`create_backend`].
//!
//! Providers differ in what they can do; [`Capabilities`] says whether a
//! backend commits several files atomically and whether it has pull requests.
//!
//! # Modules
//!
//! - `traits`: the `Backend` trait, errors and request/response types
//! - [`transport`]: authenticated JSON-over-HTTP with retry and pagination
//! - [`github`], [`gitlab`], [`gitea`]: hosted providers
//! - [`local`]: a repository on disk via libgit2
//! - [`mock`]: in-memory backend for deterministic testing
//! - `factory`: provider selection and creation

mod factory;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod local;
pub mod mock;
mod traits;
pub mod transport;

pub use factory::{create_backend, valid_provider_names, BackendProvider};
pub use traits::*;

/// Conflict for a write whose expected sha is no longer current.
pub(crate) fn sha_mismatch(
    api: &str,
    path: &str,
    expected: &str,
    current: Option<&str>,
) -> ForgeError {
    let message = match current {
        Some(current) => format!(
            "{} has changed: expected sha {}, found {}",
            path, expected, current
        ),
        None => format!("{} has changed: expected sha {}, file is gone", path, expected),
    };
    ForgeError::Conflict(ApiError::new(api, 409, message).with_path(path))
}
