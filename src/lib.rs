//! contentforge - a content repository layer over Git hosting providers
//!
//! contentforge lets a CMS treat a Git repository on GitHub, GitLab, Gitea or
//! the local filesystem as its content store: list entries, write them back
//! under optimistic concurrency, and run them through an editorial review
//! workflow built on branches and pull requests.
//!
//! # Architecture
//!
//! - [`forge`] - Provider client and the `Backend` trait, one variant per provider
//! - [`tree`] - Depth-limited, per-operation cached directory listings
//! - [`persist`] - Writing entry files with sha preconditions, atomic or sequential
//! - [`workflow`] - Editorial states and their branch/PR side effects
//! - [`auth`] - Credential providers and auth header schemes
//! - [`core`] - Domain types, paths, configuration and sessions
//! - [`cli`] - The `cforge` command-line front end
//!
//! # Correctness Invariants
//!
//! 1. A write whose expected sha no longer matches the provider is rejected,
//!    never merged
//! 2. Branch heads only move forward; ref updates are never forced
//! 3. Partial failures report exactly what was committed

pub mod auth;
pub mod cli;
pub mod core;
pub mod forge;
pub mod persist;
pub mod tree;
pub mod workflow;
