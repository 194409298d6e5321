//! core
//!
//! Core domain types, configuration and session plumbing.
//!
//! # Modules
//!
//! - [`types`] - Data model: Repository, BranchRef, TreeEntry, DataFile, Asset, Commit
//! - [`paths`] - Root-relative repository path helpers
//! - [`naming`] - Workflow branch naming rules
//! - [`cancel`] - Cooperative cancellation token
//! - [`session`] - Caller-owned credentials, timeout and retry policy
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid branch names and repository identities
//! - Paths are normalized once, at the edges
//! - No process-wide state: sessions are passed in explicitly

pub mod cancel;
pub mod config;
pub mod naming;
pub mod paths;
pub mod session;
pub mod types;
