//! tree
//!
//! Directory listings with per-operation caching.
//!
//! # Modules
//!
//! - [`resolver`]: [`TreeResolver`], depth-limited blob listings and sha lookup

pub mod resolver;

pub use resolver::TreeResolver;
