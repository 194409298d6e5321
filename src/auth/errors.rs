//! auth::errors
//!
//! Credential error types.
//!
//! # Design
//!
//! Error messages MUST NOT contain tokens. Variants carry the provider or a
//! human explanation only.
//!
//! # Example
//!
//! ```
//! use contentforge::auth::AuthError;
//!
//! let err = AuthError::NotAuthenticated("gitea".to_string());
//! assert!(err.to_string().contains("gitea"));
//! ```

use thiserror::Error;

/// Errors from credential resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential is configured for the provider.
    #[error("not authenticated with '{0}'")]
    NotAuthenticated(String),

    /// The user or the auth window refused to hand out a credential.
    #[error("authentication denied: {0}")]
    Denied(String),

    /// The party answering credential requests went away.
    #[error("credential provider is no longer available")]
    ProviderClosed,

    /// Credential resolution failed for another reason (e.g. refresh error).
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}
