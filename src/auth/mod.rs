//! auth - Credential providers for provider clients
//!
//! The authentication window itself lives outside this crate. What the
//! provider client needs is a bearer credential at the moment it builds each
//! request, so that a refreshed token is picked up by the very next call.
//!
//! # Components
//!
//! - [`TokenProvider`] - Trait for handing bearer credentials to provider clients
//! - [`StaticToken`] - A fixed token from configuration
//! - [`ChannelTokenProvider`] - Request/response over a channel, answered by
//!   whatever owns the interactive auth flow
//! - [`AuthScheme`] - How the credential is placed into `Authorization`
//!
//! # Security
//!
//! Tokens never appear in `Debug` output or error messages.
//!
//! # Example
//!
//! ```
//! use contentforge::auth::{StaticToken, TokenProvider};
//!
//! # tokio_test::block_on(async {
//! let provider = StaticToken::new("secret");
//! assert_eq!(provider.bearer_token().await.unwrap(), "secret");
//! assert!(!format!("{:?}", provider).contains("secret"));
//! # });
//! ```

mod channel;
mod errors;

pub use channel::{ChannelTokenProvider, TokenRequest, TokenRequests};
pub use errors::AuthError;

/// Trait for providing bearer credentials to provider clients.
///
/// Implementations may resolve synchronously (a configured token) or
/// asynchronously (refresh, or a round trip to an auth window). The provider
/// client calls [`bearer_token`](TokenProvider::bearer_token) once per
/// request attempt.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the credential to use for the next request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if no credential exists
    /// - [`AuthError::Denied`] if the auth flow was refused
    /// - [`AuthError::ProviderClosed`] if the credential source went away
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

/// A fixed credential taken from configuration.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            Err(AuthError::NotAuthenticated("static token is empty".into()))
        } else {
            Ok(self.token.clone())
        }
    }
}

/// A provider with no credential, for backends that do not authenticate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait::async_trait]
impl TokenProvider for Anonymous {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(String::new())
    }
}

/// How a credential is rendered into the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: token <credential>` (GitHub, Gitea)
    Token,
    /// `Authorization: Bearer <credential>` (GitLab, OAuth tokens)
    Bearer,
}

impl AuthScheme {
    /// Render the header value for a credential.
    ///
    /// ```
    /// use contentforge::auth::AuthScheme;
    ///
    /// assert_eq!(AuthScheme::Token.header_value("abc"), "token abc");
    /// assert_eq!(AuthScheme::Bearer.header_value("abc"), "Bearer abc");
    /// ```
    pub fn header_value(&self, credential: &str) -> String {
        match self {
            AuthScheme::Token => format!("token {credential}"),
            AuthScheme::Bearer => format!("Bearer {credential}"),
        }
    }
}
