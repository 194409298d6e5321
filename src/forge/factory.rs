//! forge::factory
//!
//! Backend selection and creation.
//!
//! # Design
//!
//! Callers build backends through [`create_backend`] rather than naming a
//! provider type, so the editorial and persist layers only ever see
//! `Arc<dyn Backend>`.
//!
//! # Example
//!
//! ```
//! use contentforge::core::config::schema::BackendConfig;
//! use contentforge::core::session::Session;
//! use contentforge::auth::Anonymous;
//! use contentforge::forge::create_backend;
//! use std::sync::Arc;
//!
//! let config = BackendConfig::new("gitea", "owner/site")
//!     .with_api_root("https://gitea.example.com/api/v1");
//! let backend = create_backend(&config, Session::new(Arc::new(Anonymous))).unwrap();
//! assert_eq!(backend.name(), "gitea");
//! ```

use std::sync::Arc;

use super::gitea::GiteaBackend;
use super::github::{self, GitHubBackend};
use super::gitlab::{self, GitLabBackend};
use super::local::LocalGitBackend;
use super::traits::{Backend, ForgeError};
use crate::core::config::schema::BackendConfig;
use crate::core::session::Session;

/// Supported backend providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProvider {
    GitHub,
    GitLab,
    Gitea,
    /// A repository on the local filesystem.
    Git,
}

impl BackendProvider {
    /// Get all available providers.
    ///
    /// ```
    /// use contentforge::forge::BackendProvider;
    ///
    /// assert!(BackendProvider::all().contains(&BackendProvider::Gitea));
    /// ```
    pub fn all() -> &'static [BackendProvider] {
        &[
            BackendProvider::GitHub,
            BackendProvider::GitLab,
            BackendProvider::Gitea,
            BackendProvider::Git,
        ]
    }

    /// The name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            BackendProvider::GitHub => "github",
            BackendProvider::GitLab => "gitlab",
            BackendProvider::Gitea => "gitea",
            BackendProvider::Git => "git",
        }
    }

    /// Parse a provider from a string, case-insensitively.
    ///
    /// ```
    /// use contentforge::forge::BackendProvider;
    ///
    /// assert_eq!(BackendProvider::parse("Gitea"), Some(BackendProvider::Gitea));
    /// assert_eq!(BackendProvider::parse("unknown"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::all().iter().copied().find(|p| p.name() == s)
    }

    /// Providers people ask for that have no backend here.
    pub fn is_known_but_unsupported(name: &str) -> bool {
        matches!(
            name.to_lowercase().as_str(),
            "bitbucket" | "azure" | "azure-devops"
        )
    }
}

impl std::fmt::Display for BackendProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Names accepted by the `provider` config key.
pub fn valid_provider_names() -> Vec<&'static str> {
    BackendProvider::all().iter().map(|p| p.name()).collect()
}

/// Create the backend a configuration describes.
///
/// API roots default per provider: the public GitHub and GitLab APIs, and
/// `{base_url}/api/v1` for Gitea. For `git`, `api_root` is the path of the
/// repository on disk.
///
/// # Errors
///
/// - `ForgeError::Validation` if the configuration is incomplete or invalid
/// - `ForgeError::NotFound` if a local repository can't be opened
pub fn create_backend(
    config: &BackendConfig,
    session: Session,
) -> Result<Arc<dyn Backend>, ForgeError> {
    let invalid = |message: String| ForgeError::Validation {
        api: config.provider.clone(),
        message,
    };
    let provider = config.provider().map_err(|e| invalid(e.to_string()))?;
    let repo = config.repository().map_err(|e| invalid(e.to_string()))?;

    let backend: Arc<dyn Backend> = match provider {
        BackendProvider::GitHub => {
            let root = config
                .api_root
                .clone()
                .unwrap_or_else(|| github::DEFAULT_API_ROOT.to_string());
            Arc::new(GitHubBackend::new(repo, root, session))
        }
        BackendProvider::GitLab => {
            let root = config
                .api_root
                .clone()
                .unwrap_or_else(|| gitlab::DEFAULT_API_ROOT.to_string());
            Arc::new(GitLabBackend::new(repo, root, session))
        }
        BackendProvider::Gitea => {
            let root = match (&config.api_root, &config.base_url) {
                (Some(root), _) => root.clone(),
                (None, Some(base)) => format!("{}/api/v1", base.trim_end_matches('/')),
                (None, None) => {
                    return Err(invalid(
                        "gitea needs either `api_root` or `base_url`".to_string(),
                    ))
                }
            };
            Arc::new(GiteaBackend::new(repo, root, session))
        }
        BackendProvider::Git => {
            let path = config.api_root.as_deref().ok_or_else(|| {
                invalid("git needs `api_root` set to the repository path".to_string())
            })?;
            Arc::new(LocalGitBackend::open(path, repo)?)
        }
    };

    tracing::debug!(
        provider = %provider,
        repo = %backend.repository().full_name(),
        "created backend"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Anonymous;

    fn session() -> Session {
        Session::new(Arc::new(Anonymous))
    }

    mod backend_provider {
        use super::*;

        #[test]
        fn name_round_trips_through_parse() {
            for provider in BackendProvider::all() {
                assert_eq!(BackendProvider::parse(provider.name()), Some(*provider));
            }
        }

        #[test]
        fn parse_unknown() {
            assert_eq!(BackendProvider::parse("svn"), None);
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", BackendProvider::GitLab), "gitlab");
        }

        #[test]
        fn bitbucket_is_known_but_unsupported() {
            assert!(BackendProvider::is_known_but_unsupported("Bitbucket"));
            assert!(!BackendProvider::is_known_but_unsupported("github"));
        }
    }

    mod create_backend {
        use super::*;

        #[test]
        fn github_defaults_api_root() {
            let backend =
                create_backend(&BackendConfig::new("github", "owner/repo"), session()).unwrap();
            assert_eq!(backend.name(), "github");
            assert_eq!(backend.repository().full_name(), "owner/repo");
        }

        #[test]
        fn gitlab_accepts_nested_groups() {
            let backend =
                create_backend(&BackendConfig::new("gitlab", "group/sub/site"), session())
                    .unwrap();
            assert_eq!(backend.repository().owner, "group/sub");
            assert!(backend.capabilities().supports_atomic_commit);
        }

        #[test]
        fn gitea_derives_api_root_from_base_url() {
            let mut config = BackendConfig::new("gitea", "owner/repo");
            config.base_url = Some("https://gitea.example.com/".into());
            let backend = create_backend(&config, session()).unwrap();
            assert_eq!(backend.name(), "gitea");
        }

        #[test]
        fn gitea_without_root_is_invalid() {
            let result = create_backend(&BackendConfig::new("gitea", "owner/repo"), session());
            assert!(matches!(result, Err(ForgeError::Validation { .. })));
        }

        #[test]
        fn git_without_path_is_invalid() {
            let result = create_backend(&BackendConfig::new("git", "owner/repo"), session());
            assert!(matches!(result, Err(ForgeError::Validation { .. })));
        }

        #[test]
        fn unknown_provider_is_invalid() {
            let result = create_backend(&BackendConfig::new("svn", "owner/repo"), session());
            match result {
                Err(ForgeError::Validation { message, .. }) => {
                    assert!(message.contains("must be one of"))
                }
                other => panic!("expected validation error, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn valid_names_include_every_provider() {
        assert_eq!(
            valid_provider_names(),
            vec!["github", "gitlab", "gitea", "git"]
        );
    }
}
