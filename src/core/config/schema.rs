//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Layout
//!
//! ```toml
//! [backend]
//! provider = "gitea"
//! repo = "owner/name"
//! branch = "master"
//! api_root = "https://gitea.example.com/api/v1"
//! token = "..."
//!
//! [workflow]
//! enabled = true
//! branch_prefix = "cms"
//! merge_method = "merge"
//!
//! [network]
//! timeout_secs = 30
//! max_attempts = 5
//! base_delay_ms = 500
//! ```
//!
//! # Validation
//!
//! Config values are validated after parsing: the provider must be one this
//! crate implements, `repo` must be `owner/name`, `branch` must be a valid
//! branch name, and timeouts and attempt counts must be non-zero.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::session::RetryPolicy;
use crate::core::types::{BranchName, Repository};
use crate::forge::{BackendProvider, MergeMethod};

/// Default content branch, matching what most CMS setups publish from.
pub const DEFAULT_BRANCH: &str = "master";

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub backend: BackendConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

impl ConfigFile {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()?;
        self.workflow.validate()?;
        self.network.validate()
    }
}

/// The resolved backend description: `{provider, repo, branch, apiRoot, token}`.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Provider name (`github`, `gitlab`, `gitea`, `git`)
    pub provider: String,

    /// Repository as `owner/name`; GitLab owners may contain `/`
    pub repo: String,

    /// Content branch
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Web URL of the provider, used to derive `api_root` when it is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// REST API root (for `git`, the local repository path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_root: Option<String>,

    /// Access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl BackendConfig {
    pub fn new(provider: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            repo: repo.into(),
            branch: default_branch(),
            base_url: None,
            api_root: None,
            token: None,
        }
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = Some(api_root.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider()?;
        self.repository()?;
        BranchName::new(&self.branch)
            .map_err(|e| ConfigError::InvalidValue(format!("invalid branch name: {}", e)))?;
        Ok(())
    }

    /// The configured provider.
    pub fn provider(&self) -> Result<BackendProvider, ConfigError> {
        if BackendProvider::is_known_but_unsupported(&self.provider) {
            return Err(ConfigError::InvalidValue(format!(
                "provider '{}' is recognised but not supported",
                self.provider
            )));
        }
        BackendProvider::parse(&self.provider).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "invalid provider '{}', must be one of: {}",
                self.provider,
                crate::forge::valid_provider_names().join(", ")
            ))
        })
    }

    /// The repository identity.
    pub fn repository(&self) -> Result<Repository, ConfigError> {
        Repository::parse(&self.repo, &self.branch)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("base_url", &self.base_url)
            .field("api_root", &self.api_root)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Editorial workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Route edits through review branches and pull requests
    pub enabled: bool,

    /// First segment of workflow branch names
    pub branch_prefix: String,

    /// How a published entry is merged
    pub merge_method: MergeMethod,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            branch_prefix: crate::core::naming::DEFAULT_BRANCH_PREFIX.to_string(),
            merge_method: MergeMethod::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if crate::core::naming::sanitize_segment(&self.branch_prefix) != self.branch_prefix {
            return Err(ConfigError::InvalidValue(format!(
                "branch_prefix '{}' is not a valid ref segment",
                self.branch_prefix
            )));
        }
        Ok(())
    }
}

/// Request timeout and rate-limit retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            timeout_secs: crate::core::session::DEFAULT_TIMEOUT.as_secs(),
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::InvalidValue(
                "max_delay_ms must not be smaller than base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}
