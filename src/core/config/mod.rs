//! core::config
//!
//! Configuration schema and loading.
//!
//! # Config Locations
//!
//! Searched in order, first hit wins:
//! 1. An explicit path (`--config`)
//! 2. `$CONTENTFORGE_CONFIG` if set
//! 3. `./contentforge.toml`
//! 4. `<config dir>/contentforge/config.toml` (e.g. `~/.config` on Linux)
//!
//! An explicit path that does not exist is an error; the other locations are
//! probed silently.
//!
//! # Environment
//!
//! `$CONTENTFORGE_TOKEN` replaces `backend.token` so tokens can stay out of
//! files.
//!
//! # Example
//!
//! ```no_run
//! use contentforge::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! println!("{} via {}", config.file.backend.repo, config.file.backend.provider);
//! ```

pub mod schema;

pub use schema::{BackendConfig, ConfigFile, NetworkConfig, WorkflowConfig};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::session::Session;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CONTENTFORGE_CONFIG";

/// Environment variable overriding the backend token.
pub const TOKEN_ENV: &str = "CONTENTFORGE_TOKEN";

/// File name probed in the working directory.
pub const LOCAL_FILE_NAME: &str = "contentforge.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    /// None of the candidate locations exist; carries the locations tried.
    #[error("no configuration found (tried: {0})")]
    NotFound(String),
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct Config {
    pub file: ConfigFile,
    path: PathBuf,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// # Errors
    ///
    /// Returns an error if no config file is found, or the file found cannot
    /// be read, parsed or validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates = Self::candidates(
            explicit,
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            std::env::current_dir().ok(),
            dirs::config_dir(),
        );

        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => candidates
                .iter()
                .find(|p| p.exists())
                .cloned()
                .ok_or_else(|| {
                    ConfigError::NotFound(
                        candidates
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", "),
                    )
                })?,
        };

        let mut config = Self::read(&path)?;
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        tracing::debug!(path = %path.display(), provider = %config.file.backend.provider, "loaded config");
        Ok(config)
    }

    /// Read, parse and validate a single file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate config text; `path` is only used in messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        file.validate()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Candidate locations in lookup order.
    fn candidates(
        explicit: Option<&Path>,
        env: Option<PathBuf>,
        cwd: Option<PathBuf>,
        config_dir: Option<PathBuf>,
    ) -> Vec<PathBuf> {
        if let Some(path) = explicit {
            return vec![path.to_path_buf()];
        }
        let mut candidates = Vec::new();
        candidates.extend(env.filter(|p| !p.as_os_str().is_empty()));
        candidates.extend(cwd.map(|d| d.join(LOCAL_FILE_NAME)));
        candidates.extend(config_dir.map(|d| d.join("contentforge/config.toml")));
        candidates
    }

    /// Replace the configured token with a non-empty override.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.file.backend.token = Some(token);
        }
    }

    /// Path the configuration was loaded from.
    pub fn loaded_from(&self) -> &Path {
        &self.path
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.file.backend
    }

    pub fn workflow(&self) -> &WorkflowConfig {
        &self.file.workflow
    }

    /// Build a session from the token and network settings.
    pub fn session(&self) -> Session {
        let credentials: std::sync::Arc<dyn crate::auth::TokenProvider> =
            match &self.file.backend.token {
                Some(token) => std::sync::Arc::new(crate::auth::StaticToken::new(token.clone())),
                None => std::sync::Arc::new(crate::auth::Anonymous),
            };
        Session::new(credentials)
            .with_timeout(self.file.network.timeout())
            .with_retry(self.file.network.retry_policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        [backend]
        provider = "gitea"
        repo = "owner/repo"
        api_root = "https://gitea.example.com/api/v1"
        token = "from-file"
    "#;

    #[test]
    fn read_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cf.toml");
        fs::write(&path, MINIMAL).unwrap();

        let config = Config::read(&path).unwrap();
        assert_eq!(config.backend().provider, "gitea");
        assert_eq!(config.loaded_from(), path.as_path());
    }

    #[test]
    fn load_explicit_missing_is_read_error() {
        let temp = TempDir::new().unwrap();
        let err = Config::load(Some(&temp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn parse_error_names_path() {
        let err = Config::parse("[backend", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn validation_runs_on_parse() {
        let text = MINIMAL.replace("gitea", "bitbucket");
        let err = Config::parse(&text, Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn candidate_order() {
        let candidates = Config::candidates(
            None,
            Some(PathBuf::from("/env/cf.toml")),
            Some(PathBuf::from("/work")),
            Some(PathBuf::from("/home/u/.config")),
        );
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/env/cf.toml"),
                PathBuf::from("/work/contentforge.toml"),
                PathBuf::from("/home/u/.config/contentforge/config.toml"),
            ]
        );
    }

    #[test]
    fn explicit_path_is_only_candidate() {
        let candidates = Config::candidates(
            Some(Path::new("/explicit.toml")),
            Some(PathBuf::from("/env/cf.toml")),
            None,
            None,
        );
        assert_eq!(candidates, vec![PathBuf::from("/explicit.toml")]);
    }

    #[test]
    fn token_override() {
        let mut config = Config::parse(MINIMAL, Path::new("x.toml")).unwrap();
        config.apply_token_override(Some(String::new()));
        assert_eq!(config.backend().token.as_deref(), Some("from-file"));
        config.apply_token_override(Some("from-env".to_string()));
        assert_eq!(config.backend().token.as_deref(), Some("from-env"));
    }

    #[test]
    fn session_uses_network_settings() {
        let text = format!("{MINIMAL}\n[network]\ntimeout_secs = 7\nmax_attempts = 2\n");
        let config = Config::parse(&text, Path::new("x.toml")).unwrap();
        let session = config.session();
        assert_eq!(session.timeout(), std::time::Duration::from_secs(7));
        assert_eq!(session.retry().max_attempts, 2);
    }
}
