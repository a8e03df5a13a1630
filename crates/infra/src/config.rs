//! Runtime configuration.
//!
//! Load order, later wins:
//! 0. `.env` in the working directory, if present (via dotenvy)
//! 1. an optional TOML file (`BATCHLINE_CONFIG_PATH` or an explicit path)
//! 2. environment variables
//!
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::normalize::MalformedPolicy;
use crate::provider::{OpenAiBatchProvider, DEFAULT_BASE_URL};

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_DB_PATH: &str = "BATCHLINE_DB_PATH";
pub const ENV_OUTPUT_DIR: &str = "BATCHLINE_OUTPUT_DIR";
pub const ENV_REQUEST_TIMEOUT: &str = "BATCHLINE_REQUEST_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL: &str = "BATCHLINE_POLL_INTERVAL_SECS";
pub const ENV_WAIT_TIMEOUT: &str = "BATCHLINE_WAIT_TIMEOUT_SECS";
pub const ENV_MALFORMED_POLICY: &str = "BATCHLINE_MALFORMED_POLICY";
pub const ENV_CONFIG_PATH: &str = "BATCHLINE_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },

    #[error("no API key configured (set {ENV_API_KEY})")]
    MissingApiKey,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub wait_timeout_secs: u64,
    pub malformed_policy: MalformedPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            db_path: PathBuf::from("batch_status.db"),
            output_dir: PathBuf::from("output"),
            request_timeout_secs: 120,
            poll_interval_secs: 60,
            wait_timeout_secs: 86_400,
            malformed_policy: MalformedPolicy::default(),
        }
    }
}

impl core::fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("db_path", &self.db_path)
            .field("output_dir", &self.output_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("wait_timeout_secs", &self.wait_timeout_secs)
            .field("malformed_policy", &self.malformed_policy)
            .finish()
    }
}

impl BatchConfig {
    /// Load `.env`, the optional TOML file, then environment overrides.
    ///
    /// `explicit_path` takes precedence over `BATCHLINE_CONFIG_PATH`.
    pub fn load(explicit_path: Option<&Path>) -> ConfigResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env"),
        }

        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Override fields from variables returned by `lookup`. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_API_KEY) {
            self.api_key = Some(v);
        }
        if let Some(v) = get(ENV_BASE_URL) {
            self.api_base_url = v;
        }
        if let Some(v) = get(ENV_DB_PATH) {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_REQUEST_TIMEOUT) {
            self.request_timeout_secs = parse_secs(ENV_REQUEST_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL, &v)?;
        }
        if let Some(v) = get(ENV_WAIT_TIMEOUT) {
            self.wait_timeout_secs = parse_secs(ENV_WAIT_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_MALFORMED_POLICY) {
            self.malformed_policy =
                v.parse().map_err(|message| ConfigError::InvalidValue {
                    var: ENV_MALFORMED_POLICY,
                    message,
                })?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Build the HTTP provider. Fails when no API key is configured.
    pub fn provider(&self) -> ConfigResult<Arc<OpenAiBatchProvider>> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        OpenAiBatchProvider::new(api_key, &self.api_base_url, self.request_timeout())
            .map(Arc::new)
            .map_err(|e| ConfigError::InvalidValue {
                var: ENV_BASE_URL,
                message: e.to_string(),
            })
    }
}

fn parse_secs(var: &'static str, value: &str) -> ConfigResult<u64> {
    let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        message: format!("expected a whole number of seconds, got '{value}'"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            var,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(secs)
}
