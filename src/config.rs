//! Configuration for the activity agent.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
///
/// The password is deliberately absent: it is supplied at start-up from the
/// command line or the environment and never written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the collection server
    pub server_url: String,

    /// User the produced records are attributed to
    pub user_id: u64,

    /// Time between two collection ticks
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Smallest accepted interval (seconds)
    pub min_interval_secs: u64,

    /// Largest accepted interval (seconds)
    pub max_interval_secs: u64,

    /// Maximum number of records per delivered batch
    pub chunk_size: usize,

    /// Activity window each record claims to cover
    #[serde(with = "duration_serde")]
    pub sample_window: Duration,

    /// Per-request HTTP timeout
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Login name, if stored
    pub username: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8081".to_string(),
            user_id: 20,
            interval: Duration::from_secs(60),
            min_interval_secs: 30,
            max_interval_secs: 300,
            chunk_size: 3,
            sample_window: Duration::from_secs(60),
            request_timeout: Duration::from_secs(15),
            username: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-agent")
            .join("config.json")
    }

    /// Check every setting that does not depend on the start request.
    pub fn validate(&self) -> Result<(), AgentError> {
        let url = reqwest::Url::parse(&self.server_url)
            .map_err(|e| AgentError::Config(format!("invalid server url '{}': {e}", self.server_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AgentError::Config(format!(
                "server url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.chunk_size == 0 {
            return Err(AgentError::Config("chunk size must be at least 1".to_string()));
        }

        if self.min_interval_secs == 0 || self.min_interval_secs > self.max_interval_secs {
            return Err(AgentError::Config(format!(
                "invalid interval bounds {}..={}",
                self.min_interval_secs, self.max_interval_secs
            )));
        }

        if self.sample_window.as_secs() == 0 {
            return Err(AgentError::Config(
                "sample window must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Check a requested collection interval against the accepted range.
    pub fn validate_interval(&self, interval_secs: u64) -> Result<Duration, AgentError> {
        if interval_secs < self.min_interval_secs || interval_secs > self.max_interval_secs {
            return Err(AgentError::Config(format!(
                "interval {interval_secs}s outside accepted range {}..={}s",
                self.min_interval_secs, self.max_interval_secs
            )));
        }
        Ok(Duration::from_secs(interval_secs))
    }
}

/// Check a user id. Ids are positive.
pub fn validate_user_id(user_id: u64) -> Result<u64, AgentError> {
    if user_id == 0 {
        return Err(AgentError::Config("user id must be positive".to_string()));
    }
    Ok(user_id)
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
