//! Configuration types for durable-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `max_concurrent_tasks_limit`
pub const MAX_CONCURRENT_TASKS_CEILING: usize = 6;

/// Transport-facing session configuration
///
/// Changing any of these at runtime through
/// [`SessionManager::update_config`](crate::SessionManager::update_config)
/// rebuilds the transport channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-request timeout (default: 60s)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout_interval_for_request: Duration,

    /// Maximum number of transfers running at once (default: 6, clamped to 1..=6)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks_limit: usize,

    /// Allow transfers over cellular networks
    #[serde(default = "default_true")]
    pub allows_cellular_access: bool,

    /// Allow transfers over constrained (low data mode) networks
    #[serde(default = "default_true")]
    pub allows_constrained_network_access: bool,

    /// Allow transfers over expensive networks
    #[serde(default = "default_true")]
    pub allows_expensive_network_access: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_interval_for_request: default_request_timeout(),
            max_concurrent_tasks_limit: default_max_concurrent_tasks(),
            allows_cellular_access: true,
            allows_constrained_network_access: true,
            allows_expensive_network_access: true,
        }
    }
}

impl SessionConfig {
    /// Return a copy with `max_concurrent_tasks_limit` clamped to `1..=MAX_CONCURRENT_TASKS_CEILING`
    ///
    /// # Examples
    ///
    /// ```
    /// use durable_dl::config::SessionConfig;
    ///
    /// let config = SessionConfig {
    ///     max_concurrent_tasks_limit: 0,
    ///     ..Default::default()
    /// };
    /// assert_eq!(config.clamped().max_concurrent_tasks_limit, 1);
    /// ```
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.max_concurrent_tasks_limit = self
            .max_concurrent_tasks_limit
            .clamp(1, MAX_CONCURRENT_TASKS_CEILING);
        self
    }
}

/// Persistence store locations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root under which each session identifier gets its own directory
    /// (default: "./durable-dl-cache")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// OS-wide temporary area where the transport keeps resumable bytes
    /// (default: the platform temp dir)
    #[serde(default = "default_system_tmp_dir")]
    pub system_tmp_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            system_tmp_dir: default_system_tmp_dir(),
        }
    }
}

/// Main configuration for a [`SessionManager`](crate::SessionManager)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Session identifier; also names the on-disk cache directory
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Persistence store locations
    #[serde(default)]
    pub cache: CacheConfig,

    /// Transport-facing configuration
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration for `identifier` with every other setting defaulted
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Use `root_dir` as the cache root
    #[must_use]
    pub fn with_root_dir(mut self, root_dir: impl AsRef<Path>) -> Self {
        self.cache.root_dir = root_dir.as_ref().to_path_buf();
        self
    }
}

fn default_identifier() -> String {
    "default".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent_tasks() -> usize {
    MAX_CONCURRENT_TASKS_CEILING
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("durable-dl-cache")
}

fn default_system_tmp_dir() -> PathBuf {
    std::env::temp_dir()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
