//! Configuration for the CMS data layer
//!
//! Configuration is read from TOML, with every section optional and falling
//! back to defaults. A small set of environment variables override the file
//! so deployments can inject secrets without editing it.

pub mod error;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogConfig;

/// Environment variable overriding [`CmsConfig::storage_path`].
pub const ENV_STORAGE_PATH: &str = "DATAFOLD_CMS_STORAGE_PATH";
/// Environment variable overriding [`QueueConfig::secret`].
pub const ENV_QUEUE_SECRET: &str = "DATAFOLD_CMS_QUEUE_SECRET";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsConfig {
    /// Path where the sled database lives
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Open the database in temporary mode (removed on drop)
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data")
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            temporary: false,
            query: QueryConfig::default(),
            queue: QueueConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl CmsConfig {
    /// Create a configuration storing data under `storage_path`
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Default::default()
        }
    }

    /// Configuration for a throwaway database, used by tests and tooling
    pub fn temporary(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            temporary: true,
            ..Self::new(storage_path)
        }
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_STORAGE_PATH) {
            if !path.is_empty() {
                self.storage_path = PathBuf::from(path);
            }
        }
        if let Ok(secret) = std::env::var(ENV_QUEUE_SECRET) {
            if !secret.is_empty() {
                self.queue.secret = Some(secret);
            }
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.query.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}

/// Query builder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Page size used when `page` is given without `perPage`
    pub default_per_page: u64,
    /// Upper bound on `perPage` and `limit`
    pub max_per_page: u64,
    /// Depth used for `populate=true` when no explicit depth is given
    pub default_population_depth: u32,
    /// Hard cap on relation expansion depth
    pub max_population_depth: u32,
    /// Language assigned to records of translatable collections when none is given
    pub default_language: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_per_page: 10,
            max_per_page: 100,
            default_population_depth: 1,
            max_population_depth: 3,
            default_language: "en".to_string(),
        }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_per_page == 0 {
            return Err(ConfigError::validation("query.max_per_page must be greater than zero"));
        }
        if self.default_per_page == 0 || self.default_per_page > self.max_per_page {
            return Err(ConfigError::validation(
                "query.default_per_page must be between 1 and query.max_per_page",
            ));
        }
        if self.default_population_depth > self.max_population_depth {
            return Err(ConfigError::validation(
                "query.default_population_depth exceeds query.max_population_depth",
            ));
        }
        if self.default_language.trim().is_empty() {
            return Err(ConfigError::validation("query.default_language must not be empty"));
        }
        Ok(())
    }
}

/// How a successful trigger call continues draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// One job per trigger call
    #[default]
    Manual,
    /// Schedule a bounded follow-up drain after each trigger call
    Auto,
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Shared secret expected by the queue trigger
    pub secret: Option<String>,
    pub mode: ProcessMode,
    /// Maximum jobs processed in one drain session
    pub max_iterations: u32,
    /// Maximum wall time of one drain session
    pub max_duration_ms: u64,
    /// Per-job execution timeout
    pub job_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            secret: None,
            mode: ProcessMode::Manual,
            max_iterations: 100,
            max_duration_ms: 30_000,
            job_timeout_ms: 60_000,
        }
    }
}

impl QueueConfig {
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_mode(mut self, mode: ProcessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_iterations == 0 {
            return Err(ConfigError::validation("queue.max_iterations must be greater than zero"));
        }
        if self.max_duration_ms == 0 || self.job_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "queue.max_duration_ms and queue.job_timeout_ms must be greater than zero",
            ));
        }
        if self.secret.as_deref().is_some_and(|s| s.is_empty()) {
            return Err(ConfigError::validation("queue.secret must not be empty when set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let config = CmsConfig::from_toml_str("storage_path = \"/tmp/cms\"").unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/tmp/cms"));
        assert_eq!(config.query.max_per_page, 100);
        assert_eq!(config.queue.mode, ProcessMode::Manual);
    }

    #[test]
    fn test_parses_queue_section() {
        let config = CmsConfig::from_toml_str(
            r#"
            [queue]
            secret = "s3cret"
            mode = "auto"
            max_iterations = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.queue.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.queue.mode, ProcessMode::Auto);
        assert_eq!(config.queue.max_iterations, 5);
        assert_eq!(config.queue.job_timeout_ms, 60_000);
    }

    #[test]
    fn test_rejects_invalid_limits() {
        let err = CmsConfig::from_toml_str("[query]\nmax_per_page = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = CmsConfig::new("data").with_queue(QueueConfig::default().with_secret("x"));
        let text = config.to_toml_string().unwrap();
        let parsed = CmsConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.queue.secret.as_deref(), Some("x"));
    }
}
