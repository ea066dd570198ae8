//! Configuration for the logging system
//!
//! Levels are plain strings (`error`, `warn`, `info`, `debug`, `trace`) so the
//! section reads naturally in TOML. Per-module overrides live under
//! `features`, keyed by module path.

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main logging configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level for all modules
    pub default_level: String,
    /// Include timestamps in console output
    pub include_timestamp: bool,
    /// Include module path in console output
    pub include_module: bool,
    /// Module-specific log levels
    pub features: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            include_timestamp: true,
            include_module: true,
            features: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// Set the level for one module path, e.g. `datafold_cms::queue`
    pub fn with_feature_level(mut self, module: &str, level: &str) -> Self {
        self.features.insert(module.to_string(), level.to_string());
        self
    }

    pub fn default_filter(&self) -> Result<LevelFilter, String> {
        parse_level(&self.default_level)
    }

    /// All module overrides, parsed
    pub fn feature_filters(&self) -> Result<Vec<(String, LevelFilter)>, String> {
        let mut filters = self
            .features
            .iter()
            .map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
            .collect::<Result<Vec<_>, _>>()?;
        filters.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(filters)
    }
}

/// Parse a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        other => Err(format!("unknown log level '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_level("WARN").unwrap(), LevelFilter::Warn);
        assert_eq!(parse_level(" debug ").unwrap(), LevelFilter::Debug);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_feature_filters_sorted() {
        let config = LogConfig::default()
            .with_feature_level("datafold_cms::queue", "debug")
            .with_feature_level("datafold_cms::query", "warn");
        let filters = config.feature_filters().unwrap();
        assert_eq!(filters[0].0, "datafold_cms::query");
        assert_eq!(filters[1].1, LevelFilter::Debug);
    }
}
