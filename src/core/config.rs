//! Configuration management for tally.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Validation and defaults
//!
//! The aggregation limits are read once at startup; changing them requires a
//! fresh [`Aggregator`](crate::aggregate::Aggregator).

use crate::core::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration for tally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval aggregation configuration
    pub aggregate: AggregateConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Interval aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Width of one aggregation bucket
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Distinct transaction names tracked individually per transaction type
    pub max_transactions_per_type: usize,
    /// Distinct query texts tracked per query type in one accumulator
    pub max_queries_per_query_type: usize,
    /// How often the flush task looks for completed buckets
    #[serde(with = "humantime_serde")]
    pub flush_check_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Bucket lifecycle and flushes
    Debug,
    /// Resets and startup
    Info,
    /// Cardinality warning
    Warn,
    /// Flush failures
    Error,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        AggregateConfig {
            interval: Duration::from_secs(60),
            max_transactions_per_type: 500,
            max_queries_per_query_type: 500,
            flush_check_interval: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl AggregateConfig {
    /// Bucket width in milliseconds
    pub fn interval_millis(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        ConfigBuilder::new().from_file(path)?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let aggregate = &self.aggregate;

        if aggregate.interval.as_millis() == 0 {
            return Err(TallyError::config("aggregate interval must be at least 1ms"));
        }

        if aggregate.interval.subsec_nanos() % 1_000_000 != 0 {
            return Err(TallyError::config(format!(
                "aggregate interval must be a whole number of milliseconds, got {:?}",
                aggregate.interval
            )));
        }

        if aggregate.max_transactions_per_type == 0 {
            return Err(TallyError::config("max_transactions_per_type must be greater than 0"));
        }

        if aggregate.max_queries_per_query_type == 0 {
            return Err(TallyError::config("max_queries_per_query_type must be greater than 0"));
        }

        if aggregate.flush_check_interval.is_zero() {
            return Err(TallyError::config("flush_check_interval must be greater than 0"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TallyError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loaded configuration from {:?}", path.as_ref());
        self.from_yaml(&content)
    }

    /// Set bucket width
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.aggregate.interval = interval;
        self
    }

    /// Set the per-type transaction name cap
    pub fn max_transactions_per_type(mut self, max: usize) -> Self {
        self.config.aggregate.max_transactions_per_type = max;
        self
    }

    /// Set the per-query-type query text cap
    pub fn max_queries_per_query_type(mut self, max: usize) -> Self {
        self.config.aggregate.max_queries_per_query_type = max;
        self
    }

    /// Set flush task tick
    pub fn flush_check_interval(mut self, interval: Duration) -> Self {
        self.config.aggregate.flush_check_interval = interval;
        self
    }

    /// Set log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregate.interval_millis(), 60_000);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = Config::default();
        config.aggregate.max_transactions_per_type = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aggregate.max_queries_per_query_type = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_millisecond_interval_rejected() {
        let mut config = Config::default();
        config.aggregate.interval = Duration::from_micros(500);
        assert!(config.validate().is_err());

        config.aggregate.interval = Duration::from_micros(1_500);
        assert!(config.validate().is_err());

        config.aggregate.interval = Duration::from_millis(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .interval(Duration::from_secs(30))
            .max_transactions_per_type(10)
            .max_queries_per_query_type(20)
            .log_level(LogLevel::Debug)
            .build()
            .unwrap();

        assert_eq!(config.aggregate.interval_millis(), 30_000);
        assert_eq!(config.aggregate.max_transactions_per_type, 10);
        assert_eq!(config.aggregate.max_queries_per_query_type, 20);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
aggregate:
  interval: 5m
  max_transactions_per_type: 1000
  flush_check_interval: 250ms
logging:
  level: warn
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

        assert_eq!(config.aggregate.interval, Duration::from_secs(300));
        assert_eq!(config.aggregate.max_transactions_per_type, 1000);
        assert_eq!(config.aggregate.max_queries_per_query_type, 500);
        assert_eq!(config.aggregate.flush_check_interval, Duration::from_millis(250));
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_yaml() {
        let result = ConfigBuilder::new().from_yaml("aggregate: [not, a, map]");
        assert!(matches!(result, Err(TallyError::Config(_))));
    }
}
