//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};
use crate::transport::Endpoint;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub collector: CollectorConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,

    pub source: SourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-exchange reply timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Periodic reporting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReporterConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Start periodic reporting as soon as the binary starts
    #[serde(default)]
    pub autostart: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            autostart: false,
        }
    }
}

/// Snapshot source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: String,

    /// Snapshot file kept current by an external GPS/modem helper
    #[serde(default = "default_source_path")]
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; empty logs to stderr only
    #[serde(default)]
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: String::new(),
        }
    }
}

// Default value functions
fn default_endpoint() -> String { "127.0.0.1:2222".to_string() }
fn default_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 3000 }

fn default_interval_ms() -> u64 { 1000 }

fn default_source_kind() -> String { "file".to_string() }
fn default_source_path() -> String { "./snapshot.json".to_string() }

fn default_log_level() -> String { "info".to_string() }

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cell_reporter::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.reporter.interval_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.connect_timeout_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate collector configuration
        if self.collector.endpoint.trim().is_empty() {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("collector endpoint cannot be empty")
            ));
        }

        if let Err(e) = self.collector.endpoint.parse::<Endpoint>() {
            return Err(TelemetryError::Config(
                toml::de::Error::custom(format!("collector endpoint is invalid: {}", e))
            ));
        }

        if self.collector.timeout_ms == 0 || self.collector.timeout_ms > 60000 {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 60000")
            ));
        }

        if self.collector.connect_timeout_ms == 0 || self.collector.connect_timeout_ms > 60000 {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("connect_timeout_ms must be between 1 and 60000")
            ));
        }

        // Validate reporter timing
        if self.reporter.interval_ms == 0 || self.reporter.interval_ms > 3_600_000 {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("interval_ms must be between 1 and 3600000")
            ));
        }

        // Validate snapshot source
        if self.source.kind != "file" {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("source kind must be 'file' (only supported source)")
            ));
        }

        if self.source.path.is_empty() {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("source path cannot be empty")
            ));
        }

        // Validate log level
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(TelemetryError::Config(
                toml::de::Error::custom("log level must be one of: trace, debug, info, warn, error")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config {
            collector: CollectorConfig {
                endpoint: default_endpoint(),
                timeout_ms: default_timeout_ms(),
                connect_timeout_ms: default_connect_timeout_ms(),
            },
            reporter: ReporterConfig::default(),
            source: SourceConfig {
                kind: default_source_kind(),
                path: default_source_path(),
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[collector]
endpoint = "10.0.2.2:2222"

[reporter]
interval_ms = 2000
autostart = true

[source]
path = "/run/cell-reporter/snapshot.json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.collector.endpoint, "10.0.2.2:2222");
        assert_eq!(config.interval(), Duration::from_secs(2));
        assert!(config.reporter.autostart);
        assert_eq!(config.exchange_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml("[collector]\n[source]\n").unwrap();
        assert_eq!(config.collector.endpoint, "127.0.0.1:2222");
        assert_eq!(config.reporter.interval_ms, 1000);
        assert!(!config.reporter.autostart);
        assert_eq!(config.source.kind, "file");
        assert!(config.logging.dir.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/cell-reporter.toml");
        assert!(matches!(result, Err(TelemetryError::Io(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml("[collector\nendpoint=");
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_empty_endpoint() {
        let mut config = create_valid_config();
        config.collector.endpoint = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_endpoint() {
        let mut config = create_valid_config();
        config.collector.endpoint = "collector-without-port".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_endpoint_rejected() {
        let mut config = create_valid_config();
        config.collector.endpoint = "tcp://10.0.2.2:2222".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_zero() {
        let mut config = create_valid_config();
        config.collector.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_too_high() {
        let mut config = create_valid_config();
        config.collector.timeout_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_timeout_zero() {
        let mut config = create_valid_config();
        config.collector.connect_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_zero() {
        let mut config = create_valid_config();
        config.reporter.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_too_high() {
        let mut config = create_valid_config();
        config.reporter.interval_ms = 3_600_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_source_kind() {
        let mut config = create_valid_config();
        config.source.kind = "gpsd".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_source_path() {
        let mut config = create_valid_config();
        config.source.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in LOG_LEVELS {
            let mut config = create_valid_config();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Log level {} should be valid", level);
        }
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_endpoint(), "127.0.0.1:2222");
        assert_eq!(default_timeout_ms(), 5000);
        assert_eq!(default_connect_timeout_ms(), 3000);
        assert_eq!(default_interval_ms(), 1000);
        assert_eq!(default_source_kind(), "file");
        assert_eq!(default_source_path(), "./snapshot.json");
        assert_eq!(default_log_level(), "info");
    }
}
