//! Configuration file parsing
//!
//! Parses TOML configuration files for the backing store server.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Store settings
    pub store: StoreSection,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Unix socket path to bind
    pub socket: PathBuf,

    /// Capacity in bytes. When omitted, 70% of available shared memory.
    pub capacity: Option<u64>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.socket.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "store.socket must not be empty".to_string(),
            ));
        }
        if self.store.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "store.capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"
[store]
socket = "/tmp/kvstores/store.sock"
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(
            config.store.socket,
            PathBuf::from("/tmp/kvstores/store.sock")
        );
        assert_eq!(config.store.capacity, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
log_level = "debug"

[store]
socket = "/run/store.sock"
capacity = 1073741824
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.store.capacity, Some(1 << 30));
    }

    #[test]
    fn test_zero_capacity_error() {
        let config_str = r#"
[store]
socket = "/run/store.sock"
capacity = 0
"#;

        let result = Config::parse(config_str);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_socket_error() {
        let config_str = r#"
[store]
socket = ""
"#;

        let result = Config::parse(config_str);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
