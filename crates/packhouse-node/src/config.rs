//! Node configuration.
//!
//! Values come from an optional YAML file, then `PACKHOUSE__*`
//! environment variables (`__` separates nested keys, as in
//! `PACKHOUSE__PROTOCOL__BATCH_SIZE`). Command-line flags are applied on
//! top by the binary.

use crate::observability::LogFormat;
use packhouse_git::ProtocolConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use validator::{Validate, ValidationError};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PACKHOUSE";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Configuration for a packhouse node.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Largest request body accepted, counted before decompression.
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,
    /// Keep objects zlib-compressed in memory.
    pub compress_at_rest: bool,
    /// Protocol engine tuning.
    pub protocol: ProtocolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            max_body_bytes: 512 * 1024 * 1024,
            compress_at_rest: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (if given and present) and the
    /// environment, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        return Ok(());
    }
    let mut err = ValidationError::new("log_level");
    err.message = Some(format!("Log level must be one of {}", LOG_LEVELS.join(", ")).into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol.batch_size, 100);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "listen_addr: \"0.0.0.0:9418\"\nlog_format: json\nprotocol:\n  batch_size: 25"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9418".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.protocol.batch_size, 25);
        assert_eq!(config.protocol.store_batch_size, 100);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/packhouse.yaml"))).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "log_level: loud").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("127.0.0.1:8080"));
        assert!(yaml.contains("batch_size: 100"));
    }
}
