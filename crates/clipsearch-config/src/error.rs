//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Environment variable named by the config is unset
    #[error("environment variable '{var}' (from '{key}') is not set")]
    MissingEnvVar { key: String, var: String },

    /// Configuration validation error
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn missing_env_var(key: impl Into<String>, var: impl Into<String>) -> Self {
        Self::MissingEnvVar {
            key: key.into(),
            var: var.into(),
        }
    }
}
