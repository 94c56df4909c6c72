//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFileError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The job discovery pattern is not a valid glob.
    #[error("invalid job pattern '{pattern}': {source}")]
    PatternError {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// A matched path could not be read while globbing.
    #[error("failed to scan '{path}': {source}")]
    GlobError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid value in a specific file.
    #[error("invalid configuration in '{path}': {message}")]
    InvalidFileConfig { path: PathBuf, message: String },

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

impl ConfigError {
    /// Attach a file path to an error that lacks one.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match self {
            ConfigError::YamlError(source) => ConfigError::YamlFileError { path, source },
            ConfigError::InvalidConfig(message) => ConfigError::InvalidFileConfig { path, message },
            ConfigError::MissingField(field) => ConfigError::InvalidFileConfig {
                path,
                message: format!("missing required field: {}", field),
            },
            other => other,
        }
    }
}
