// ABOUTME: Configuration error types.
// ABOUTME: Covers unreadable sources, failing generator commands, and parse failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to run config command `{command}`: {reason}")]
    Command { command: String, reason: String },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("configuration file not found in {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
