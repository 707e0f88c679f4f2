//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port '{value}': must be between 1 and 65535")]
    InvalidPort { value: String },

    #[error("failed to parse port '{value}': {source}")]
    PortParseError {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("failed to parse bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{name} must be an integer, got '{value}'")]
    InvalidInteger { name: &'static str, value: String },

    #[error("path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    #[error("path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("failed to read management config {path}: {source}")]
    ManagementRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write management config {path}: {source}")]
    ManagementWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode management config {path}: {source}")]
    ManagementDecode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("management config document root must be a mapping")]
    ManagementNotAMapping,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
