use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while a single strategy runs. Apart from `InvalidTarget`,
/// none of these reach the orchestrator's caller: the strategy layer turns
/// them into an error note on the attempt record and the run carries on.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid extraction target: {0}")]
    InvalidTarget(String),
    #[error("http request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    HttpStatus(u16),
    #[error("timed out during {0}")]
    Timeout(String),
    #[error("metadata delegate failed: {0}")]
    Delegate(String),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("search provider error: {0}")]
    Search(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ExtractorResult<T> = std::result::Result<T, ExtractorError>;
