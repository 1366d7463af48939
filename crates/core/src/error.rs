//! Error types for Overachiever

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverachieverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Steam API error: {0}")]
    SteamApi(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Cannot determine game for {0}")]
    Unresolvable(PathBuf),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl OverachieverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OverachieverError::Io { path: path.into(), source }
    }
}

impl From<serde_json::Error> for OverachieverError {
    fn from(e: serde_json::Error) -> Self {
        OverachieverError::InvalidData(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OverachieverError>;
