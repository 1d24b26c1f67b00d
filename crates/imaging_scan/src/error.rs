//! Error types for scan discovery and ingestion.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The link or configuration cannot provide what was asked for
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expected files or directories are missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Acquisition mode or software without an ingestion routine
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A vendor reader failed to parse a raw file
    #[error("Failed to read {path}: {message}")]
    Reader { path: PathBuf, message: String },

    /// A path could not be expressed relative to its root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] imaging_db::DbError),
}

impl ScanError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn reader(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Reader {
            path: path.into(),
            message: message.into(),
        }
    }
}
