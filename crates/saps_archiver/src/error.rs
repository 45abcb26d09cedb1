//! Error types for permanent storage and the archive sweep.

use saps_catalog::CatalogError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Object-store, credential and local staging errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A single file could not be uploaded within the per-file retry bound
    #[error("Upload of {local} to {remote} failed after {attempts} attempt(s): {message}")]
    Upload {
        local: PathBuf,
        remote: String,
        attempts: u32,
        message: String,
    },

    /// Object-store client process failed
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Token error: {0}")]
    Token(String),

    /// No token was obtained during startup
    #[error("No storage token obtained within {0:?}")]
    TokenTimeout(Duration),

    /// Stage directory absent or not a directory
    #[error("Stage directory missing: {0}")]
    MissingDirectory(PathBuf),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop an archive sweep.
#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Notification delivery failed: {0}")]
    Notification(String),
}
