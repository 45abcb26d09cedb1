//! Error types for the download scheduler.

use saps_catalog::CatalogError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrawlerError>;

#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Missing or invalid local volume / settings. Stops the scheduler.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    /// Another process owns the pending queue
    #[error("Pending download queue is locked by another process: {0}")]
    QueueLocked(PathBuf),

    #[error("Pending download queue I/O failed ({path}): {source}")]
    Queue {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Queue file exists but cannot be decoded
    #[error("Pending download queue is corrupt ({path}): {source}")]
    QueueFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// External downloader or post-processing step failed
    #[error("Download of {task_id} failed: {message}")]
    Download { task_id: String, message: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl CrawlerError {
    pub fn download(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    pub(crate) fn queue(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Queue {
            path: path.to_path_buf(),
            source,
        }
    }
}
