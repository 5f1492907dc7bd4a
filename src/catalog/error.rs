use std::path::PathBuf;
use thiserror::Error;

use crate::metadata::StoreError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unreadable file {path:?}: {source}")]
    UnreadableFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Undecodable media {path:?}: {reason}")]
    Undecodable { path: PathBuf, reason: String },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(PathBuf),

    #[error("Duplicate content: {path:?} hashes to existing file {existing:?}")]
    DuplicateContent { path: PathBuf, existing: PathBuf },

    #[error("Failed to rename {from:?} to {to:?}: {source}")]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Filesystem watcher error: {0}")]
    WatcherError(#[from] notify::Error),

    #[error("Metadata store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Not found")]
    NotFound,
}

impl CatalogError {
    /// Lookup failures the API reports as "not found" rather than as faults.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::GroupNotFound(_) | CatalogError::ImageNotFound(_) | CatalogError::NotFound
        )
    }

    pub(crate) fn is_missing_file(&self) -> bool {
        match self {
            CatalogError::UnreadableFile { source, .. } | CatalogError::IoError(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
