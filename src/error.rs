//! Upload pipeline errors

use crate::archive::ArchiveError;
use crate::catalog::CatalogError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the reclaimer and the upload pipeline
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read source {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compression failed: {0}")]
    CompressionFailed(#[from] ArchiveError),

    #[error("Quota query failed: {0}")]
    QuotaQueryFailed(#[source] CatalogError),

    #[error("Listing remote files failed: {0}")]
    ListingFailed(#[source] CatalogError),

    #[error("Failed to delete remote file {id} ({name}): {source}")]
    DeletionFailed {
        id: String,
        name: String,
        #[source]
        source: CatalogError,
    },

    #[error("Upload failed: {0}")]
    UploadFailed(#[source] CatalogError),

    #[error("Failed to delete compressed file {}: {source}", .path.display())]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{primary} (cleanup also failed: {cleanup})")]
    WithCleanupFailure {
        primary: Box<UploadError>,
        cleanup: Box<UploadError>,
    },
}

impl UploadError {
    /// Combine a primary failure with a later cleanup failure
    pub fn with_cleanup_failure(self, cleanup: UploadError) -> Self {
        UploadError::WithCleanupFailure {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// The first substantive error, ignoring any attached cleanup failure
    pub fn primary(&self) -> &UploadError {
        match self {
            UploadError::WithCleanupFailure { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// The cleanup failure, if cleanup failed
    pub fn cleanup_failure(&self) -> Option<&UploadError> {
        match self {
            UploadError::WithCleanupFailure { cleanup, .. } => Some(cleanup),
            UploadError::CleanupFailed { .. } => Some(self),
            _ => None,
        }
    }
}
