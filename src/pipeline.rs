//! Upload pipeline
//!
//! Orchestrates one upload: classify the source, compress directories,
//! reclaim quota when auto-delete is on, upload, then remove the archive
//! if this run created one.
//!
//! # Flow
//!
//! 1. Directory sources are zipped next to the source as `<name>.zip`;
//!    file sources are uploaded as they are
//! 2. With auto-delete, the oldest remote files are evicted until the
//!    artifact fits
//! 3. The artifact is streamed to the destination folder
//! 4. A synthesized archive is deleted on every exit path, exactly once
//!
//! # Example
//!
//! ```no_run
//! use drive_uploadr::catalog::memory::MemoryCatalog;
//! use drive_uploadr::catalog::QuotaSnapshot;
//! use drive_uploadr::pipeline::{UploadPipeline, UploadRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));
//! let request = UploadRequest::new("/data/reports", "folder-id")
//!     .with_name_override("monthly")
//!     .with_auto_delete(true);
//!
//! let outcome = pipeline.run(&request).await?;
//! assert_eq!(outcome.name, "monthly.zip");
//! # Ok(())
//! # }
//! ```

use crate::archive::compress_directory;
use crate::catalog::{CreateRequest, RemoteCatalog};
use crate::error::UploadError;
use crate::reclaim::{ReclaimReport, Reclaimer};
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;

/// Extension of synthesized archives
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Parameters of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub source: PathBuf,
    pub destination_folder: String,
    /// Replaces the source's base name; the extension is kept
    pub name_override: Option<String>,
    pub auto_delete: bool,
    pub shared_destination: bool,
}

impl UploadRequest {
    pub fn new(source: impl Into<PathBuf>, destination_folder: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination_folder: destination_folder.into(),
            name_override: None,
            auto_delete: false,
            shared_destination: false,
        }
    }

    #[must_use]
    pub fn with_name_override(mut self, name: &str) -> Self {
        self.name_override = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete = enabled;
        self
    }

    #[must_use]
    pub fn with_shared_destination(mut self, shared: bool) -> Self {
        self.shared_destination = shared;
        self
    }

    /// Override name, ignoring blank values
    fn override_name(&self) -> Option<&str> {
        self.name_override
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// The local file handed to the upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// Name of the remote file
    pub name: String,
    pub size: u64,
    /// Created by the archiver, removed after the upload attempt
    pub was_synthesized: bool,
}

impl Artifact {
    async fn cleanup(&self) -> Result<(), UploadError> {
        tracing::info!(path = %self.path.display(), "Deleting compressed file");
        tokio::fs::remove_file(&self.path).await.map_err(|source| {
            tracing::error!(
                path = %self.path.display(),
                error = %source,
                "Failed to delete compressed file"
            );
            UploadError::CleanupFailed {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub name: String,
    pub bytes: u64,
    pub remote_id: String,
    /// Present when auto-delete ran
    pub reclaim: Option<ReclaimReport>,
}

/// Remote name of the archive built from `source`
pub fn archive_name(source: &Path, name_override: Option<&str>) -> Result<String, UploadError> {
    let base = match name_override {
        Some(name) => name.to_string(),
        None => base_name(source)?,
    };
    Ok(format!("{}.{}", base, ARCHIVE_EXTENSION))
}

/// Remote name of a file source, keeping its extension
pub fn file_name(source: &Path, name_override: Option<&str>) -> Result<String, UploadError> {
    let extension = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let stem = match name_override {
        Some(name) => name.to_string(),
        None => source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| invalid_source(source))?,
    };

    Ok(format!("{}{}", stem, extension))
}

fn base_name(source: &Path) -> Result<String, UploadError> {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| invalid_source(source))
}

fn invalid_source(source: &Path) -> UploadError {
    UploadError::SourceUnreadable {
        path: source.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "source path has no file name",
        ),
    }
}

/// Quota-aware upload orchestrator
pub struct UploadPipeline<C: RemoteCatalog> {
    catalog: C,
}

impl<C: RemoteCatalog> UploadPipeline<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Run one upload.
    ///
    /// The first failure wins; a failure to remove a synthesized archive
    /// is attached to it, or reported on its own if the upload succeeded.
    #[tracing::instrument(
        name = "pipeline.run",
        skip_all,
        fields(
            source = %request.source.display(),
            destination = %request.destination_folder,
            auto_delete = request.auto_delete
        ),
        err
    )]
    pub async fn run(&self, request: &UploadRequest) -> Result<UploadOutcome, UploadError> {
        let artifact = self.prepare(request).await?;

        let result = self.transfer(&artifact, request).await;

        let cleanup = if artifact.was_synthesized {
            artifact.cleanup().await
        } else {
            Ok(())
        };

        match (result, cleanup) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(cleanup)) => Err(primary.with_cleanup_failure(cleanup)),
        }
    }

    /// Produce the artifact for `request.source`
    async fn prepare(&self, request: &UploadRequest) -> Result<Artifact, UploadError> {
        let source = &request.source;
        let metadata =
            tokio::fs::metadata(source)
                .await
                .map_err(|e| UploadError::SourceUnreadable {
                    path: source.clone(),
                    source: e,
                })?;

        if metadata.is_dir() {
            let named = self.nameable(source).await?;
            let name = archive_name(&named, request.override_name())?;
            let path = named
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(&name);

            let summary = compress_directory(source, &path).await?;

            Ok(Artifact {
                path: summary.path,
                name,
                size: summary.bytes,
                was_synthesized: true,
            })
        } else {
            Ok(Artifact {
                path: source.clone(),
                name: file_name(source, request.override_name())?,
                size: metadata.len(),
                was_synthesized: false,
            })
        }
    }

    /// Paths like `.` have no base name; resolve them first
    async fn nameable(&self, source: &Path) -> Result<PathBuf, UploadError> {
        if source.file_name().is_some() {
            return Ok(source.to_path_buf());
        }
        tokio::fs::canonicalize(source)
            .await
            .map_err(|e| UploadError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })
    }

    /// Reclaim space if requested, then upload
    async fn transfer(
        &self,
        artifact: &Artifact,
        request: &UploadRequest,
    ) -> Result<UploadOutcome, UploadError> {
        let reclaim = if request.auto_delete {
            Some(
                Reclaimer::new(&self.catalog)
                    .ensure_space(artifact.size)
                    .await?,
            )
        } else {
            None
        };

        tracing::info!(
            path = %artifact.path.display(),
            name = %artifact.name,
            bytes = artifact.size,
            destination = %request.destination_folder,
            "Uploading file"
        );

        let file = tokio::fs::File::open(&artifact.path)
            .await
            .map_err(|e| UploadError::SourceUnreadable {
                path: artifact.path.clone(),
                source: e,
            })?;

        let created = self
            .catalog
            .create(
                CreateRequest {
                    name: artifact.name.clone(),
                    parent_id: request.destination_folder.clone(),
                    size: artifact.size,
                    shared_destination: request.shared_destination,
                },
                Box::pin(ReaderStream::new(file)),
            )
            .await
            .map_err(UploadError::UploadFailed)?;

        tracing::info!(id = %created.id, name = %created.name, "Upload completed");

        Ok(UploadOutcome {
            name: artifact.name.clone(),
            bytes: artifact.size,
            remote_id: created.id,
            reclaim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_from_basename() {
        let name = archive_name(Path::new("/data/reports"), None).unwrap();
        assert_eq!(name, "reports.zip");
    }

    #[test]
    fn test_archive_name_with_override() {
        let name = archive_name(Path::new("/data/reports"), Some("monthly")).unwrap();
        assert_eq!(name, "monthly.zip");
    }

    #[test]
    fn test_archive_name_trailing_slash() {
        let name = archive_name(Path::new("/data/reports/"), None).unwrap();
        assert_eq!(name, "reports.zip");
    }

    #[test]
    fn test_file_name_keeps_extension() {
        let name = file_name(Path::new("/data/backup.tar.gz"), None).unwrap();
        assert_eq!(name, "backup.tar.gz");
    }

    #[test]
    fn test_file_name_override_keeps_extension() {
        let name = file_name(Path::new("/data/backup.tar.gz"), Some("nightly")).unwrap();
        assert_eq!(name, "nightly.gz");
    }

    #[test]
    fn test_file_name_without_extension() {
        assert_eq!(file_name(Path::new("/data/README"), None).unwrap(), "README");
        assert_eq!(
            file_name(Path::new("/home/me/.bashrc"), Some("rc")).unwrap(),
            "rc"
        );
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let request = UploadRequest::new("/data/a.txt", "folder").with_name_override("  ");
        assert_eq!(request.override_name(), None);
    }

    #[test]
    fn test_root_has_no_name() {
        let err = archive_name(Path::new("/"), None).unwrap_err();
        assert!(matches!(err, UploadError::SourceUnreadable { .. }));
    }
}
