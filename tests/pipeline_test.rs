//! Upload Pipeline Integration Tests
//!
//! Runs the full compress → reclaim → upload → cleanup flow against the
//! in-memory catalog and real temporary directories.
//!
//! ## Test Coverage
//!
//! - Directory sources are zipped next to the source and removed afterwards
//! - File sources are uploaded as-is and never deleted
//! - Archive cleanup on upload, reclamation and quota failures
//! - Cleanup failures on success and alongside an upload failure
//! - An existing file at the archive path is never touched
//! - Auto-delete on and off

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use drive_uploadr::catalog::memory::MemoryCatalog;
    use drive_uploadr::catalog::{
        ByteStream, CatalogError, CreateRequest, CreatedObject, QuotaSnapshot, RemoteCatalog,
        RemoteObject,
    };
    use drive_uploadr::pipeline::{UploadPipeline, UploadRequest};
    use drive_uploadr::UploadError;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Create `<tmp>/data/reports` with a couple of files
    fn reports_dir() -> (TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let reports = tmp.path().join("data").join("reports");
        std::fs::create_dir_all(reports.join("2024")).unwrap();
        std::fs::write(reports.join("summary.txt"), "total: 42\n").unwrap();
        std::fs::write(reports.join("2024").join("jan.csv"), "day,amount\n1,10\n").unwrap();
        (tmp, reports)
    }

    fn zip_entries(content: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(content.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn sibling(source: &Path, name: &str) -> PathBuf {
        source.parent().unwrap().join(name)
    }

    /// Catalog whose `create` deletes the local archive before answering,
    /// so the pipeline's own cleanup finds nothing to remove
    struct ArchiveStealingCatalog {
        inner: MemoryCatalog,
        archive: PathBuf,
        reject_upload: bool,
    }

    impl ArchiveStealingCatalog {
        fn new(archive: PathBuf, reject_upload: bool) -> Self {
            Self {
                inner: MemoryCatalog::new(QuotaSnapshot::new(None, 0)),
                archive,
                reject_upload,
            }
        }
    }

    #[async_trait]
    impl RemoteCatalog for ArchiveStealingCatalog {
        async fn get_quota(&self) -> Result<QuotaSnapshot, CatalogError> {
            self.inner.get_quota().await
        }

        async fn list_owned(&self) -> Result<Vec<RemoteObject>, CatalogError> {
            self.inner.list_owned().await
        }

        async fn delete(&self, id: &str) -> Result<(), CatalogError> {
            self.inner.delete(id).await
        }

        async fn create(
            &self,
            request: CreateRequest,
            content: ByteStream,
        ) -> Result<CreatedObject, CatalogError> {
            drop(content);
            std::fs::remove_file(&self.archive).unwrap();

            if self.reject_upload {
                return Err(CatalogError::Api {
                    status: 500,
                    message: "upload backend unavailable".into(),
                });
            }
            Ok(CreatedObject {
                id: "stolen-1".into(),
                name: request.name,
            })
        }
    }

    // ========================================================================
    // Directory sources
    // ========================================================================

    /// /data/reports with override "monthly" uploads monthly.zip and removes it
    #[tokio::test]
    async fn test_directory_upload_with_override_name() {
        let (_tmp, reports) = reports_dir();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));
        let request = UploadRequest::new(&reports, "folder-id").with_name_override("monthly");

        let outcome = pipeline.run(&request).await.unwrap();

        assert_eq!(outcome.name, "monthly.zip");
        assert!(!sibling(&reports, "monthly.zip").exists());

        let uploads = pipeline.catalog().uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].name, "monthly.zip");
        assert_eq!(uploads[0].parent_id, "folder-id");
        assert_eq!(uploads[0].content.len() as u64, outcome.bytes);

        let entries = zip_entries(&uploads[0].content);
        assert!(entries.contains(&"summary.txt".to_string()));
        assert!(entries.contains(&"2024/jan.csv".to_string()));
    }

    #[tokio::test]
    async fn test_directory_upload_uses_directory_name() {
        let (_tmp, reports) = reports_dir();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));

        let outcome = pipeline
            .run(&UploadRequest::new(&reports, "folder-id"))
            .await
            .unwrap();

        assert_eq!(outcome.name, "reports.zip");
        assert!(!sibling(&reports, "reports.zip").exists());
        // source untouched
        assert!(reports.join("summary.txt").exists());
    }

    #[tokio::test]
    async fn test_archive_removed_when_upload_fails() {
        let (_tmp, reports) = reports_dir();
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(None, 0));
        catalog.fail_create();
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UploadFailed(_)));
        assert!(err.cleanup_failure().is_none());
        assert!(!sibling(&reports, "reports.zip").exists());
    }

    #[tokio::test]
    async fn test_archive_removed_when_reclamation_fails() {
        let (_tmp, reports) = reports_dir();
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(100), 100));
        catalog.add_object("old", "old.zip", 100);
        catalog.fail_delete("old");
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id").with_auto_delete(true))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::DeletionFailed { .. }));
        assert!(!sibling(&reports, "reports.zip").exists());
        assert!(pipeline.catalog().uploads().is_empty());
    }

    #[tokio::test]
    async fn test_archive_removed_when_quota_query_fails() {
        let (_tmp, reports) = reports_dir();
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(100), 0));
        catalog.fail_quota();
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id").with_auto_delete(true))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::QuotaQueryFailed(_)));
        assert!(!sibling(&reports, "reports.zip").exists());
    }

    #[tokio::test]
    async fn test_existing_archive_path_is_left_alone() {
        let (_tmp, reports) = reports_dir();
        let existing = sibling(&reports, "reports.zip");
        std::fs::write(&existing, "USER DATA").unwrap();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::CompressionFailed(_)));
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "USER DATA");
        assert!(pipeline.catalog().uploads().is_empty());
    }

    // ========================================================================
    // Cleanup failures
    // ========================================================================

    #[tokio::test]
    async fn test_cleanup_failure_after_successful_upload() {
        let (_tmp, reports) = reports_dir();
        let archive = sibling(&reports, "reports.zip");
        let pipeline = UploadPipeline::new(ArchiveStealingCatalog::new(archive.clone(), false));

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id"))
            .await
            .unwrap_err();

        match &err {
            UploadError::CleanupFailed { path, source } => {
                assert_eq!(path, &archive);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.cleanup_failure().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_failure_attached_to_upload_failure() {
        let (_tmp, reports) = reports_dir();
        let archive = sibling(&reports, "reports.zip");
        let pipeline = UploadPipeline::new(ArchiveStealingCatalog::new(archive, true));

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::WithCleanupFailure { .. }));
        assert!(matches!(
            err.primary(),
            UploadError::UploadFailed(CatalogError::Api { status: 500, .. })
        ));
        assert!(matches!(
            err.cleanup_failure(),
            Some(UploadError::CleanupFailed { .. })
        ));
    }

    // ========================================================================
    // File sources
    // ========================================================================

    #[tokio::test]
    async fn test_file_upload_keeps_source() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("backup.tar.gz");
        std::fs::write(&file, b"archive bytes").unwrap();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));

        let outcome = pipeline
            .run(&UploadRequest::new(&file, "folder-id").with_name_override("nightly"))
            .await
            .unwrap();

        assert_eq!(outcome.name, "nightly.gz");
        assert_eq!(outcome.bytes, 13);
        assert!(file.exists());
        assert_eq!(pipeline.catalog().uploads()[0].content, b"archive bytes");
    }

    #[tokio::test]
    async fn test_file_source_survives_upload_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("notes.txt");
        std::fs::write(&file, b"notes").unwrap();
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(None, 0));
        catalog.fail_create();
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&file, "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UploadFailed(_)));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));

        let err = pipeline
            .run(&UploadRequest::new(tmp.path().join("nope"), "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::SourceUnreadable { .. }));
        assert!(pipeline.catalog().uploads().is_empty());
    }

    // ========================================================================
    // Auto-delete
    // ========================================================================

    #[tokio::test]
    async fn test_auto_delete_makes_room_before_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("new.bin");
        std::fs::write(&file, vec![7u8; 200]).unwrap();

        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(1000), 950));
        catalog.add_object("1", "oldest.bin", 80);
        catalog.add_object("2", "older.bin", 100);
        catalog.add_object("3", "newest.bin", 500);
        let pipeline = UploadPipeline::new(catalog);

        let outcome = pipeline
            .run(&UploadRequest::new(&file, "folder-id").with_auto_delete(true))
            .await
            .unwrap();

        let report = outcome.reclaim.unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(pipeline.catalog().deleted(), vec!["1", "2"]);
        assert_eq!(pipeline.catalog().uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_without_auto_delete_upload_fails_on_quota() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("new.bin");
        std::fs::write(&file, vec![7u8; 200]).unwrap();

        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(1000), 950));
        catalog.add_object("1", "oldest.bin", 950);
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&file, "folder-id"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::UploadFailed(CatalogError::QuotaExceeded)
        ));
        assert!(pipeline.catalog().deleted().is_empty());
        assert_eq!(pipeline.catalog().list_calls(), 0);
    }

    /// Nothing left to evict: the upload is still attempted and fails on
    /// the remote quota, and the archive is still removed
    #[tokio::test]
    async fn test_upload_attempted_after_empty_listing() {
        let (_tmp, reports) = reports_dir();
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(1000), 990));
        let pipeline = UploadPipeline::new(catalog);

        let err = pipeline
            .run(&UploadRequest::new(&reports, "folder-id").with_auto_delete(true))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::UploadFailed(CatalogError::QuotaExceeded)
        ));
        assert_eq!(pipeline.catalog().list_calls(), 1);
        assert!(!sibling(&reports, "reports.zip").exists());
    }

    #[tokio::test]
    async fn test_shared_destination_is_passed_through() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        let pipeline = UploadPipeline::new(MemoryCatalog::new(QuotaSnapshot::new(None, 0)));

        pipeline
            .run(&UploadRequest::new(&file, "shared-folder").with_shared_destination(true))
            .await
            .unwrap();

        let upload = &pipeline.catalog().uploads()[0];
        assert!(upload.shared_destination);
        assert_eq!(upload.name, "a.txt");
        assert_eq!(upload.parent_id, "shared-folder");
    }
}
