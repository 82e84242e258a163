//! Space reclamation
//!
//! Frees remote quota for a pending upload by deleting the credential's
//! oldest files first. Free space is read once per episode; afterwards the
//! reclaimer keeps its own running estimate, advanced only by deletions
//! that succeeded.
//!
//! # Algorithm
//!
//! ```text
//! free = limit - used            (no limit: done)
//! while free < required:
//!     list owned files, oldest first
//!     empty listing: stop
//!     for each file:
//!         delete it (failure aborts)
//!         free += size
//!         free >= required: stop
//! ```
//!
//! Running out of files is not an error: the upload that follows fails on
//! its own if the space is really missing.

use crate::catalog::{RemoteCatalog, RemoteObject};
use crate::error::UploadError;
use std::collections::HashSet;

/// Outcome of one reclamation episode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Bytes required by the pending upload
    pub required: u64,
    /// Free space at the start, `None` when the quota is unbounded
    pub initial_free: Option<u64>,
    /// Running estimate when the episode ended
    pub final_free: Option<u64>,
    /// Deleted objects, in deletion order
    pub deleted: Vec<RemoteObject>,
}

impl ReclaimReport {
    /// Whether the estimate reached the requirement
    pub fn satisfied(&self) -> bool {
        self.final_free.map_or(true, |free| free >= self.required)
    }

    /// Total size of the deleted objects
    pub fn reclaimed_bytes(&self) -> u64 {
        self.deleted.iter().map(|object| object.size).sum()
    }
}

/// Evicts the oldest remote objects until enough space is free
pub struct Reclaimer<'a, C: RemoteCatalog + ?Sized> {
    catalog: &'a C,
}

impl<'a, C: RemoteCatalog + ?Sized> Reclaimer<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Make sure at least `required` bytes are free.
    ///
    /// A deletion failure aborts the episode immediately; no further
    /// objects are deleted.
    #[tracing::instrument(
        name = "reclaim.ensure_space",
        skip(self),
        fields(reclaim.deleted = tracing::field::Empty),
        err
    )]
    pub async fn ensure_space(&self, required: u64) -> Result<ReclaimReport, UploadError> {
        let quota = self
            .catalog
            .get_quota()
            .await
            .map_err(UploadError::QuotaQueryFailed)?;

        let mut report = ReclaimReport {
            required,
            initial_free: quota.free(),
            final_free: quota.free(),
            deleted: Vec::new(),
        };

        let Some(mut free) = quota.free() else {
            tracing::info!(required, "Quota is unbounded, nothing to reclaim");
            return Ok(report);
        };

        tracing::info!(free, required, "Ensuring space");

        let mut deleted_ids: HashSet<String> = HashSet::new();
        'passes: while free < required {
            let listed = self
                .catalog
                .list_owned()
                .await
                .map_err(UploadError::ListingFailed)?;

            if listed.is_empty() {
                tracing::warn!(free, required, "No remote files left to delete");
                break;
            }

            let mut progressed = false;
            for object in listed {
                // A stale listing may still show files removed in an earlier pass.
                if deleted_ids.contains(&object.id) {
                    continue;
                }

                tracing::info!(
                    id = %object.id,
                    name = %object.name,
                    size = object.size,
                    "Deleting remote file"
                );
                self.catalog.delete(&object.id).await.map_err(|source| {
                    UploadError::DeletionFailed {
                        id: object.id.clone(),
                        name: object.name.clone(),
                        source,
                    }
                })?;

                progressed = true;
                free = free.saturating_add(object.size);
                deleted_ids.insert(object.id.clone());
                report.deleted.push(object);

                if free >= required {
                    break 'passes;
                }
            }

            if !progressed {
                tracing::warn!(
                    free,
                    required,
                    "Listing returned only files already deleted, giving up"
                );
                break;
            }
        }

        report.final_free = Some(free);
        tracing::Span::current().record("reclaim.deleted", report.deleted.len());
        tracing::info!(
            free,
            required,
            deleted = report.deleted.len(),
            reclaimed = report.reclaimed_bytes(),
            "Space reclamation finished"
        );

        Ok(report)
    }
}
