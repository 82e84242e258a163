//! Remote catalog module
//!
//! The narrow capability set the upload core needs from the remote store:
//! quota query, listing of owned objects, deletion and creation.
//!
//! # Design
//!
//! Uses a trait-based approach so the reclaimer and pipeline can run
//! against any backend:
//! - `RemoteCatalog` trait defines the interface
//! - [`crate::drive::DriveClient`] talks to Google Drive
//! - [`memory::MemoryCatalog`] keeps everything in memory for tests
//!
//! # Example
//!
//! ```
//! use drive_uploadr::catalog::memory::MemoryCatalog;
//! use drive_uploadr::catalog::{QuotaSnapshot, RemoteCatalog};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(1000), 950));
//! catalog.add_object("1", "old.zip", 80);
//!
//! let quota = catalog.get_quota().await?;
//! assert_eq!(quota.free(), Some(50));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

pub mod memory;

/// Byte stream handed to [`RemoteCatalog::create`]
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Remote catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Authentication error: {0}")]
    Auth(#[from] crate::drive::auth::AuthError),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage quota exceeded")]
    QuotaExceeded,

    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Storage quota reported by the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Storage limit in bytes, `None` when the store reports no limit
    pub limit: Option<u64>,
    /// Bytes currently in use
    pub used: u64,
}

impl QuotaSnapshot {
    pub fn new(limit: Option<u64>, used: u64) -> Self {
        Self { limit, used }
    }

    /// Free bytes, or `None` for an unbounded quota.
    ///
    /// Usage above the limit yields zero.
    pub fn free(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// An entry in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub size: u64,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
        }
    }
}

/// Parameters of a create call
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub parent_id: String,
    /// Exact length of the content stream in bytes
    pub size: u64,
    /// Destination folder lives on a shared drive
    pub shared_destination: bool,
}

/// Object created by [`RemoteCatalog::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObject {
    pub id: String,
    pub name: String,
}

/// Remote catalog capability set
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Query the quota of the active credential
    async fn get_quota(&self) -> Result<QuotaSnapshot, CatalogError>;

    /// List non-trashed objects owned by the active credential, oldest first
    ///
    /// A single call may return only a bounded page; callers that need
    /// more re-list after acting on the current page.
    async fn list_owned(&self) -> Result<Vec<RemoteObject>, CatalogError>;

    /// Delete an object by id
    ///
    /// Deleting an object that no longer exists is an error.
    async fn delete(&self, id: &str) -> Result<(), CatalogError>;

    /// Create an object from a byte stream
    async fn create(
        &self,
        request: CreateRequest,
        content: ByteStream,
    ) -> Result<CreatedObject, CatalogError>;
}
