//! Drive Uploadr Library
//!
//! Uploads a file or directory to a Google Drive folder under a fixed
//! storage quota.
//!
//! # Features
//!
//! - **Compression**: Directories are zipped before upload and the archive
//!   is removed afterwards, whatever the outcome
//! - **Quota Aware**: Optionally evicts the oldest owned files until the
//!   upload fits
//! - **Testable**: The remote store sits behind the [`catalog::RemoteCatalog`]
//!   trait, with an in-memory implementation for tests
//!
//! # Example
//!
//! ```no_run
//! use drive_uploadr::{config::Config, drive::auth::ServiceAccountKey, drive::DriveClient};
//! use drive_uploadr::pipeline::UploadPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("uploadr.yaml")?;
//!     let key = ServiceAccountKey::from_base64(&config.drive.credentials)?;
//!     let client = DriveClient::from_service_account(key, &config.drive.api_url, config.drive.page_size)?;
//!     let outcome = UploadPipeline::new(client).run(&config.upload_request()).await?;
//!     println!("uploaded {} ({} bytes)", outcome.name, outcome.bytes);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod config;
pub mod drive;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod reclaim;

// Re-export commonly used types
pub use config::Config;
pub use error::UploadError;
pub use pipeline::{UploadOutcome, UploadPipeline, UploadRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
