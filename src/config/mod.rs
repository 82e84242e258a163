//! Configuration module for Drive Uploadr
//!
//! The configuration is an explicit value handed to the pipeline. It is
//! either loaded from a YAML file (with environment variable expansion) or
//! assembled from command line flags and their environment fallbacks.
//!
//! # Example
//!
//! ```yaml
//! upload:
//!   source_path: "/data/reports"
//!   destination_folder: "1AbCdEfGhIjKlMnOp"
//!   file_name: "monthly"
//!   auto_delete: true
//!   shared_drive: false
//! drive:
//!   credentials: "${DRIVE_CREDENTIALS}"
//!   page_size: 1000
//! ```

use crate::drive::{DEFAULT_API_URL, MAX_PAGE_SIZE};
use crate::pipeline::UploadRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upload: UploadSettings,
    pub drive: DriveSettings,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.source_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Source path must not be empty".into(),
            ));
        }

        if self.upload.destination_folder.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Destination folder must not be empty".into(),
            ));
        }

        if self.drive.credentials.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Credentials must not be empty".into(),
            ));
        }

        if !is_valid_http_url(&self.drive.api_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid Drive API URL '{}': must start with http:// or https://",
                self.drive.api_url
            )));
        }

        if self.drive.page_size == 0 || self.drive.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Invalid page size {}: must be between 1 and {}",
                self.drive.page_size, MAX_PAGE_SIZE
            )));
        }

        Ok(())
    }

    /// The upload this configuration describes
    pub fn upload_request(&self) -> UploadRequest {
        UploadRequest {
            source: self.upload.source_path.clone(),
            destination_folder: self.upload.destination_folder.clone(),
            name_override: self.upload.file_name.clone(),
            auto_delete: self.upload.auto_delete,
            shared_destination: self.upload.shared_drive,
        }
    }
}

/// What to upload and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    pub source_path: PathBuf,
    /// Drive folder id
    pub destination_folder: String,
    /// Remote name without extension; defaults to the source's name
    #[serde(default)]
    pub file_name: Option<String>,
    /// Evict the oldest owned files when the quota is short
    #[serde(default)]
    pub auto_delete: bool,
    /// Destination folder is on a shared drive
    #[serde(default)]
    pub shared_drive: bool,
}

/// Drive access
#[derive(Clone, Serialize, Deserialize)]
pub struct DriveSettings {
    /// Base64-encoded service account key file
    pub credentials: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl std::fmt::Debug for DriveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveSettings")
            .field("credentials", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

pub fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

pub fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            upload: UploadSettings {
                source_path: PathBuf::from("/data/reports"),
                destination_folder: "folder-id".into(),
                file_name: Some("monthly".into()),
                auto_delete: true,
                shared_drive: true,
            },
            drive: DriveSettings {
                credentials: "e30=".into(),
                api_url: default_api_url(),
                page_size: default_page_size(),
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_destination() {
        let mut config = config();
        config.upload.destination_folder = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_credentials() {
        let mut config = config();
        config.drive.credentials = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_page_size() {
        let mut config = config();
        config.drive.page_size = 1001;
        assert!(config.validate().is_err());
        config.drive.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_api_url() {
        let mut config = config();
        config.drive.api_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_request() {
        let request = config().upload_request();
        assert_eq!(request.source, PathBuf::from("/data/reports"));
        assert_eq!(request.destination_folder, "folder-id");
        assert_eq!(request.name_override.as_deref(), Some("monthly"));
        assert!(request.auto_delete);
        assert!(request.shared_destination);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let debug = format!("{:?}", config().drive);
        assert!(!debug.contains("e30="));
    }
}
