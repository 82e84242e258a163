//! Google Drive client
//!
//! Implements [`RemoteCatalog`] against the Drive v3 REST API.
//!
//! # Tracing
//!
//! Every operation is instrumented:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | About | `drive.get_quota` | limit, usage |
//! | List | `drive.list_owned` | owner, count |
//! | Delete | `drive.delete` | file_id |
//! | Create | `drive.create` | name, parent, bytes, file_id |
//!
//! # Example
//!
//! ```no_run
//! use drive_uploadr::catalog::RemoteCatalog;
//! use drive_uploadr::drive::auth::StaticToken;
//! use drive_uploadr::drive::{DriveClient, DriveClientConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DriveClientConfig::new("svc@project.iam.gserviceaccount.com");
//! let client = DriveClient::new(config, Arc::new(StaticToken::new("ya29.token")))?;
//!
//! let quota = client.get_quota().await?;
//! println!("free: {:?}", quota.free());
//! # Ok(())
//! # }
//! ```

pub mod auth;

use crate::catalog::{
    ByteStream, CatalogError, CreateRequest, CreatedObject, QuotaSnapshot, RemoteCatalog,
    RemoteObject,
};
use async_trait::async_trait;
use auth::{ServiceAccountKey, ServiceAccountTokens, TokenProvider};
use bytes::Bytes;
use futures::{stream, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default Drive API root
pub const DEFAULT_API_URL: &str = "https://www.googleapis.com";

/// Largest page the files.list endpoint serves
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Path segment escaping for file ids; unreserved characters pass through
const FILE_ID: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Drive client configuration
#[derive(Debug, Clone)]
pub struct DriveClientConfig {
    /// API root, without trailing slash
    pub api_url: String,
    /// Email of the credential whose files are listed
    pub owner: String,
    /// Page size for files.list
    pub page_size: u32,
    pub connect_timeout: Duration,
}

impl DriveClientConfig {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            owner: owner.into(),
            page_size: MAX_PAGE_SIZE,
            connect_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

/// Drive v3 client
pub struct DriveClient {
    config: DriveClientConfig,
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl DriveClient {
    /// Create a client using the given token provider
    pub fn new(
        config: DriveClientConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            config,
            http,
            tokens,
        })
    }

    /// Create a client authenticated as a service account
    ///
    /// Listing is scoped to files owned by the account's email.
    pub fn from_service_account(
        key: ServiceAccountKey,
        api_url: &str,
        page_size: u32,
    ) -> Result<Self, CatalogError> {
        let config = DriveClientConfig::new(key.client_email.clone())
            .with_api_url(api_url)
            .with_page_size(page_size);
        let tokens = ServiceAccountTokens::new(key)?;
        Self::new(config, Arc::new(tokens))
    }

    pub fn config(&self) -> &DriveClientConfig {
        &self.config
    }

    /// files.list query selecting non-trashed files owned by the credential
    pub fn owned_query(&self) -> String {
        format!(
            "'{}' in owners and trashed = false",
            self.config.owner.replace('\\', "\\\\").replace('\'', "\\'")
        )
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.config.api_url)
    }

    async fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, CatalogError> {
        let token = self.tokens.access_token().await?;
        Ok(builder.bearer_auth(token))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    #[serde(default)]
    storage_quota: Option<StorageQuota>,
}

#[derive(Debug, Deserialize)]
struct StorageQuota {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    usage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

#[derive(Debug, Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Quota from the about resource.
///
/// A missing, zero or unparseable limit means the account is unbounded.
fn parse_quota(quota: Option<StorageQuota>) -> Result<QuotaSnapshot, CatalogError> {
    let quota = quota.ok_or_else(|| {
        CatalogError::InvalidResponse("about response has no storageQuota".into())
    })?;

    let limit = quota
        .limit
        .as_deref()
        .and_then(|limit| limit.parse::<u64>().ok())
        .filter(|limit| *limit > 0);

    let used = match quota.usage.as_deref() {
        None => 0,
        Some(usage) => usage.parse::<u64>().map_err(|_| {
            CatalogError::InvalidResponse(format!("invalid storage usage '{}'", usage))
        })?,
    };

    Ok(QuotaSnapshot::new(limit, used))
}

/// Turn a non-success response into a [`CatalogError`]
async fn check_response(
    response: reqwest::Response,
    file_id: Option<&str>,
) -> Result<reqwest::Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(id) = file_id {
            return Err(CatalogError::NotFound(id.to_string()));
        }
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            if envelope
                .error
                .errors
                .iter()
                .any(|detail| detail.reason == "storageQuotaExceeded")
            {
                return Err(CatalogError::QuotaExceeded);
            }
            Err(CatalogError::Api {
                status: status.as_u16(),
                message: envelope.error.message,
            })
        }
        Err(_) => Err(CatalogError::Api {
            status: status.as_u16(),
            message: body,
        }),
    }
}

#[async_trait]
impl RemoteCatalog for DriveClient {
    #[tracing::instrument(
        name = "drive.get_quota",
        skip(self),
        fields(
            quota.limit = tracing::field::Empty,
            quota.usage = tracing::field::Empty
        ),
        err
    )]
    async fn get_quota(&self) -> Result<QuotaSnapshot, CatalogError> {
        let request = self
            .http
            .get(format!("{}/drive/v3/about", self.config.api_url))
            .query(&[("fields", "storageQuota")]);
        let response = self.authorized(request).await?.send().await?;
        let about: AboutResponse = check_response(response, None).await?.json().await?;

        let quota = parse_quota(about.storage_quota)?;

        let span = tracing::Span::current();
        if let Some(limit) = quota.limit {
            span.record("quota.limit", limit);
        }
        span.record("quota.usage", quota.used);

        Ok(quota)
    }

    #[tracing::instrument(
        name = "drive.list_owned",
        skip(self),
        fields(drive.owner = %self.config.owner, drive.count = tracing::field::Empty),
        err
    )]
    async fn list_owned(&self) -> Result<Vec<RemoteObject>, CatalogError> {
        let page_size = self.config.page_size.to_string();
        let query = self.owned_query();
        let request = self.http.get(self.files_url()).query(&[
            ("q", query.as_str()),
            ("fields", "files(id,name,size)"),
            ("orderBy", "createdTime asc"),
            ("pageSize", page_size.as_str()),
        ]);
        let response = self.authorized(request).await?.send().await?;
        let list: FileList = check_response(response, None).await?.json().await?;

        let mut objects = Vec::with_capacity(list.files.len());
        for file in list.files {
            let Some(id) = file.id else {
                tracing::warn!(name = ?file.name, "Skipping listed file without id");
                continue;
            };
            let size = file
                .size
                .as_deref()
                .and_then(|size| size.parse::<u64>().ok())
                .unwrap_or(0);
            objects.push(RemoteObject::new(id, file.name.unwrap_or_default(), size));
        }

        tracing::Span::current().record("drive.count", objects.len());
        Ok(objects)
    }

    #[tracing::instrument(name = "drive.delete", skip(self), fields(drive.file_id = %id), err)]
    async fn delete(&self, id: &str) -> Result<(), CatalogError> {
        let url = format!(
            "{}/{}",
            self.files_url(),
            utf8_percent_encode(id, FILE_ID)
        );
        let response = self.authorized(self.http.delete(url)).await?.send().await?;
        check_response(response, Some(id)).await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "drive.create",
        skip(self, request, content),
        fields(
            drive.name = %request.name,
            drive.parent = %request.parent_id,
            upload.bytes = request.size,
            drive.shared = request.shared_destination,
            drive.file_id = tracing::field::Empty
        ),
        err
    )]
    async fn create(
        &self,
        request: CreateRequest,
        content: ByteStream,
    ) -> Result<CreatedObject, CatalogError> {
        let metadata = serde_json::to_string(&FileMetadata {
            name: &request.name,
            parents: [&request.parent_id],
        })
        .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        let boundary = format!("drive-uploadr-{}", uuid::Uuid::new_v4().simple());
        let head = Bytes::from(format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n"
        ));
        let tail = Bytes::from(format!("\r\n--{boundary}--\r\n"));
        let content_length = head.len() as u64 + request.size + tail.len() as u64;

        let body = stream::once(async move { Ok::<_, std::io::Error>(head) })
            .chain(content)
            .chain(stream::once(async move { Ok(tail) }));

        let mut query = vec![("uploadType", "multipart"), ("fields", "id,name")];
        if request.shared_destination {
            query.push(("supportsAllDrives", "true"));
        }

        let builder = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.config.api_url))
            .query(&query)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body));

        let response = self.authorized(builder).await?.send().await?;
        let file: DriveFile = check_response(response, None).await?.json().await?;

        let id = file
            .id
            .ok_or_else(|| CatalogError::InvalidResponse("created file has no id".into()))?;
        tracing::Span::current().record("drive.file_id", id.as_str());

        Ok(CreatedObject {
            id,
            name: file.name.unwrap_or(request.name),
        })
    }
}
