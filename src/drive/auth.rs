//! Service account authentication
//!
//! Exchanges a signed RS256 JWT for an OAuth access token using the
//! `urn:ietf:params:oauth:grant-type:jwt-bearer` grant, and caches the
//! token until shortly before it expires.
//!
//! # Design
//!
//! - `TokenProvider` trait defines the interface used by the Drive client
//! - `ServiceAccountTokens` signs and exchanges assertions
//! - `StaticToken` hands out a fixed token (tests, pre-issued tokens)
//!
//! # Example
//!
//! ```no_run
//! use drive_uploadr::drive::auth::{ServiceAccountKey, ServiceAccountTokens, TokenProvider};
//!
//! # async fn example(encoded: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let key = ServiceAccountKey::from_base64(encoded)?;
//! let tokens = ServiceAccountTokens::new(key)?;
//! let token = tokens.access_token().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// OAuth scope granting full Drive access
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion (the maximum Google accepts)
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Failed to sign assertion: {0}")]
    Signing(String),

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Token endpoint rejected assertion ({status}): {message}")]
    TokenRejected { status: u16, message: String },
}

/// Service account key file contents
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    /// Parse a key file from its JSON text
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        if key.client_email.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "client_email is empty".into(),
            ));
        }

        Ok(key)
    }

    /// Parse a base64-encoded key file
    pub fn from_base64(encoded: &str) -> Result<Self, AuthError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::InvalidCredentials(format!("invalid base64: {}", e)))?;
        let json = String::from_utf8(decoded)
            .map_err(|e| AuthError::InvalidCredentials(format!("invalid UTF-8: {}", e)))?;
        Self::from_json(&json)
    }
}

/// JWT assertion claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Access token source
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a valid bearer token
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fixed access token
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Cached token with expiry
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token provider backed by a service account key
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    client: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    /// Create a provider for the Drive scope
    pub fn new(key: ServiceAccountKey) -> Result<Self, AuthError> {
        Self::with_client(key, reqwest::Client::new())
    }

    /// Create a provider that sends token requests through `client`
    pub fn with_client(key: ServiceAccountKey, client: reqwest::Client) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AuthError::InvalidCredentials(format!("invalid private key: {}", e)))?;

        Ok(Self {
            key,
            encoding_key,
            scope: DRIVE_SCOPE.to_string(),
            client,
            cache: Mutex::new(None),
        })
    }

    /// Override the requested scope
    #[must_use]
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Service account email
    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Build and sign an assertion issued at `issued_at` (unix seconds)
    pub fn sign_assertion(&self, issued_at: i64) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    #[tracing::instrument(
        name = "auth.exchange_assertion",
        skip(self),
        fields(client_email = %self.key.client_email),
        err
    )]
    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.sign_assertion(chrono::Utc::now().timestamp())?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(AuthError::TokenRejected {
                status: status.as_u16(),
                message,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenRequest(format!("invalid token response: {}", e)))?;

        tracing::debug!(expires_in = token.expires_in, "Access token issued");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if Instant::now() + REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
