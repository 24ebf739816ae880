//! REST clients for the imperative Google Cloud surfaces
//!
//! Three services are driven directly: SQL Admin (instances, users,
//! backups, server-side SSL certs), Database Migration Service
//! (connection profiles and migration jobs) and Monitoring (replication
//! lag time series). All requests carry an application-default-credentials
//! bearer token.

pub mod dms;
pub mod monitoring;
pub mod sqladmin;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OAuth scope covering all three services
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Per-request timeout; long-running work is polled, not awaited in-band
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum GcpError {
    /// Structured error returned by a Google API
    #[error("Google API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GcpError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GcpError::Api { code: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, GcpError::Api { code: 409, .. })
    }

    /// Create racing an existing resource; both services signal it as 409
    pub fn is_already_exists(&self) -> bool {
        self.is_conflict()
    }
}

pub type Result<T, E = GcpError> = std::result::Result<T, E>;

/// Error body shape shared by all googleapis.com services
#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Authenticated JSON transport shared by the service clients
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    auth: Arc<dyn gcp_auth::TokenProvider>,
}

impl ApiClient {
    /// Build a client using application-default credentials.
    pub async fn new() -> Result<Self> {
        let auth = gcp_auth::provider()
            .await
            .map_err(|e| GcpError::Auth(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, auth })
    }

    async fn bearer(&self) -> Result<String> {
        let token = self
            .auth
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|e| GcpError::Auth(e.to_string()))?;
        Ok(token.as_str().to_string())
    }

    pub async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let token = self.bearer().await?;
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        Self::decode(resp).await
    }

    pub async fn get_json_with_query<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<R> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<R> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(url)
            .query(query)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn put_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<R> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .put(url)
            .query(query)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn delete_json<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let token = self.bearer().await?;
        let resp = self.http.delete(url).bearer_auth(token).send().await?;
        Self::decode(resp).await
    }

    async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<R>().await?);
        }

        let code = status.as_u16();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);
        Err(GcpError::Api { code, message })
    }
}
