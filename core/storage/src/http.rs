//! HTTP client for the cloud store's bulk sync endpoint.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use fitsync_common::{Error, Result};

use crate::provider::{CloudStore, ExportResponse, ImportRequest, ImportResponse};

/// Default request timeout. Hung calls are bounded here, not by the engine.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the HTTP cloud store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCloudConfig {
    /// API base URL, e.g. `https://fit.example.com/api/`.
    pub base_url: String,
    /// Bearer token identifying the user session.
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl HttpCloudConfig {
    /// Settings for `base_url` with no token and the default timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Error body returned by the server on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Cloud store reached over `GET /sync` and `POST /sync`.
pub struct HttpCloudStore {
    http: Client,
    sync_url: Url,
    token: Option<String>,
}

impl HttpCloudStore {
    /// Create a new client.
    ///
    /// # Errors
    /// - Base URL does not parse
    /// - HTTP client cannot be built
    pub fn new(config: &HttpCloudConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", config.base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let sync_url = base
            .join("sync")
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", config.base_url, e)))?;

        let http = Client::builder()
            .user_agent("FitSync/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            sync_url,
            token: config.token.clone(),
        })
    }

    /// The endpoint both operations talk to.
    pub fn sync_url(&self) -> &Url {
        &self.sync_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a response to its body or to an `Error::Server`.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                if e.is_decode() {
                    Error::Serialization(format!("Invalid sync response: {}", e))
                } else {
                    Error::Network(format!("Failed to read response: {}", e))
                }
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .ok()
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or(body);

        Err(Error::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CloudStore for HttpCloudStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn export(&self, since: Option<DateTime<Utc>>) -> Result<ExportResponse> {
        let mut request = self.authorize(self.http.get(self.sync_url.clone()));
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        debug!("GET {} since {:?}", self.sync_url, since);

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to export: {}", e)))?;

        self.handle_response(response).await
    }

    async fn import(&self, request: ImportRequest) -> Result<ImportResponse> {
        debug!(
            "POST {} with {} records",
            self.sync_url,
            request.data.record_count()
        );

        let response = self
            .authorize(self.http.post(self.sync_url.clone()))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to import: {}", e)))?;

        self.handle_response(response).await
    }
}
