//! HTTP backend over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sedno_core::request::{SessionResultResponse, SessionStatusResponse};
use sedno_core::{
    AnalysisBackend, AnalyzeRequest, AnalyzeResponse, FrameStream, RequestError, SednoConfig,
    StreamFault,
};
use serde::de::DeserializeOwned;

/// Analysis backend reached over HTTP.
///
/// Endpoints:
/// - `POST /api/analyze` opens a session
/// - `GET /api/stream/{id}` streams its events as SSE
/// - `GET /api/session/{id}` and `/api/session/{id}/result` report on it
/// - `GET /health`
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend for `base_url`.
    ///
    /// Only connection establishment is bounded by `connect_timeout`; an
    /// open stream may stay idle indefinitely.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RequestError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a backend from the loaded configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &SednoConfig) -> Result<Self, RequestError> {
        Self::new(
            config.api_url.clone(),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server-side status of a session.
    ///
    /// # Errors
    /// Returns error on network failure or a non-success status.
    pub async fn session_status(&self, session_id: &str) -> Result<SessionStatusResponse, RequestError> {
        self.get_json(&format!("/api/session/{session_id}")).await
    }

    /// Stored result of a finished session.
    ///
    /// # Errors
    /// Returns error on network failure or a non-success status.
    pub async fn session_result(&self, session_id: &str) -> Result<SessionResultResponse, RequestError> {
        self.get_json(&format!("/api/session/{session_id}/result")).await
    }

    /// Backend health document.
    ///
    /// # Errors
    /// Returns error on network failure or a non-success status.
    pub async fn health(&self) -> Result<serde_json::Value, RequestError> {
        self.get_json("/health").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| RequestError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn open(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, RequestError> {
        tracing::debug!(query = %request.query, "Submitting analysis");
        let response = self
            .client
            .post(self.url("/api/analyze"))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;
        response
            .json::<AnalyzeResponse>()
            .await
            .map_err(|e| RequestError::InvalidResponse(format!("Failed to parse analyze response: {e}")))
    }

    async fn stream(&self, session_id: &str) -> Result<FrameStream, RequestError> {
        let response = self
            .client
            .get(self.url(&format!("/api/stream/{session_id}")))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;

        let frames = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamFault::Network(e.to_string())));
        Ok(frames.boxed())
    }
}

fn network_error(e: reqwest::Error) -> RequestError {
    RequestError::Network(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RequestError::Status {
        status: status.as_u16(),
        body,
    })
}
