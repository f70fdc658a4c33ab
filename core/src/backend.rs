// Remote backend client — the HTTP service an online peer calls on behalf
// of the mesh.
//
// Every failure mode (transport error, non-2xx, invalid JSON) maps to a
// `BackendError`; the gateway converts those to textual error results and
// routes them back through the normal response path so the requester's
// pending state always resolves to something.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::patient::PatientRecord;

/// Results kept from a backend search, regardless of how many it returns
pub const SEARCH_RESULT_CAP: usize = 5;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// The remote HTTP service, seen through the gateway's eyes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Name-partial-match search; the caller keeps at most
    /// [`SEARCH_RESULT_CAP`] records.
    async fn search_patients(&self, name: &str) -> Result<Vec<PatientRecord>, BackendError>;

    /// Create a record from a JSON document; success is any 2xx.
    /// Returns the response body text for relaying to the requester.
    async fn create_patient(&self, json: &str) -> Result<String, BackendError>;

    /// Forward a raw, already-validated JSON document verbatim
    async fn forward_raw(&self, json: &str) -> Result<String, BackendError>;
}

/// Configuration for the HTTP backend client
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the service, no trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(8),
        }
    }
}

/// reqwest-based implementation of [`RemoteBackend`]
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn check_status(status: reqwest::StatusCode) -> Result<(), BackendError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn search_patients(&self, name: &str) -> Result<Vec<PatientRecord>, BackendError> {
        let url = format!("{}/patients/search", self.config.base_url);
        debug!(%name, "backend search");

        let response = self
            .client
            .get(&url)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Self::check_status(response.status())?;

        let mut records: Vec<PatientRecord> = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidBody(e.to_string()))?;
        records.truncate(SEARCH_RESULT_CAP);
        Ok(records)
    }

    async fn create_patient(&self, json: &str) -> Result<String, BackendError> {
        let url = format!("{}/patients", self.config.base_url);
        debug!("backend create");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json.to_string())
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Self::check_status(response.status())?;

        response
            .text()
            .await
            .map_err(|e| BackendError::InvalidBody(e.to_string()))
    }

    async fn forward_raw(&self, json: &str) -> Result<String, BackendError> {
        let url = format!("{}/ingest", self.config.base_url);
        debug!("backend raw forward");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json.to_string())
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Self::check_status(response.status())?;

        response
            .text()
            .await
            .map_err(|e| BackendError::InvalidBody(e.to_string()))
    }
}
