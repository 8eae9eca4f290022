use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::models::{
    AudioAssets, ConfigDocument, ConfigUpdate, CountryCatalog, ServiceMessage, StatusSnapshot,
    StopAudioRequest, TriggerPrimaryRequest, TriggerSecondaryRequest,
};

// ===== ERRORS =====

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The service could not be reached or the connection broke.
    #[error("{endpoint} unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },
    #[error("{endpoint} timed out")]
    Timeout { endpoint: String },
    /// The service answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {detail}")]
    Rejected { endpoint: String, status: u16, detail: String },
    #[error("failed to decode {endpoint} response: {reason}")]
    Decode { endpoint: String, reason: String },
}

impl ApiError {
    /// Text to show the user: the service's own detail for rejections.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { detail, .. } => detail.clone(),
            ApiError::Unavailable { .. } | ApiError::Timeout { .. } => "Network Error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { .. })
    }
}

// ===== SERVICE BOUNDARY =====

/// The remote Athan service as seen by this client. Each call is one request.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn get_status(&self) -> Result<StatusSnapshot, ApiError>;
    async fn get_config(&self) -> Result<ConfigDocument, ApiError>;
    async fn get_countries(&self) -> Result<CountryCatalog, ApiError>;
    async fn get_audio_files(&self) -> Result<AudioAssets, ApiError>;
    /// Sends a partial document; the store merges it by key.
    async fn post_config(&self, update: &ConfigUpdate) -> Result<ServiceMessage, ApiError>;
    async fn trigger_primary(&self, request: &TriggerPrimaryRequest) -> Result<ServiceMessage, ApiError>;
    async fn trigger_secondary(
        &self,
        request: &TriggerSecondaryRequest,
    ) -> Result<ServiceMessage, ApiError>;
    async fn stop_audio(&self, request: &StopAudioRequest) -> Result<ServiceMessage, ApiError>;
}

#[async_trait]
impl<T: DashboardApi + ?Sized> DashboardApi for std::sync::Arc<T> {
    async fn get_status(&self) -> Result<StatusSnapshot, ApiError> {
        (**self).get_status().await
    }

    async fn get_config(&self) -> Result<ConfigDocument, ApiError> {
        (**self).get_config().await
    }

    async fn get_countries(&self) -> Result<CountryCatalog, ApiError> {
        (**self).get_countries().await
    }

    async fn get_audio_files(&self) -> Result<AudioAssets, ApiError> {
        (**self).get_audio_files().await
    }

    async fn post_config(&self, update: &ConfigUpdate) -> Result<ServiceMessage, ApiError> {
        (**self).post_config(update).await
    }

    async fn trigger_primary(&self, request: &TriggerPrimaryRequest) -> Result<ServiceMessage, ApiError> {
        (**self).trigger_primary(request).await
    }

    async fn trigger_secondary(
        &self,
        request: &TriggerSecondaryRequest,
    ) -> Result<ServiceMessage, ApiError> {
        (**self).trigger_secondary(request).await
    }

    async fn stop_audio(&self, request: &StopAudioRequest) -> Result<ServiceMessage, ApiError> {
        (**self).stop_audio(request).await
    }
}

// ===== CLIENT IMPLEMENTATION =====

#[derive(Debug, Clone)]
pub struct AthanClient {
    base_url: Url,
    http: reqwest::Client,
}

impl AthanClient {
    /// Creates a new AthanClient. Every request carries the configured timeout.
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { base_url: config.base_url.clone(), http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url.join(path).map_err(|e| ApiError::Unavailable {
            endpoint: path.to_string(),
            reason: format!("invalid endpoint URL: {}", e),
        })
    }

    /// Helper to turn a transport failure into an ApiError
    fn transport_error(endpoint: &str, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout { endpoint: endpoint.to_string() }
        } else {
            ApiError::Unavailable { endpoint: endpoint.to_string(), reason: error.to_string() }
        }
    }

    /// Helper to read a response body, mapping non-success statuses to rejections
    async fn read_response<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| Self::transport_error(endpoint, e))?;

        if !status.is_success() {
            return Err(ApiError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                detail: Self::error_detail(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            endpoint: endpoint.to_string(),
            reason: format!("{} - Response: {}", e, body),
        })
    }

    /// Extracts the service's `detail` (or `message`) from an error body.
    fn error_detail(status: StatusCode, body: &str) -> String {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            for key in ["detail", "message", "error"] {
                match value.get(key) {
                    Some(serde_json::Value::String(text)) => return text.clone(),
                    Some(serde_json::Value::Null) | None => continue,
                    Some(other) => return other.to_string(),
                }
            }
        }
        if !body.trim().is_empty() {
            return body.trim().to_string();
        }
        status.canonical_reason().unwrap_or("request failed").to_string()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        tracing::debug!("GET {}", url);
        let response = self.http.get(url).send().await.map_err(|e| Self::transport_error(path, e))?;
        Self::read_response(path, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        tracing::debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Self::transport_error(path, e))?;
        Self::read_response(path, response).await
    }
}

#[async_trait]
impl DashboardApi for AthanClient {
    async fn get_status(&self) -> Result<StatusSnapshot, ApiError> {
        self.get_json("status").await
    }

    async fn get_config(&self) -> Result<ConfigDocument, ApiError> {
        self.get_json("config").await
    }

    async fn get_countries(&self) -> Result<CountryCatalog, ApiError> {
        self.get_json("countries").await
    }

    async fn get_audio_files(&self) -> Result<AudioAssets, ApiError> {
        self.get_json("audio-files").await
    }

    async fn post_config(&self, update: &ConfigUpdate) -> Result<ServiceMessage, ApiError> {
        self.post_json("config", update).await
    }

    async fn trigger_primary(&self, request: &TriggerPrimaryRequest) -> Result<ServiceMessage, ApiError> {
        self.post_json("test-play", request).await
    }

    async fn trigger_secondary(
        &self,
        request: &TriggerSecondaryRequest,
    ) -> Result<ServiceMessage, ApiError> {
        self.post_json("test-reminder", request).await
    }

    async fn stop_audio(&self, request: &StopAudioRequest) -> Result<ServiceMessage, ApiError> {
        self.post_json("stop-audio", request).await
    }
}
