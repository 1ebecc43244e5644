use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::device::DeviceId;
use crate::error::SyncError;
use crate::sync::wire::{ConfigUpdate, Envelope, LogEntry, RemoteConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Access to the remote configuration resource of a device.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn fetch_config(&self, device_id: &DeviceId) -> Result<RemoteConfig, SyncError>;

    async fn replace_config(
        &self,
        device_id: &DeviceId,
        update: &ConfigUpdate,
    ) -> Result<RemoteConfig, SyncError>;

    async fn fetch_logs(&self, device_id: &DeviceId, limit: u32)
    -> Result<Vec<LogEntry>, SyncError>;
}

/// [`ConfigTransport`] over the device backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| SyncError::NetworkUnavailable(err.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn config_url(&self, device_id: &DeviceId) -> Result<Url, SyncError> {
        self.endpoint("config", device_id)
    }

    fn logs_url(&self, device_id: &DeviceId) -> Result<Url, SyncError> {
        self.endpoint("logs", device_id)
    }

    /// The device id is a single path segment, percent-encoded.
    fn endpoint(&self, resource: &str, device_id: &DeviceId) -> Result<Url, SyncError> {
        let invalid = |reason: String| {
            SyncError::NetworkUnavailable(format!("invalid base URL '{}': {reason}", self.base_url))
        };
        let mut url = Url::parse(&self.base_url).map_err(|err| invalid(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["api", resource, device_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl ConfigTransport for HttpTransport {
    async fn fetch_config(&self, device_id: &DeviceId) -> Result<RemoteConfig, SyncError> {
        let url = self.config_url(device_id)?;
        debug!(%url, "GET config");
        let response = self.client.get(url).send().await.map_err(map_request_error)?;
        read_envelope(response).await
    }

    async fn replace_config(
        &self,
        device_id: &DeviceId,
        update: &ConfigUpdate,
    ) -> Result<RemoteConfig, SyncError> {
        let url = self.config_url(device_id)?;
        debug!(%url, alarms = update.alarms.len(), threshold = update.light_threshold, "PUT config");
        let response = self
            .client
            .put(url)
            .json(update)
            .send()
            .await
            .map_err(map_request_error)?;
        read_envelope(response).await
    }

    async fn fetch_logs(
        &self,
        device_id: &DeviceId,
        limit: u32,
    ) -> Result<Vec<LogEntry>, SyncError> {
        let url = self.logs_url(device_id)?;
        debug!(%url, limit, "GET logs");
        let response = self
            .client
            .get(url)
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(map_request_error)?;
        read_envelope(response).await
    }
}

fn map_request_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::NetworkUnavailable(err.to_string())
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, SyncError> {
    let status = response.status();
    let body = response.text().await.map_err(map_request_error)?;
    let envelope = serde_json::from_str::<Envelope<T>>(&body);

    if !status.is_success() {
        let message = envelope
            .ok()
            .and_then(|envelope| envelope.error)
            .unwrap_or_else(|| status_text(status));
        return Err(SyncError::ServerRejected {
            status: Some(status.as_u16()),
            message,
        });
    }

    let envelope = envelope.map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
    if !envelope.success {
        return Err(SyncError::ServerRejected {
            status: Some(status.as_u16()),
            message: envelope
                .error
                .unwrap_or_else(|| "request reported success=false".to_string()),
        });
    }
    envelope
        .data
        .ok_or_else(|| SyncError::MalformedResponse("envelope without data".to_string()))
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}
