//! HTTP client for the farm simulation's backend.
//!
//! This module provides the `ApiClient` struct, which implements the
//! `Synchronizer`, `DataSource` and `Probe` seams over JSON/HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{
    Achievement, Coordinates, CropData, DataPoint, DataType, FarmProfile, Feedback, Readings,
};

use super::{ApiError, DataSource, Probe, Synchronizer};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default timeout for the liveness probe in seconds.
/// Short so a hung request cannot hold up detection of a real state change.
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    probe_timeout: Duration,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeouts(
            base_url,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            probe_timeout,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded as one path segment.
    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send_with_retry<F>(&self, url: &Url, build: F) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = build().send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        let response = self
            .send_with_retry(&url, || self.client.get(url.clone()).query(query))
            .await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }

    async fn post<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> Result<(), ApiError> {
        let url = self.url(segments)?;
        self.send_with_retry(&url, || self.client.post(url.clone()).json(body))
            .await?;
        debug!(url = %url, "POST accepted");
        Ok(())
    }
}

#[async_trait]
impl Synchronizer for ApiClient {
    async fn sync_farm_profile(&self, profile: &FarmProfile) -> Result<(), ApiError> {
        self.post(&["profiles"], profile).await
    }

    async fn sync_crop_data(&self, crop: &CropData) -> Result<(), ApiError> {
        self.post(&["crops"], crop).await
    }

    async fn sync_achievement(&self, achievement: &Achievement) -> Result<(), ApiError> {
        self.post(&["achievements"], achievement).await
    }

    async fn sync_feedback(&self, feedback: &Feedback) -> Result<(), ApiError> {
        self.post(&["feedback"], feedback).await
    }
}

#[async_trait]
impl DataSource for ApiClient {
    async fn fetch_remote(
        &self,
        coordinates: Coordinates,
        data_type: &DataType,
    ) -> Result<DataPoint, ApiError> {
        if !data_type.is_supported() {
            return Err(ApiError::NotFound(format!("data type {}", data_type)));
        }

        let readings: Readings = self
            .get(
                &["data", data_type.as_str()],
                &[
                    ("lat", coordinates.lat.to_string()),
                    ("lon", coordinates.lon.to_string()),
                ],
            )
            .await?;

        if let Readings::Unavailable { reason } = readings {
            return Err(ApiError::NotFound(reason));
        }

        debug!(%coordinates, %data_type, "Live data fetched");
        Ok(DataPoint::measured(
            coordinates,
            data_type.clone(),
            readings,
            format!("remote:{}", data_type),
        ))
    }

    async fn fetch_resource(&self, name: &str) -> Result<Value, ApiError> {
        self.get(&["resources", name], &[]).await
    }
}

#[async_trait]
impl Probe for ApiClient {
    async fn probe(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.url(&["health"])?)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(ApiError::from_status(status, ""))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
