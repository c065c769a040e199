//! Detail fetch services
//!
//! - [`HttpDetailFetchService`]: `GET {endpoint}/{canonical name}` returning a JSON patch
//! - [`OfflineDetailFetcher`]: always unavailable; the store serves cached records only

use crate::details::SpeciesDetailPatch;
use async_trait::async_trait;
use pxf_common::config::DetailsConfig;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// External collaborator supplying species details
#[async_trait]
pub trait DetailFetchService: Send + Sync {
    async fn fetch(&self, canonical_name: &str) -> Result<SpeciesDetailPatch, DetailFetchError>;
}

/// Detail fetch failure
///
/// Always recoverable: the store treats it as a miss and never caches it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetailFetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Service has no record for this species
    #[error("No details for {0}")]
    NotFound(String),

    #[error("Detail service not available: {0}")]
    Unavailable(String),
}

/// HTTP detail service client
pub struct HttpDetailFetchService {
    client: Client,
    base_url: Url,
}

impl HttpDetailFetchService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DetailFetchError> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| DetailFetchError::Unavailable(format!("Invalid endpoint {}: {}", endpoint, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(DetailFetchError::Unavailable(format!(
                "Endpoint cannot be a base URL: {}",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DetailFetchError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Build from config; `Ok(None)` when no endpoint is configured
    pub fn from_config(config: &DetailsConfig) -> Result<Option<Self>, DetailFetchError> {
        match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(endpoint) => {
                Self::new(endpoint, Duration::from_millis(config.timeout_ms)).map(Some)
            }
            None => Ok(None),
        }
    }

    /// URL for one species, with the name percent-encoded as a path segment
    pub fn species_url(&self, canonical_name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(canonical_name);
        }
        url
    }
}

#[async_trait]
impl DetailFetchService for HttpDetailFetchService {
    async fn fetch(&self, canonical_name: &str) -> Result<SpeciesDetailPatch, DetailFetchError> {
        let url = self.species_url(canonical_name);
        debug!(canonical_name, url = %url, "Fetching species details");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DetailFetchError::Network(format!("Detail request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DetailFetchError::NotFound(canonical_name.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(DetailFetchError::Api(format!(
                    "Detail service returned {}: {}",
                    status, body
                )))
            }
            _ => response
                .json::<SpeciesDetailPatch>()
                .await
                .map_err(|e| DetailFetchError::Parse(format!("Detail response: {}", e))),
        }
    }
}

/// Fetcher used when no detail service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineDetailFetcher;

#[async_trait]
impl DetailFetchService for OfflineDetailFetcher {
    async fn fetch(&self, canonical_name: &str) -> Result<SpeciesDetailPatch, DetailFetchError> {
        Err(DetailFetchError::Unavailable(format!(
            "offline, no details for {}",
            canonical_name
        )))
    }
}
