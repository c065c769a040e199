//! JSON-over-HTTP classifier transport
//!
//! Posts the base64-encoded image to a classification endpoint and picks the
//! best-scoring suggestion from the response.
//!
//! Request body:
//! ```text
//! { "image": "<base64>", "width": 640, "height": 480 }
//! ```
//! Response body:
//! ```text
//! { "results": [ { "species": "Monstera deliciosa", "score": 0.91 }, ... ] }
//! ```

use crate::types::{ClassifierError, ImageInput, Prediction, RemoteClassifierTransport};
use async_trait::async_trait;
use base64::Engine;
use governor::{Quota, RateLimiter};
use pxf_common::config::RemoteEndpointConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Connection timeout; the overall per-call timeout is owned by the adapter
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    image: &'a str,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    results: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    #[serde(alias = "label", alias = "name")]
    species: String,
    #[serde(alias = "confidence", alias = "probability")]
    score: f32,
}

/// HTTP transport for a remote classification service
pub struct HttpClassifierTransport {
    /// Transport name for logging
    name: String,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    /// Client-side request rate limit
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpClassifierTransport {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            name: name.into(),
            client,
            endpoint: endpoint.into(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Build from endpoint config; `Ok(None)` when no endpoint is configured
    pub fn from_config(
        name: &str,
        config: &RemoteEndpointConfig,
    ) -> Result<Option<Self>, ClassifierError> {
        let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };
        Self::new(
            name,
            endpoint,
            config.api_key.clone(),
            config.requests_per_second,
        )
        .map(Some)
    }
}

/// Pick the highest-scoring suggestion
fn best_suggestion(response: ClassifyResponse) -> Result<Prediction, ClassifierError> {
    response
        .results
        .into_iter()
        .filter(|s| !s.species.trim().is_empty() && s.score.is_finite())
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .map(|s| Prediction::new(s.species, s.score))
        .ok_or_else(|| ClassifierError::Decode("Response contained no suggestions".to_string()))
}

#[async_trait]
impl RemoteClassifierTransport for HttpClassifierTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(&self, image: &ImageInput) -> Result<Prediction, ClassifierError> {
        self.rate_limiter.until_ready().await;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
        debug!(
            transport = %self.name,
            image_bytes = image.bytes.len(),
            "Posting image to remote classifier"
        );

        let mut request = self.client.post(&self.endpoint).json(&ClassifyRequest {
            image: &encoded,
            width: image.width,
            height: image.height,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(format!("{} request failed: {}", self.name, e)))?;

        let status = response.status();
        if status.is_server_error() {
            // 5xx is worth retrying
            return Err(ClassifierError::Transport(format!(
                "{} returned {}",
                self.name, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }

        let parsed: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Decode(format!("{} response: {}", self.name, e)))?;

        best_suggestion(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_suggestion_picks_highest_score() {
        let response: ClassifyResponse = serde_json::from_str(
            r#"{"results": [
                {"species": "Ficus elastica", "score": 0.42},
                {"species": "Ficus lyrata", "score": 0.81},
                {"species": "Schefflera arboricola", "score": 0.12}
            ]}"#,
        )
        .unwrap();

        let prediction = best_suggestion(response).unwrap();
        assert_eq!(prediction.label, "Ficus lyrata");
        assert_eq!(prediction.confidence, 0.81);
    }

    #[test]
    fn test_field_aliases_accepted() {
        let response: ClassifyResponse =
            serde_json::from_str(r#"{"results": [{"label": "Aloe vera", "confidence": 0.5}]}"#)
                .unwrap();
        assert_eq!(best_suggestion(response).unwrap().label, "Aloe vera");
    }

    #[test]
    fn test_empty_results_is_decode_error() {
        let response: ClassifyResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(matches!(
            best_suggestion(response),
            Err(ClassifierError::Decode(_))
        ));

        let response: ClassifyResponse = serde_json::from_str("{}").unwrap();
        assert!(best_suggestion(response).is_err());
    }

    #[test]
    fn test_from_config_without_endpoint() {
        let config = RemoteEndpointConfig::default();
        assert!(HttpClassifierTransport::from_config("remote_a", &config)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_from_config_with_endpoint() {
        let config = RemoteEndpointConfig {
            endpoint: Some("http://127.0.0.1:9/classify".to_string()),
            api_key: Some("secret".to_string()),
            requests_per_second: 0,
            ..Default::default()
        };
        let transport = HttpClassifierTransport::from_config("remote_b", &config)
            .unwrap()
            .unwrap();
        assert_eq!(transport.name(), "remote_b");
    }
}
