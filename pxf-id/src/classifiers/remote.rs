//! Remote classifier adapter
//!
//! Wraps a [`RemoteClassifierTransport`] in a fixed per-attempt timeout and an
//! exponential backoff retry loop.
//!
//! **Backoff Strategy:**
//! - Initial delay: `base_delay`
//! - Multiplier: 2.0 (exponential)
//! - Delay capped at `max_delay`
//! - Only timeouts and transport errors are retried

use crate::types::{
    ClassificationResult, Classifier, ClassifierError, ImageInput, RemoteClassifierTransport,
};
use async_trait::async_trait;
use pxf_common::config::RemoteEndpointConfig;
use pxf_common::ClassificationSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timeout and retry policy owned by one remote adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteEndpointConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Network classifier adapter
pub struct RemoteClassifier {
    source: ClassificationSource,
    transport: Arc<dyn RemoteClassifierTransport>,
    policy: RetryPolicy,
}

impl RemoteClassifier {
    /// Create adapter for one remote slot (`RemoteA` or `RemoteB`)
    pub fn new(
        source: ClassificationSource,
        transport: Arc<dyn RemoteClassifierTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            transport,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, image: &ImageInput) -> Result<ClassificationResult, ClassifierError> {
        let prediction = tokio::time::timeout(self.policy.timeout, self.transport.classify(image))
            .await
            .map_err(|_| ClassifierError::Timeout(self.policy.timeout))??;

        Ok(ClassificationResult::new(
            &prediction.label,
            prediction.confidence,
            self.source,
        ))
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    fn source(&self) -> ClassificationSource {
        self.source
    }

    async fn classify(&self, image: &ImageInput) -> Result<ClassificationResult, ClassifierError> {
        let start_time = Instant::now();
        let mut retry = 0u32;

        loop {
            match self.attempt(image).await {
                Ok(result) => {
                    debug!(
                        source = %self.source,
                        transport = self.transport.name(),
                        attempts = retry + 1,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        species = %result.species_label,
                        confidence = result.confidence,
                        "Remote classification complete"
                    );
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && retry < self.policy.max_retries => {
                    let delay = self.policy.delay_for(retry);
                    warn!(
                        source = %self.source,
                        transport = self.transport.name(),
                        attempt = retry + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Remote classification failed, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    warn!(
                        source = %self.source,
                        transport = self.transport.name(),
                        attempts = retry + 1,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Remote classification failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}
