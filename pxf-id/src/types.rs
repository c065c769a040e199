//! Core types and classifier trait definitions
//!
//! # Architecture
//! - **Classifiers:** on-device and remote adapters behind [`Classifier`]
//! - **Arbitration:** [`crate::fusion::arbitrate`] combines their results
//! - **Stores:** species details and the user collection, both SQLite-backed

use async_trait::async_trait;
use pxf_common::ClassificationSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Label used when no species could be determined
pub const UNKNOWN_SPECIES: &str = "unknown";

// ============================================================================
// Common Types
// ============================================================================

/// Decoded image handed to the pipeline by the image source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// Format-agnostic image bytes
    pub bytes: Vec<u8>,
    /// Nominal width in pixels
    pub width: u32,
    /// Nominal height in pixels
    pub height: u32,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
        }
    }
}

/// Raw prediction returned by a model runtime or a remote transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Output of one classifier call
///
/// Lives for a single pipeline run. The label is stored in canonical form and
/// the confidence is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub species_label: String,
    pub confidence: f32,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    /// Create a result with canonicalised label and clamped confidence
    pub fn new(species_label: &str, confidence: f32, source: ClassificationSource) -> Self {
        Self {
            species_label: canonical_name(species_label),
            confidence: clamp_confidence(confidence),
            source,
        }
    }

    /// Zero-confidence placeholder standing in for a failed classifier
    pub fn placeholder(source: ClassificationSource) -> Self {
        Self {
            species_label: UNKNOWN_SPECIES.to_string(),
            confidence: 0.0,
            source,
        }
    }

    /// True when the label carries no species information
    pub fn is_unknown(&self) -> bool {
        is_unknown_label(&self.species_label)
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Normalise a species label into its canonical name
///
/// Whitespace is trimmed and collapsed, the genus is capitalised and the
/// specific epithet lower-cased: `"  monstera   DELICIOSA "` becomes
/// `"Monstera deliciosa"`. Words after the epithet (cultivar, hybrid or
/// infraspecific parts) keep their case, so
/// `"monstera deliciosa 'Thai Constellation'"` becomes
/// `"Monstera deliciosa 'Thai Constellation'"`. Unknown labels collapse to
/// [`UNKNOWN_SPECIES`].
pub fn canonical_name(label: &str) -> String {
    if is_unknown_label(label) {
        return UNKNOWN_SPECIES.to_string();
    }

    let mut canonical = String::with_capacity(label.len());
    for (i, word) in label.split_whitespace().enumerate() {
        match i {
            0 => {
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    canonical.extend(first.to_uppercase());
                    canonical.push_str(&chars.as_str().to_lowercase());
                }
            }
            1 => {
                canonical.push(' ');
                canonical.push_str(&word.to_lowercase());
            }
            _ => {
                canonical.push(' ');
                canonical.push_str(word);
            }
        }
    }
    canonical
}

/// True for the empty label and the `unknown` sentinel (any case)
pub fn is_unknown_label(label: &str) -> bool {
    let trimmed = label.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_SPECIES)
}

// ============================================================================
// Classifier Traits
// ============================================================================

/// A species classifier as seen by the pipeline
///
/// Implemented by [`crate::classifiers::LocalClassifier`] and
/// [`crate::classifiers::RemoteClassifier`]. Failures are per-call and never
/// abort a pipeline run.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Which slot of the pipeline this classifier fills
    fn source(&self) -> ClassificationSource;

    /// Classify one image
    async fn classify(&self, image: &ImageInput) -> Result<ClassificationResult, ClassifierError>;
}

/// On-device inference runtime
#[async_trait]
pub trait LocalModelRuntime: Send + Sync {
    async fn classify(&self, image: &ImageInput) -> Result<Prediction, ClassifierError>;
}

/// Network transport behind a remote classifier
///
/// Encoding and authentication are the transport's concern; timeout and
/// retry are applied around it by [`crate::classifiers::RemoteClassifier`].
#[async_trait]
pub trait RemoteClassifierTransport: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &str;

    async fn classify(&self, image: &ImageInput) -> Result<Prediction, ClassifierError>;
}

/// Classifier failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// A call exceeded its per-attempt timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Network communication error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote service rejected the request
    #[error("API error: {0}")]
    Api(String),

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Model or service not available
    #[error("Classifier not available: {0}")]
    Unavailable(String),
}

impl ClassifierError {
    /// Whether another attempt might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}
