//! On-device classifier adapter

use crate::types::{
    ClassificationResult, Classifier, ClassifierError, ImageInput, LocalModelRuntime,
};
use async_trait::async_trait;
use pxf_common::ClassificationSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// Adapter around the on-device model runtime
///
/// Never fails: when the runtime is unavailable or errors, the adapter yields
/// a zero-confidence placeholder so the pipeline falls through to the remote
/// classifiers instead of aborting.
pub struct LocalClassifier {
    runtime: Arc<dyn LocalModelRuntime>,
}

impl LocalClassifier {
    pub fn new(runtime: Arc<dyn LocalModelRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Classifier for LocalClassifier {
    fn source(&self) -> ClassificationSource {
        ClassificationSource::Local
    }

    async fn classify(&self, image: &ImageInput) -> Result<ClassificationResult, ClassifierError> {
        match self.runtime.classify(image).await {
            Ok(prediction) => {
                let result = ClassificationResult::new(
                    &prediction.label,
                    prediction.confidence,
                    ClassificationSource::Local,
                );
                debug!(
                    species = %result.species_label,
                    confidence = result.confidence,
                    "Local classification complete"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Local model failed, using placeholder result");
                Ok(ClassificationResult::placeholder(ClassificationSource::Local))
            }
        }
    }
}
