//! Scripted collaborators
//!
//! Classifiers answer per image: the first image byte selects the scripted
//! response, so one fake can serve several runs differently.

use async_trait::async_trait;
use pxf_common::ClassificationSource;
use pxf_id::details::{DetailFetchError, DetailFetchService, SpeciesDetailPatch};
use pxf_id::types::{
    ClassificationResult, Classifier, ClassifierError, ImageInput, LocalModelRuntime, Prediction,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted answer
#[derive(Debug, Clone)]
pub struct Scripted {
    pub response: Result<(String, f32), ClassifierError>,
    pub delay: Duration,
}

impl Scripted {
    pub fn ok(label: &str, confidence: f32) -> Self {
        Self {
            response: Ok((label.to_string(), confidence)),
            delay: Duration::ZERO,
        }
    }

    pub fn fail(error: ClassifierError) -> Self {
        Self {
            response: Err(error),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn script_key(image: &ImageInput) -> u8 {
    image.bytes.first().copied().unwrap_or_default()
}

/// Classifier answering from a per-image script
pub struct ScriptedClassifier {
    source: ClassificationSource,
    script: HashMap<u8, Scripted>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(source: ClassificationSource) -> Self {
        Self {
            source,
            script: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, key: u8, scripted: Scripted) -> Self {
        self.script.insert(key, scripted);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn source(&self) -> ClassificationSource {
        self.source
    }

    async fn classify(&self, image: &ImageInput) -> Result<ClassificationResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .get(&script_key(image))
            .cloned()
            .unwrap_or_else(|| Scripted::fail(ClassifierError::Unavailable("unscripted".into())));

        tokio::time::sleep(scripted.delay).await;
        scripted
            .response
            .map(|(label, confidence)| ClassificationResult::new(&label, confidence, self.source))
    }
}

/// On-device runtime answering from a per-image script
pub struct ScriptedRuntime {
    script: HashMap<u8, Scripted>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
        }
    }

    pub fn on(mut self, key: u8, scripted: Scripted) -> Self {
        self.script.insert(key, scripted);
        self
    }
}

#[async_trait]
impl LocalModelRuntime for ScriptedRuntime {
    async fn classify(&self, image: &ImageInput) -> Result<Prediction, ClassifierError> {
        let scripted = self
            .script
            .get(&script_key(image))
            .cloned()
            .unwrap_or_else(|| Scripted::fail(ClassifierError::Unavailable("model not loaded".into())));

        tokio::time::sleep(scripted.delay).await;
        scripted
            .response
            .map(|(label, confidence)| Prediction::new(label, confidence))
    }
}

/// Detail service that records every request
pub struct CountingFetcher {
    requests: Mutex<Vec<String>>,
    failing: bool,
    delay: Duration,
}

impl CountingFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failing: false,
            delay: Duration::from_millis(5),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failing: true,
            delay: Duration::ZERO,
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DetailFetchService for CountingFetcher {
    async fn fetch(&self, canonical_name: &str) -> Result<SpeciesDetailPatch, DetailFetchError> {
        self.requests.lock().unwrap().push(canonical_name.to_string());
        tokio::time::sleep(self.delay).await;

        if self.failing {
            return Err(DetailFetchError::Network("connection refused".into()));
        }
        Ok(SpeciesDetailPatch {
            common_name: Some(format!("Common {}", canonical_name)),
            sunlight: Some("Bright indirect".to_string()),
            fun_facts: Some(vec![format!("{} is photogenic", canonical_name)]),
            ..Default::default()
        })
    }
}
