//! Identification pipeline orchestrator
//!
//! Runs the on-device classifier and up to two remote classifiers for the
//! current image, arbitrates their results and fetches species details for
//! the winner.
//!
//! # Policy
//! 1. Local classifier first; confidence ≥ `local_accept_threshold` is final
//!    and no remote classifier is called
//! 2. Otherwise remote A; remote B as well when A failed, is below
//!    `remote_accept_threshold`, or disagrees with the local label
//! 3. Every successful result with a species label votes
//! 4. No votes, or an unknown winner, ends the run as [`RunOutcome::Unclear`]
//! 5. A known winner gets its details from the [`SpeciesDetailStore`]
//!
//! # Generations
//! Each submitted image starts a new run with the next generation number and
//! cancels the previous run's token. A run only writes shared state (the
//! applied outcome, detail records) while its generation is still the
//! current one; a superseded run's late results are discarded.

use crate::classifiers::{HttpClassifierTransport, RemoteClassifier, RetryPolicy};
use crate::details::{SpeciesDetail, SpeciesDetailStore};
use crate::fusion::arbitrate;
use crate::types::{ClassificationResult, Classifier, ClassifierError, ImageInput};
use chrono::{DateTime, Utc};
use pxf_common::config::{PipelineConfig, RemoteEndpointConfig};
use pxf_common::{ClassificationSource, EventBus, PipelineEvent};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Acceptance thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelinePolicy {
    /// Local confidence at or above which remote classifiers are skipped
    pub local_accept_threshold: f32,
    /// Remote A confidence below which remote B is consulted
    pub remote_accept_threshold: f32,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            local_accept_threshold: 0.75,
            remote_accept_threshold: 0.6,
        }
    }
}

impl From<&PipelineConfig> for PipelinePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            local_accept_threshold: config.local_accept_threshold,
            remote_accept_threshold: config.remote_accept_threshold,
        }
    }
}

/// A settled identification
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub species_label: String,
    pub confidence: f32,
    pub source: ClassificationSource,
    /// Results that voted
    pub results: Vec<ClassificationResult>,
    /// `None` when details could not be obtained
    pub details: Option<SpeciesDetail>,
}

/// Terminal state of one run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Identified(Identification),
    /// No confident result
    Unclear,
    /// A newer submission took over; nothing from this run was applied
    Superseded,
}

/// Outcome most recently applied to shared state
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedOutcome {
    pub generation: u64,
    pub outcome: RunOutcome,
    pub applied_at: DateTime<Utc>,
}

struct RunState {
    generation: u64,
    cancel: CancellationToken,
    latest: Option<AppliedOutcome>,
}

pub struct PipelineOrchestrator {
    local: Arc<dyn Classifier>,
    remote_a: Option<Arc<dyn Classifier>>,
    remote_b: Option<Arc<dyn Classifier>>,
    details: Arc<SpeciesDetailStore>,
    policy: PipelinePolicy,
    event_bus: EventBus,
    /// Generation check and outcome write happen under this one lock
    state: StdMutex<RunState>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator with no remote classifiers
    ///
    /// A missing remote classifier counts as a failed call.
    pub fn new(
        local: Arc<dyn Classifier>,
        details: Arc<SpeciesDetailStore>,
        policy: PipelinePolicy,
        event_bus: EventBus,
    ) -> Self {
        Self {
            local,
            remote_a: None,
            remote_b: None,
            details,
            policy,
            event_bus,
            state: StdMutex::new(RunState {
                generation: 0,
                cancel: CancellationToken::new(),
                latest: None,
            }),
        }
    }

    pub fn with_remote_a(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.remote_a = Some(classifier);
        self
    }

    pub fn with_remote_b(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.remote_b = Some(classifier);
        self
    }

    /// Attach HTTP remote classifiers for whichever endpoints are configured
    pub fn with_configured_remotes(
        mut self,
        remote_a: &RemoteEndpointConfig,
        remote_b: &RemoteEndpointConfig,
    ) -> Result<Self, ClassifierError> {
        if let Some(transport) = HttpClassifierTransport::from_config("remote_a", remote_a)? {
            self.remote_a = Some(Arc::new(RemoteClassifier::new(
                ClassificationSource::RemoteA,
                Arc::new(transport),
                RetryPolicy::from_config(remote_a),
            )));
        }
        if let Some(transport) = HttpClassifierTransport::from_config("remote_b", remote_b)? {
            self.remote_b = Some(Arc::new(RemoteClassifier::new(
                ClassificationSource::RemoteB,
                Arc::new(transport),
                RetryPolicy::from_config(remote_b),
            )));
        }
        Ok(self)
    }

    pub fn policy(&self) -> PipelinePolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_bus.subscribe()
    }

    /// Generation of the most recently submitted image
    pub fn current_generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Outcome most recently applied
    pub fn latest(&self) -> Option<AppliedOutcome> {
        self.lock_state().latest.clone()
    }

    /// Identify `image` in the caller's task
    ///
    /// Supersedes any run still in flight.
    pub async fn identify(&self, image: ImageInput) -> RunOutcome {
        let (generation, cancel) = self.begin_run();
        self.run(generation, cancel, image).await
    }

    /// Identify `image` on a spawned task
    ///
    /// The previous run is superseded before this returns.
    pub fn submit(self: &Arc<Self>, image: ImageInput) -> JoinHandle<RunOutcome> {
        let (generation, cancel) = self.begin_run();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(generation, cancel, image).await })
    }

    fn begin_run(&self) -> (u64, CancellationToken) {
        let (generation, cancel) = {
            let mut state = self.lock_state();
            state.cancel.cancel();
            state.generation += 1;
            state.cancel = CancellationToken::new();
            (state.generation, state.cancel.clone())
        };

        info!(generation, "Identification run started");
        self.event_bus.emit_lossy(PipelineEvent::RunStarted {
            generation,
            timestamp: Utc::now(),
        });
        (generation, cancel)
    }

    async fn run(&self, generation: u64, cancel: CancellationToken, image: ImageInput) -> RunOutcome {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RunOutcome::Superseded,
            outcome = self.execute(generation, &image) => outcome,
        };

        if outcome == RunOutcome::Superseded {
            info!(generation, "Identification run superseded");
            self.event_bus
                .emit_lossy(PipelineEvent::Superseded { generation });
        }
        outcome
    }

    async fn execute(&self, generation: u64, image: &ImageInput) -> RunOutcome {
        let local = match self.local.classify(image).await {
            Ok(result) => result,
            Err(e) => {
                warn!(generation, error = %e, "Local classifier failed, using placeholder");
                ClassificationResult::placeholder(ClassificationSource::Local)
            }
        };
        self.report_completed(generation, &local);

        if local.confidence >= self.policy.local_accept_threshold {
            debug!(
                generation,
                species = %local.species_label,
                confidence = local.confidence,
                "Local result accepted, skipping remote classifiers"
            );
            return self.conclude(generation, vec![local]).await;
        }

        let remote_a = self
            .call_remote(generation, ClassificationSource::RemoteA, self.remote_a.as_ref(), image)
            .await;

        let consult_b = match &remote_a {
            None => true,
            Some(a) => {
                a.confidence < self.policy.remote_accept_threshold
                    || a.species_label != local.species_label
            }
        };

        let remote_b = if consult_b {
            self.call_remote(generation, ClassificationSource::RemoteB, self.remote_b.as_ref(), image)
                .await
        } else {
            None
        };

        let votes: Vec<ClassificationResult> = std::iter::once(local)
            .chain(remote_a)
            .chain(remote_b)
            .filter(|result| !result.is_unknown())
            .collect();

        self.conclude(generation, votes).await
    }

    async fn call_remote(
        &self,
        generation: u64,
        source: ClassificationSource,
        classifier: Option<&Arc<dyn Classifier>>,
        image: &ImageInput,
    ) -> Option<ClassificationResult> {
        let Some(classifier) = classifier else {
            debug!(generation, %source, "Remote classifier not configured");
            self.emit_if_current(
                generation,
                PipelineEvent::ClassifierFailed {
                    generation,
                    source,
                    error: "not configured".to_string(),
                },
            );
            return None;
        };

        match classifier.classify(image).await {
            Ok(result) => {
                self.report_completed(generation, &result);
                Some(result)
            }
            Err(e) => {
                warn!(generation, %source, error = %e, "Remote classifier failed");
                self.emit_if_current(
                    generation,
                    PipelineEvent::ClassifierFailed {
                        generation,
                        source,
                        error: e.to_string(),
                    },
                );
                None
            }
        }
    }

    async fn conclude(&self, generation: u64, votes: Vec<ClassificationResult>) -> RunOutcome {
        // A local result accepted on its own may still carry the unknown label
        let votes: Vec<ClassificationResult> =
            votes.into_iter().filter(|result| !result.is_unknown()).collect();
        let verdict = arbitrate(&votes);

        if votes.is_empty() {
            info!(generation, "No confident result");
            self.emit_if_current(generation, PipelineEvent::Unclear { generation });
            return self.apply(generation, RunOutcome::Unclear);
        }

        info!(
            generation,
            species = %verdict.species_label,
            confidence = verdict.confidence,
            source = %verdict.source,
            votes = verdict.votes,
            "Species resolved"
        );
        self.emit_if_current(
            generation,
            PipelineEvent::Resolved {
                generation,
                species_label: verdict.species_label.clone(),
                confidence: verdict.confidence,
                source: verdict.source,
            },
        );

        let details = match self
            .details
            .fetch_or_fill_if(&verdict.species_label, || self.is_current(generation))
            .await
        {
            Ok(details) => details,
            Err(e) => {
                warn!(generation, species = %verdict.species_label, error = %e, "Detail lookup failed");
                None
            }
        };

        let event = if details.is_some() {
            PipelineEvent::DetailsReady {
                generation,
                canonical_name: verdict.species_label.clone(),
            }
        } else {
            PipelineEvent::DetailsUnavailable {
                generation,
                canonical_name: verdict.species_label.clone(),
            }
        };
        self.emit_if_current(generation, event);

        self.apply(
            generation,
            RunOutcome::Identified(Identification {
                species_label: verdict.species_label,
                confidence: verdict.confidence,
                source: verdict.source,
                results: votes,
                details,
            }),
        )
    }

    /// Publish `outcome` if `generation` is still current
    fn apply(&self, generation: u64, outcome: RunOutcome) -> RunOutcome {
        {
            let mut state = self.lock_state();
            if state.generation == generation {
                state.latest = Some(AppliedOutcome {
                    generation,
                    outcome: outcome.clone(),
                    applied_at: Utc::now(),
                });
                return outcome;
            }
        }

        debug!(generation, "Discarding outcome of superseded run");
        RunOutcome::Superseded
    }

    fn report_completed(&self, generation: u64, result: &ClassificationResult) {
        debug!(
            generation,
            source = %result.source,
            species = %result.species_label,
            confidence = result.confidence,
            "Classifier completed"
        );
        self.emit_if_current(
            generation,
            PipelineEvent::ClassifierCompleted {
                generation,
                source: result.source,
                species_label: result.species_label.clone(),
                confidence: result.confidence,
            },
        );
    }

    fn emit_if_current(&self, generation: u64, event: PipelineEvent) {
        if self.is_current(generation) {
            self.event_bus.emit_lossy(event);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
