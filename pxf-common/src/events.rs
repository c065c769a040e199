//! Pipeline event types and the event bus
//!
//! The identification pipeline reports every phase transition as a
//! [`PipelineEvent`] on a broadcast channel. Presentation layers subscribe
//! and render; nothing in the core depends on a subscriber being present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Origin of a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// On-device model
    Local,
    RemoteA,
    RemoteB,
    /// Arbitrated from more than one classifier
    Ensemble,
}

impl ClassificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::RemoteA => "remote_a",
            Self::RemoteB => "remote_b",
            Self::Ensemble => "ensemble",
        }
    }
}

impl std::fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identification pipeline events
///
/// Every event carries the generation of the run that produced it so
/// subscribers can drop events from superseded runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A run started for a newly submitted image
    RunStarted {
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// A classifier produced a result
    ClassifierCompleted {
        generation: u64,
        source: ClassificationSource,
        species_label: String,
        confidence: f32,
    },

    /// A classifier failed after its own retries
    ClassifierFailed {
        generation: u64,
        source: ClassificationSource,
        error: String,
    },

    /// The run settled on a species
    Resolved {
        generation: u64,
        species_label: String,
        confidence: f32,
        source: ClassificationSource,
    },

    /// No confident result
    Unclear { generation: u64 },

    /// Species details are available for the resolved species
    DetailsReady {
        generation: u64,
        canonical_name: String,
    },

    /// Details could not be fetched; the identification still stands
    DetailsUnavailable {
        generation: u64,
        canonical_name: String,
    },

    /// The run was overtaken by a newer submission and its results discarded
    Superseded { generation: u64 },
}

impl PipelineEvent {
    /// Generation of the run that emitted this event
    pub fn generation(&self) -> u64 {
        match self {
            Self::RunStarted { generation, .. }
            | Self::ClassifierCompleted { generation, .. }
            | Self::ClassifierFailed { generation, .. }
            | Self::Resolved { generation, .. }
            | Self::Unclear { generation }
            | Self::DetailsReady { generation, .. }
            | Self::DetailsUnavailable { generation, .. }
            | Self::Superseded { generation } => *generation,
        }
    }
}

/// Broadcast bus for [`PipelineEvent`]s
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(PipelineEvent::Unclear { generation: 3 }).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event, PipelineEvent::Unclear { generation: 3 });
        assert_eq!(event.generation(), 3);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(PipelineEvent::Superseded { generation: 1 }).is_err());
        // Lossy emit never fails
        bus.emit_lossy(PipelineEvent::Superseded { generation: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::Resolved {
            generation: 7,
            species_label: "Ficus lyrata".to_string(),
            confidence: 0.5,
            source: ClassificationSource::Ensemble,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Resolved");
        assert_eq!(json["source"], "ensemble");
        assert_eq!(json["generation"], 7);
    }
}
