//! Arbiter
//!
//! Combines the results of every classifier that completed in a pipeline run
//! into one winning species.
//!
//! # Voting Rule
//! 1. Group results by species label
//! 2. The group with the most members wins
//! 3. Equal member counts are broken by the highest mean confidence
//! 4. Remaining ties go to the group seen first in input order
//!
//! The reported confidence is the winning group's mean confidence, so a
//! majority of weak votes beats a single strong one:
//! ```text
//! [(A, 0.9), (B, 0.5), (B, 0.7)]  →  (B, 0.6)
//! [(A, 0.9), (B, 0.95)]           →  (B, 0.95)
//! ```

use crate::types::{ClassificationResult, UNKNOWN_SPECIES};
use pxf_common::ClassificationSource;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of arbitration
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub species_label: String,
    /// Mean confidence of the winning group
    pub confidence: f32,
    /// Single contributing source, or `Ensemble` when several results voted
    pub source: ClassificationSource,
    /// Members of the winning group
    pub votes: usize,
    /// Losing labels, in first-seen order
    pub conflicts: Vec<String>,
}

impl Verdict {
    fn unknown() -> Self {
        Self {
            species_label: UNKNOWN_SPECIES.to_string(),
            confidence: 0.0,
            source: ClassificationSource::Ensemble,
            votes: 0,
            conflicts: vec![],
        }
    }
}

struct Group<'a> {
    label: &'a str,
    confidences: Vec<f32>,
}

impl Group<'_> {
    fn mean(&self) -> f32 {
        self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
    }
}

/// Pick the winning species from a set of classifier results
///
/// Empty input yields the unknown sentinel with confidence 0. A single result
/// is returned unchanged.
pub fn arbitrate(results: &[ClassificationResult]) -> Verdict {
    let [first, rest @ ..] = results else {
        return Verdict::unknown();
    };

    if rest.is_empty() {
        return Verdict {
            species_label: first.species_label.clone(),
            confidence: first.confidence,
            source: first.source,
            votes: 1,
            conflicts: vec![],
        };
    }

    // Groups keep first-seen order so residual ties are deterministic
    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for result in results {
        let slot = *index.entry(result.species_label.as_str()).or_insert_with(|| {
            groups.push(Group {
                label: result.species_label.as_str(),
                confidences: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].confidences.push(result.confidence);
    }

    let mut winner = 0;
    for (i, group) in groups.iter().enumerate().skip(1) {
        let best = &groups[winner];
        let more_votes = group.confidences.len() > best.confidences.len();
        let same_votes_higher_mean =
            group.confidences.len() == best.confidences.len() && group.mean() > best.mean();
        if more_votes || same_votes_higher_mean {
            winner = i;
        }
    }

    let winning = &groups[winner];
    let conflicts: Vec<String> = groups
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != winner)
        .map(|(_, g)| g.label.to_string())
        .collect();

    debug!(
        species = winning.label,
        votes = winning.confidences.len(),
        mean_confidence = winning.mean(),
        groups = groups.len(),
        "Arbitration complete"
    );

    Verdict {
        species_label: winning.label.to_string(),
        confidence: winning.mean(),
        source: ClassificationSource::Ensemble,
        votes: winning.confidences.len(),
        conflicts,
    }
}

// ============================================================================
// Tests
// ============================================================================
