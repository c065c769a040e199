//! Species detail record and the fill-gaps merge policy

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Cached descriptive record for one species
///
/// Keyed by `canonical_name`; one record per species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDetail {
    pub canonical_name: String,
    pub common_name: Option<String>,
    pub summary: Option<String>,
    pub growth_habit: Option<String>,
    pub sunlight: Option<String>,
    pub water: Option<String>,
    pub soil: Option<String>,
    pub temperature: Option<String>,
    pub bloom_time: Option<String>,
    /// Ordered list of facts
    pub fun_facts: Option<Vec<String>>,
    pub last_updated: DateTime<Utc>,
}

/// Partial record returned by the detail fetch service
///
/// Any field may be missing. Blank strings count as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesDetailPatch {
    #[serde(alias = "commonName")]
    pub common_name: Option<String>,
    pub summary: Option<String>,
    #[serde(alias = "growthHabit")]
    pub growth_habit: Option<String>,
    pub sunlight: Option<String>,
    pub water: Option<String>,
    pub soil: Option<String>,
    pub temperature: Option<String>,
    #[serde(alias = "bloomTime")]
    pub bloom_time: Option<String>,
    #[serde(alias = "funFacts")]
    pub fun_facts: Option<Vec<String>>,
}

impl SpeciesDetail {
    /// Empty record stamped at `now`
    pub fn empty(canonical_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            common_name: None,
            summary: None,
            growth_habit: None,
            sunlight: None,
            water: None,
            soil: None,
            temperature: None,
            bloom_time: None,
            fun_facts: None,
            last_updated: now,
        }
    }

    /// Whether the record is younger than `ttl` at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.last_updated) < ttl
    }

    /// Merge a fetched patch using the fill-gaps policy
    ///
    /// New non-blank values fill fields that are currently empty; existing
    /// values are never overwritten. `last_updated` is always refreshed.
    pub fn fill_gaps(&mut self, patch: SpeciesDetailPatch, now: DateTime<Utc>) {
        fill(&mut self.common_name, patch.common_name);
        fill(&mut self.summary, patch.summary);
        fill(&mut self.growth_habit, patch.growth_habit);
        fill(&mut self.sunlight, patch.sunlight);
        fill(&mut self.water, patch.water);
        fill(&mut self.soil, patch.soil);
        fill(&mut self.temperature, patch.temperature);
        fill(&mut self.bloom_time, patch.bloom_time);

        let has_facts = self.fun_facts.as_ref().is_some_and(|f| !f.is_empty());
        if !has_facts {
            let facts: Vec<String> = patch
                .fun_facts
                .unwrap_or_default()
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
            if !facts.is_empty() {
                self.fun_facts = Some(facts);
            }
        }

        self.last_updated = now;
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        return;
    }
    if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        *slot = Some(value);
    }
}
