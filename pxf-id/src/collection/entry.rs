//! Collection entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// A user-accepted identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Position in the collection; always part of a dense `1..N` sequence
    pub numeric_id: i64,
    /// Stable identity that survives renumbering
    pub guid: Uuid,
    pub created_at: DateTime<Utc>,
    /// References a species detail record
    pub canonical_name: String,
    pub original_image: Vec<u8>,
    /// Generated pixel-art artifact, once available
    pub artifact: Option<Vec<u8>>,
    pub tags: BTreeSet<String>,
    pub notes: Option<String>,
    pub artifact_generation_failed: bool,
}

impl CollectionEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag.trim())
    }
}

/// Listing orders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOrder {
    /// Ascending numeric id
    ById,
    /// Creation time descending
    NewestFirst,
    /// Canonical name, case-insensitive
    Alphabetical,
    /// Entries carrying the tag, ascending numeric id
    WithTag(String),
}

/// Collection repository failure
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The referenced entry does not exist (or no longer exists)
    #[error("Collection entry not found: {0}")]
    NotFound(String),

    /// Delete could not leave a dense `1..N` sequence; nothing was changed
    #[error("Renumbering failed: {0}")]
    Renumbering(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trim tags and drop blanks
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(["  balcony", "", "shade ", "balcony", "   "]);
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["balcony".to_string(), "shade".to_string()]
        );
    }
}
