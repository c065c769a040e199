//! Pixel-art artifact generation hook
//!
//! The generation algorithm lives outside this crate; the repository only
//! stores its bytes or the fact that it failed.

use crate::collection::{CollectionError, CollectionRepository};
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// External collaborator producing an artifact for a species
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, canonical_name: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Artifact generation failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArtifactError {
    #[error("Artifact generation failed: {0}")]
    Generation(String),

    #[error("Artifact generator not available: {0}")]
    Unavailable(String),
}

/// Outcome of one generation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutcome {
    Attached { bytes: usize },
    Failed(ArtifactError),
}

/// Generate an artifact for entry `numeric_id` and record the result
///
/// The result is recorded on the entry read before generation, located by
/// guid, so a delete that renumbers the collection meanwhile cannot move it
/// onto another entry. If that entry itself was deleted the result is
/// `NotFound`. Generator failures are recorded on the entry and reported as
/// [`ArtifactOutcome::Failed`]; only repository errors are returned as `Err`.
pub async fn generate_artifact(
    repo: &CollectionRepository,
    generator: &dyn ArtifactGenerator,
    numeric_id: i64,
) -> Result<ArtifactOutcome, CollectionError> {
    let entry = repo
        .get(numeric_id)
        .await?
        .ok_or_else(|| CollectionError::NotFound(format!("id {}", numeric_id)))?;

    let error = match generator.generate(&entry.canonical_name).await {
        Ok(bytes) if !bytes.is_empty() => {
            repo.attach_artifact_to(&entry, &bytes).await?;
            return Ok(ArtifactOutcome::Attached { bytes: bytes.len() });
        }
        Ok(_) => ArtifactError::Generation("generator returned no data".to_string()),
        Err(error) => error,
    };

    warn!(
        guid = %entry.guid,
        canonical_name = %entry.canonical_name,
        %error,
        "Artifact generation failed"
    );
    repo.mark_artifact_failed_for(&entry).await?;
    Ok(ArtifactOutcome::Failed(error))
}
