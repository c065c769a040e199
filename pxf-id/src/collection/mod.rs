//! User collection
//!
//! - [`CollectionRepository`]: densely-numbered, single-writer store
//! - [`generate_artifact`]: runs an [`ArtifactGenerator`] and records its result

pub mod artifacts;
pub mod entry;
pub mod repository;

pub use artifacts::{generate_artifact, ArtifactError, ArtifactGenerator, ArtifactOutcome};
pub use entry::{normalize_tags, CollectionEntry, CollectionError, ListOrder};
pub use repository::{CollectionRepository, DEFAULT_MAX_IMAGE_BYTES};
