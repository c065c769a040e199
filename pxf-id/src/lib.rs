//! pxf-id library interface
//!
//! Species identification pipeline, species detail cache and user
//! collection, consumed by a presentation layer.

pub mod classifiers;
pub mod collection;
pub mod db;
pub mod details;
pub mod fusion;
pub mod pipeline;
pub mod types;
pub mod utils;

pub use crate::collection::{CollectionEntry, CollectionError, CollectionRepository, ListOrder};
pub use crate::details::{SpeciesDetail, SpeciesDetailStore};
pub use crate::pipeline::{Identification, PipelineOrchestrator, PipelinePolicy, RunOutcome};
pub use crate::types::{ClassificationResult, ImageInput};

use crate::classifiers::LocalClassifier;
use crate::details::{DetailFetchService, HttpDetailFetchService, OfflineDetailFetcher};
use crate::types::LocalModelRuntime;
use pxf_common::config::{database_path, TomlConfig};
use pxf_common::EventBus;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Core state shared with the presentation layer
#[derive(Clone)]
pub struct CoreState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Pipeline events
    pub event_bus: EventBus,
    pub details: Arc<SpeciesDetailStore>,
    pub collection: Arc<CollectionRepository>,
    pub pipeline: Arc<PipelineOrchestrator>,
}

impl CoreState {
    /// Open the database under `root_folder` and wire every component from `config`
    ///
    /// Remote classifiers and the detail service are only attached when an
    /// endpoint is configured; without a detail endpoint the store serves
    /// cached records only.
    pub async fn open(
        config: &TomlConfig,
        root_folder: &Path,
        local_runtime: Arc<dyn LocalModelRuntime>,
    ) -> anyhow::Result<Self> {
        let db = db::init_database_pool(&database_path(root_folder)).await?;
        Self::with_pool(db, config, local_runtime)
    }

    /// Wire every component on an already-initialised pool
    pub fn with_pool(
        db: SqlitePool,
        config: &TomlConfig,
        local_runtime: Arc<dyn LocalModelRuntime>,
    ) -> anyhow::Result<Self> {
        let event_bus = EventBus::new(config.pipeline.event_capacity);

        let fetcher: Arc<dyn DetailFetchService> =
            match HttpDetailFetchService::from_config(&config.details)? {
                Some(service) => Arc::new(service),
                None => {
                    tracing::info!("No detail service configured, serving cached details only");
                    Arc::new(OfflineDetailFetcher)
                }
            };
        let details = Arc::new(SpeciesDetailStore::from_config(
            db.clone(),
            fetcher,
            &config.details,
        ));

        let collection = Arc::new(CollectionRepository::from_config(
            db.clone(),
            &config.collection,
        ));

        let pipeline = PipelineOrchestrator::new(
            Arc::new(LocalClassifier::new(local_runtime)),
            Arc::clone(&details),
            PipelinePolicy::from(&config.pipeline),
            event_bus.clone(),
        )
        .with_configured_remotes(&config.remote_a, &config.remote_b)?;

        Ok(Self {
            db,
            event_bus,
            details,
            collection,
            pipeline: Arc::new(pipeline),
        })
    }
}
