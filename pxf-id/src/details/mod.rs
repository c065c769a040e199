//! Species details
//!
//! - [`SpeciesDetail`] / [`SpeciesDetailPatch`]: cached record and fetched partial record
//! - [`SpeciesDetailStore`]: TTL cache with fill-gaps merge and single-writer upserts
//! - [`DetailFetchService`]: external source of details

pub mod fetcher;
pub mod record;
pub mod store;

pub use fetcher::{DetailFetchError, DetailFetchService, HttpDetailFetchService, OfflineDetailFetcher};
pub use record::{SpeciesDetail, SpeciesDetailPatch};
pub use store::{DetailStoreError, SpeciesDetailStore, DEFAULT_TTL_DAYS};
