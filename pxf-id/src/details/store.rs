//! Species detail store
//!
//! TTL-cached, upsert-by-key store for per-species descriptive records.
//!
//! # Lookup Policy
//! - Fresh record (`now - last_updated < ttl`): returned as-is, no fetch
//! - Missing or stale record: fetch, merge with fill-gaps, stamp, upsert
//! - Fetch failure: nothing is written, so the next call fetches again
//!
//! # Concurrency
//! Callers asking for the same species are serialised on a per-key lock, so
//! concurrent lookups issue a single external fetch. All writes go through
//! one writer lock per store. A per-key lock is released when its last
//! holder finishes or is dropped.

use crate::db::species_details;
use crate::details::{DetailFetchService, SpeciesDetail};
use crate::types::{canonical_name, is_unknown_label};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use pxf_common::config::DetailsConfig;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default cache lifetime
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Detail store failure
///
/// Fetch failures are not errors at this level; only persistence is.
#[derive(Debug, Error)]
pub enum DetailStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// TTL-cached species detail store
pub struct SpeciesDetailStore {
    pool: SqlitePool,
    fetcher: Arc<dyn DetailFetchService>,
    ttl: Duration,
    /// Single writer for all upserts and deletes
    write_lock: Mutex<()>,
    /// Per-key single-flight locks
    key_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SpeciesDetailStore {
    pub fn new(pool: SqlitePool, fetcher: Arc<dyn DetailFetchService>) -> Self {
        Self::with_ttl(pool, fetcher, Duration::days(DEFAULT_TTL_DAYS))
    }

    pub fn with_ttl(pool: SqlitePool, fetcher: Arc<dyn DetailFetchService>, ttl: Duration) -> Self {
        Self {
            pool,
            fetcher,
            ttl,
            write_lock: Mutex::new(()),
            key_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        pool: SqlitePool,
        fetcher: Arc<dyn DetailFetchService>,
        config: &DetailsConfig,
    ) -> Self {
        Self::with_ttl(pool, fetcher, Duration::days(config.ttl_days))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return cached details, fetching and merging when missing or stale
    ///
    /// `Ok(None)` means no detail is available right now.
    pub async fn fetch_or_fill(
        &self,
        name: &str,
    ) -> Result<Option<SpeciesDetail>, DetailStoreError> {
        self.fetch_or_fill_at(name, Utc::now().trunc_subsecs(6), || true).await
    }

    /// Like [`fetch_or_fill`](Self::fetch_or_fill), but only writes while
    /// `still_current()` holds
    ///
    /// The gate is evaluated after the fetch, under the writer lock, right
    /// before the upsert; when it fails the merged record is discarded and
    /// the previously cached record (if any) is returned. The write is
    /// linearised at that check: a caller that loses currency after the
    /// check but before the upsert commits still writes.
    pub async fn fetch_or_fill_if<G>(
        &self,
        name: &str,
        still_current: G,
    ) -> Result<Option<SpeciesDetail>, DetailStoreError>
    where
        G: Fn() -> bool + Send + Sync,
    {
        self.fetch_or_fill_at(name, Utc::now().trunc_subsecs(6), still_current).await
    }

    /// Lookup with an explicit clock reading
    ///
    /// Timestamps are stored with microsecond precision.
    pub async fn fetch_or_fill_at<G>(
        &self,
        name: &str,
        now: DateTime<Utc>,
        still_current: G,
    ) -> Result<Option<SpeciesDetail>, DetailStoreError>
    where
        G: Fn() -> bool + Send + Sync,
    {
        if is_unknown_label(name) {
            return Ok(None);
        }
        let key = canonical_name(name);

        // Released on drop, including when the caller abandons this future
        let lease = self.lease_key(&key);
        let _guard = lease.lock.lock().await;
        self.lookup_locked(&key, now, &still_current).await
    }

    async fn lookup_locked<G>(
        &self,
        key: &str,
        now: DateTime<Utc>,
        still_current: &G,
    ) -> Result<Option<SpeciesDetail>, DetailStoreError>
    where
        G: Fn() -> bool + Send + Sync,
    {
        let existing = species_details::load_detail(&self.pool, key).await?;

        if let Some(record) = &existing {
            if record.is_fresh(now, self.ttl) {
                debug!(canonical_name = key, "Species detail cache hit");
                return Ok(existing);
            }
            debug!(
                canonical_name = key,
                last_updated = %record.last_updated,
                "Species detail stale, refetching"
            );
        } else {
            debug!(canonical_name = key, "Species detail cache miss");
        }

        let patch = match self.fetcher.fetch(key).await {
            Ok(patch) => patch,
            Err(e) => {
                // Never negatively cached; a stale record is still better than nothing
                warn!(
                    canonical_name = key,
                    error = %e,
                    have_stale = existing.is_some(),
                    "Species detail fetch failed"
                );
                return Ok(existing);
            }
        };

        let mut merged = existing
            .clone()
            .unwrap_or_else(|| SpeciesDetail::empty(key, now));
        merged.fill_gaps(patch, now);

        let _writer = self.write_lock.lock().await;
        if !still_current() {
            debug!(canonical_name = key, "Detail write skipped, caller superseded");
            return Ok(existing);
        }

        retry_on_lock("species detail upsert", DEFAULT_MAX_LOCK_WAIT_MS, || {
            species_details::upsert_detail(&self.pool, &merged)
        })
        .await?;

        info!(canonical_name = key, "Species detail stored");
        Ok(Some(merged))
    }

    /// Cached record without fetching, regardless of age
    pub async fn get(&self, name: &str) -> Result<Option<SpeciesDetail>, DetailStoreError> {
        Ok(species_details::load_detail(&self.pool, &canonical_name(name)).await?)
    }

    /// Administrative delete; returns whether a record existed
    pub async fn remove(&self, name: &str) -> Result<bool, DetailStoreError> {
        let key = canonical_name(name);
        let _writer = self.write_lock.lock().await;
        let removed = retry_on_lock("species detail delete", DEFAULT_MAX_LOCK_WAIT_MS, || {
            species_details::delete_detail(&self.pool, &key)
        })
        .await?;
        if removed {
            info!(canonical_name = %key, "Species detail removed");
        }
        Ok(removed)
    }

    fn lease_key(&self, key: &str) -> KeyLease<'_> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(key.to_string()).or_default().clone();
        KeyLease {
            locks: &self.key_locks,
            key: key.to_string(),
            lock,
        }
    }
}

/// Share of a per-key lock
///
/// The map entry is removed when the last lease drops. Clones only ever
/// come from the map under its lock, so a count of two (map plus this
/// lease) means nobody else holds or waits on the key.
struct KeyLease<'a> {
    locks: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
