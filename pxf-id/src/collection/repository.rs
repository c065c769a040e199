//! Collection repository
//!
//! Ordered, densely-numbered store of user-accepted identifications.
//!
//! # Numbering
//! Ids always form `1..N`. `add` takes the next value of a persisted running
//! counter; `delete` closes the gap by shifting every higher id down by one
//! and decrementing the counter, all inside one transaction that is only
//! committed once the result has been verified dense.
//!
//! # Concurrency
//! Every mutation runs under one writer lock, so id assignment never sees a
//! half-renumbered table. Readers use their own pool connections and only
//! ever observe committed state.

use crate::collection::entry::{normalize_tags, CollectionEntry, CollectionError, ListOrder};
use crate::db::collection_entries;
use crate::types::{canonical_name, is_unknown_label};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::{SubsecRound, Utc};
use pxf_common::config::CollectionConfig;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default bound on stored original images (4 MiB)
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

pub struct CollectionRepository {
    pool: SqlitePool,
    max_image_bytes: usize,
    /// Single writer for every mutation
    write_lock: Mutex<()>,
}

impl CollectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_max_image_bytes(pool, DEFAULT_MAX_IMAGE_BYTES)
    }

    pub fn with_max_image_bytes(pool: SqlitePool, max_image_bytes: usize) -> Self {
        Self {
            pool,
            max_image_bytes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(pool: SqlitePool, config: &CollectionConfig) -> Self {
        Self::with_max_image_bytes(pool, config.max_image_bytes)
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Accept an identification into the collection
    ///
    /// The new entry takes the next id in the dense sequence.
    pub async fn add<I, S>(
        &self,
        name: &str,
        original_image: Vec<u8>,
        tags: I,
    ) -> Result<CollectionEntry, CollectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if is_unknown_label(name) {
            return Err(CollectionError::InvalidInput(format!(
                "Cannot collect an unidentified species: {:?}",
                name
            )));
        }
        if original_image.is_empty() {
            return Err(CollectionError::InvalidInput("Original image is empty".to_string()));
        }
        if original_image.len() > self.max_image_bytes {
            return Err(CollectionError::InvalidInput(format!(
                "Original image is {} bytes, limit is {}",
                original_image.len(),
                self.max_image_bytes
            )));
        }

        let mut entry = CollectionEntry {
            numeric_id: 0,
            guid: Uuid::new_v4(),
            created_at: Utc::now().trunc_subsecs(6),
            canonical_name: canonical_name(name),
            original_image,
            artifact: None,
            tags: normalize_tags(tags),
            notes: None,
            artifact_generation_failed: false,
        };

        let _writer = self.write_lock.lock().await;
        let numeric_id = retry_on_lock("collection add", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.try_insert(&entry)
        })
        .await?;
        entry.numeric_id = numeric_id;

        info!(
            numeric_id = entry.numeric_id,
            guid = %entry.guid,
            canonical_name = %entry.canonical_name,
            "Collection entry added"
        );
        Ok(entry)
    }

    async fn try_insert(&self, entry: &CollectionEntry) -> Result<i64, CollectionError> {
        let mut tx = self.pool.begin().await?;

        let numeric_id = collection_entries::next_numeric_id(&mut *tx).await?;
        let assigned = CollectionEntry {
            numeric_id,
            ..entry.clone()
        };
        collection_entries::insert_entry(&mut *tx, &assigned).await?;

        tx.commit().await?;
        Ok(numeric_id)
    }

    /// List entries; never mutates
    pub async fn list(&self, order: &ListOrder) -> Result<Vec<CollectionEntry>, CollectionError> {
        Ok(collection_entries::list_entries(&self.pool, order).await?)
    }

    pub async fn get(&self, numeric_id: i64) -> Result<Option<CollectionEntry>, CollectionError> {
        Ok(collection_entries::load_entry(&self.pool, numeric_id).await?)
    }

    pub async fn get_by_guid(&self, guid: Uuid) -> Result<Option<CollectionEntry>, CollectionError> {
        Ok(collection_entries::load_entry_by_guid(&self.pool, guid).await?)
    }

    pub async fn count(&self) -> Result<i64, CollectionError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM collection_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Replace tags and notes of an entry
    ///
    /// The entry is located by guid, so an id shifted by an intervening
    /// delete still resolves. Returns the stored entry.
    pub async fn update<I, S>(
        &self,
        entry: &CollectionEntry,
        tags: I,
        notes: Option<String>,
    ) -> Result<CollectionEntry, CollectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags: BTreeSet<String> = normalize_tags(tags);
        let notes = notes.filter(|n| !n.trim().is_empty());

        {
            let pool = &self.pool;
            let guid = entry.guid;
            let (tags, notes) = (&tags, notes.as_deref());
            let _writer = self.write_lock.lock().await;
            let updated = retry_on_lock("collection update", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
                let mut conn = pool.acquire().await?;
                collection_entries::update_tags_and_notes(&mut *conn, guid, tags, notes).await
            })
            .await?;
            if updated == 0 {
                return Err(CollectionError::NotFound(format!("guid {}", entry.guid)));
            }
        }

        debug!(guid = %entry.guid, "Collection entry updated");
        self.get_by_guid(entry.guid)
            .await?
            .ok_or_else(|| CollectionError::NotFound(format!("guid {}", entry.guid)))
    }

    /// Store a generated artifact
    pub async fn attach_artifact(
        &self,
        numeric_id: i64,
        artifact: &[u8],
    ) -> Result<(), CollectionError> {
        let pool = &self.pool;
        let _writer = self.write_lock.lock().await;
        let updated = retry_on_lock("collection attach artifact", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let mut conn = pool.acquire().await?;
            collection_entries::set_artifact(&mut *conn, numeric_id, artifact).await
        })
        .await?;

        if updated == 0 {
            return Err(CollectionError::NotFound(format!("id {}", numeric_id)));
        }
        info!(numeric_id, bytes = artifact.len(), "Artifact attached");
        Ok(())
    }

    /// Record that artifact generation failed for an entry
    pub async fn mark_artifact_failed(&self, numeric_id: i64) -> Result<(), CollectionError> {
        let pool = &self.pool;
        let _writer = self.write_lock.lock().await;
        let updated = retry_on_lock("collection mark artifact failed", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let mut conn = pool.acquire().await?;
            collection_entries::set_artifact_failed(&mut *conn, numeric_id).await
        })
        .await?;

        if updated == 0 {
            return Err(CollectionError::NotFound(format!("id {}", numeric_id)));
        }
        info!(numeric_id, "Artifact generation marked failed");
        Ok(())
    }

    /// Store a generated artifact on `entry`, located by guid
    ///
    /// Unlike [`attach_artifact`](Self::attach_artifact), a renumbering
    /// since `entry` was read cannot redirect the write to another entry.
    pub async fn attach_artifact_to(
        &self,
        entry: &CollectionEntry,
        artifact: &[u8],
    ) -> Result<(), CollectionError> {
        let pool = &self.pool;
        let guid = entry.guid;
        let _writer = self.write_lock.lock().await;
        let updated = retry_on_lock("collection attach artifact", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let mut conn = pool.acquire().await?;
            collection_entries::set_artifact_by_guid(&mut *conn, guid, artifact).await
        })
        .await?;

        if updated == 0 {
            return Err(CollectionError::NotFound(format!("guid {}", guid)));
        }
        info!(%guid, bytes = artifact.len(), "Artifact attached");
        Ok(())
    }

    /// Record a failed generation on `entry`, located by guid
    pub async fn mark_artifact_failed_for(&self, entry: &CollectionEntry) -> Result<(), CollectionError> {
        let pool = &self.pool;
        let guid = entry.guid;
        let _writer = self.write_lock.lock().await;
        let updated = retry_on_lock("collection mark artifact failed", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let mut conn = pool.acquire().await?;
            collection_entries::set_artifact_failed_by_guid(&mut *conn, guid).await
        })
        .await?;

        if updated == 0 {
            return Err(CollectionError::NotFound(format!("guid {}", guid)));
        }
        info!(%guid, "Artifact generation marked failed");
        Ok(())
    }

    /// Delete an entry and renumber the rest
    ///
    /// The entry is located by guid at delete time.
    pub async fn delete(&self, entry: &CollectionEntry) -> Result<(), CollectionError> {
        let _writer = self.write_lock.lock().await;
        let removed = retry_on_lock("collection delete", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.try_delete(EntryKey::Guid(entry.guid))
        })
        .await?;

        info!(numeric_id = removed, guid = %entry.guid, "Collection entry deleted");
        Ok(())
    }

    /// Delete the entry currently holding `numeric_id` and renumber the rest
    pub async fn delete_by_id(&self, numeric_id: i64) -> Result<(), CollectionError> {
        let _writer = self.write_lock.lock().await;
        retry_on_lock("collection delete", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.try_delete(EntryKey::Id(numeric_id))
        })
        .await?;

        info!(numeric_id, "Collection entry deleted");
        Ok(())
    }

    /// One all-or-nothing delete attempt; returns the id that was removed
    ///
    /// Any error drops the transaction, which rolls it back.
    async fn try_delete(&self, key: EntryKey) -> Result<i64, CollectionError> {
        let mut tx = self.pool.begin().await?;

        let numeric_id = match key {
            EntryKey::Id(id) => id,
            EntryKey::Guid(guid) => collection_entries::numeric_id_for_guid(&mut *tx, guid)
                .await?
                .ok_or_else(|| CollectionError::NotFound(format!("guid {}", guid)))?,
        };

        if !collection_entries::delete_and_renumber(&mut *tx, numeric_id).await? {
            return Err(CollectionError::NotFound(format!("id {}", numeric_id)));
        }

        let density = collection_entries::density(&mut *tx).await?;
        if !density.is_dense() {
            error!(numeric_id, ?density, "Renumbering left collection non-dense, rolling back");
            return Err(CollectionError::Renumbering(format!(
                "after deleting id {}: {} entries spanning {}..={}, counter {}",
                numeric_id, density.count, density.min_id, density.max_id, density.counter
            )));
        }

        tx.commit().await?;
        debug!(numeric_id, remaining = density.count, "Collection renumbered");
        Ok(numeric_id)
    }

    /// Check that ids form `1..N` and the counter agrees
    pub async fn verify_dense(&self) -> Result<(), CollectionError> {
        let mut conn = self.pool.acquire().await?;
        let density = collection_entries::density(&mut *conn).await?;
        if density.is_dense() {
            Ok(())
        } else {
            Err(CollectionError::Renumbering(format!(
                "{} entries spanning {}..={}, counter {}",
                density.count, density.min_id, density.max_id, density.counter
            )))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryKey {
    Id(i64),
    Guid(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use std::sync::Arc;

    async fn repo() -> CollectionRepository {
        CollectionRepository::new(open_in_memory().await.unwrap())
    }

    async fn add(repo: &CollectionRepository, name: &str) -> CollectionEntry {
        repo.add(name, vec![1, 2, 3], Vec::<String>::new()).await.unwrap()
    }

    fn ids_and_names(entries: &[CollectionEntry]) -> Vec<(i64, String)> {
        entries
            .iter()
            .map(|e| (e.numeric_id, e.canonical_name.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_add_assigns_dense_ids() {
        let repo = repo().await;
        for name in ["Aloe vera", "Ficus lyrata", "Pilea peperomioides"] {
            add(&repo, name).await;
        }

        let entries = repo.list(&ListOrder::ById).await.unwrap();
        assert_eq!(
            entries.iter().map(|e| e.numeric_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        repo.verify_dense().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_max_id() {
        let repo = repo().await;
        for name in ["Aloe vera", "Ficus lyrata", "Hoya carnosa"] {
            add(&repo, name).await;
        }

        repo.delete_by_id(3).await.unwrap();

        let entries = repo.list(&ListOrder::ById).await.unwrap();
        assert_eq!(
            ids_and_names(&entries),
            vec![(1, "Aloe vera".to_string()), (2, "Ficus lyrata".to_string())]
        );
        repo.verify_dense().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_middle_shifts_higher_ids() {
        let repo = repo().await;
        let names = ["Aloe vera", "Begonia rex", "Calathea", "Dracaena", "Epipremnum"];
        let mut added = Vec::new();
        for name in names {
            added.push(add(&repo, name).await);
        }

        repo.delete(&added[2]).await.unwrap();

        let entries = repo.list(&ListOrder::ById).await.unwrap();
        assert_eq!(
            ids_and_names(&entries),
            vec![
                (1, "Aloe vera".to_string()),
                (2, "Begonia rex".to_string()),
                (3, "Dracaena".to_string()),
                (4, "Epipremnum".to_string()),
            ]
        );
        // Stable identity survives renumbering
        assert_eq!(entries[2].guid, added[3].guid);
        assert_eq!(entries[3].guid, added[4].guid);

        // Next add continues after the new maximum
        let next = add(&repo, "Fittonia").await;
        assert_eq!(next.numeric_id, 5);
        repo.verify_dense().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_sole_entry_resumes_at_one() {
        let repo = repo().await;
        let only = add(&repo, "Aloe vera").await;

        repo.delete(&only).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
        repo.verify_dense().await.unwrap();

        let next = add(&repo, "Ficus lyrata").await;
        assert_eq!(next.numeric_id, 1);
    }

    #[tokio::test]
    async fn test_missing_entries_are_not_found() {
        let repo = repo().await;
        let entry = add(&repo, "Aloe vera").await;
        repo.delete(&entry).await.unwrap();

        assert!(matches!(
            repo.delete(&entry).await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            repo.delete_by_id(1).await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            repo.attach_artifact(1, b"art").await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            repo.mark_artifact_failed(7).await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            repo.update(&entry, ["tag"], None).await,
            Err(CollectionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_store_untouched() {
        let repo = repo().await;
        for name in ["Aloe vera", "Ficus lyrata"] {
            add(&repo, name).await;
        }
        let before = repo.list(&ListOrder::ById).await.unwrap();

        assert!(repo.delete_by_id(9).await.is_err());

        assert_eq!(repo.list(&ListOrder::ById).await.unwrap(), before);
        repo.verify_dense().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_dense_result_rolls_back_delete() {
        let repo = repo().await;
        for name in ["Aloe vera", "Begonia rex", "Calathea"] {
            add(&repo, name).await;
        }
        let before = repo.list(&ListOrder::ById).await.unwrap();

        // Counter out of step with the entries: the post-delete check must fail
        sqlx::query("UPDATE collection_counter SET last_id = 9 WHERE id = 1")
            .execute(&repo.pool)
            .await
            .unwrap();

        assert!(matches!(
            repo.delete_by_id(2).await,
            Err(CollectionError::Renumbering(_))
        ));
        assert_eq!(repo.list(&ListOrder::ById).await.unwrap(), before);

        let counter: i64 = sqlx::query_scalar("SELECT last_id FROM collection_counter WHERE id = 1")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(counter, 9, "Counter decrement must be rolled back too");
    }

    #[tokio::test]
    async fn test_artifact_by_entry_follows_renumbering() {
        let repo = repo().await;
        let first = add(&repo, "Aloe vera").await;
        let second = add(&repo, "Begonia rex").await;
        add(&repo, "Calathea").await;

        repo.delete(&first).await.unwrap();
        repo.attach_artifact_to(&second, b"begonia").await.unwrap();
        repo.mark_artifact_failed_for(&second).await.unwrap();

        let entries = repo.list(&ListOrder::ById).await.unwrap();
        assert_eq!(entries[0].canonical_name, "Begonia rex");
        assert_eq!(entries[0].artifact.as_deref(), Some(&b"begonia"[..]));
        assert!(entries[0].artifact_generation_failed);
        assert!(entries[1].artifact.is_none());
        assert!(!entries[1].artifact_generation_failed);

        assert!(matches!(
            repo.attach_artifact_to(&first, b"aloe").await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            repo.mark_artifact_failed_for(&first).await,
            Err(CollectionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_artifacts() {
        let repo = repo().await;
        let entry = add(&repo, "Monstera deliciosa").await;

        let updated = repo
            .update(&entry, [" balcony ", "", "gift"], Some("From grandma".to_string()))
            .await
            .unwrap();
        assert!(updated.has_tag("balcony"));
        assert!(updated.has_tag("gift"));
        assert_eq!(updated.tags.len(), 2);
        assert_eq!(updated.notes.as_deref(), Some("From grandma"));
        assert_eq!(updated.original_image, entry.original_image);

        repo.mark_artifact_failed(1).await.unwrap();
        assert!(repo.get(1).await.unwrap().unwrap().artifact_generation_failed);

        repo.attach_artifact(1, b"pixels").await.unwrap();
        let stored = repo.get(1).await.unwrap().unwrap();
        assert_eq!(stored.artifact.as_deref(), Some(&b"pixels"[..]));
        assert!(!stored.artifact_generation_failed);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_input() {
        let repo = CollectionRepository::with_max_image_bytes(open_in_memory().await.unwrap(), 4);

        assert!(matches!(
            repo.add("Aloe vera", vec![0; 5], Vec::<String>::new()).await,
            Err(CollectionError::InvalidInput(_))
        ));
        assert!(matches!(
            repo.add("Aloe vera", Vec::new(), Vec::<String>::new()).await,
            Err(CollectionError::InvalidInput(_))
        ));
        assert!(matches!(
            repo.add("unknown", vec![0; 2], Vec::<String>::new()).await,
            Err(CollectionError::InvalidInput(_))
        ));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_orders() {
        let repo = repo().await;
        repo.add("ficus lyrata", vec![1], ["indoor"]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        repo.add("Aloe vera", vec![1], ["outdoor"]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        repo.add("begonia", vec![1], ["indoor", "shade"]).await.unwrap();

        let names = |entries: Vec<CollectionEntry>| {
            entries
                .into_iter()
                .map(|e| e.canonical_name)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            names(repo.list(&ListOrder::NewestFirst).await.unwrap()),
            vec!["Begonia", "Aloe vera", "Ficus lyrata"]
        );
        assert_eq!(
            names(repo.list(&ListOrder::Alphabetical).await.unwrap()),
            vec!["Aloe vera", "Begonia", "Ficus lyrata"]
        );
        assert_eq!(
            names(repo.list(&ListOrder::WithTag("indoor".into())).await.unwrap()),
            vec!["Ficus lyrata", "Begonia"]
        );
        assert!(repo
            .list(&ListOrder::WithTag("missing".into()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_and_deletes_stay_dense() {
        let repo = Arc::new(repo().await);
        for i in 0..4 {
            add(&repo, &format!("Seed {}", i)).await;
        }

        let mut handles = Vec::new();
        for i in 0..12 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    // Tolerate losing the race for id 1 to another delete
                    let _ = repo.delete_by_id(1).await;
                } else {
                    repo.add(&format!("Plant {}", i), vec![1], Vec::<String>::new())
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = repo.list(&ListOrder::ById).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.numeric_id).collect();
        assert_eq!(ids, (1..=entries.len() as i64).collect::<Vec<_>>());
        repo.verify_dense().await.unwrap();
    }
}
