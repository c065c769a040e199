//! Integration tests for the species detail cache on a file-backed database

mod helpers;

use chrono::{Duration, Utc};
use helpers::{create_test_db, CountingFetcher};
use pxf_common::config::DetailsConfig;
use pxf_id::SpeciesDetailStore;
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_ttl_window() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let fetcher = CountingFetcher::new();
    let store = SpeciesDetailStore::new(pool, fetcher.clone());
    let start = Utc::now();

    let first = store
        .fetch_or_fill_at("Monstera deliciosa", start, || true)
        .await
        .unwrap()
        .unwrap();
    store
        .fetch_or_fill_at("Monstera deliciosa", start + Duration::days(6), || true)
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 1, "Within TTL: at most one external fetch");

    let later = start + Duration::days(7);
    let refreshed = store
        .fetch_or_fill_at("Monstera deliciosa", later, || true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetcher.calls(), 2, "After TTL: exactly one refetch");
    assert_eq!(refreshed.last_updated, later);
    assert_eq!(refreshed.common_name, first.common_name);

    let stored = store.get("Monstera deliciosa").await.unwrap().unwrap();
    assert_eq!(stored.last_updated.timestamp_micros(), later.timestamp_micros());
}

#[tokio::test]
async fn test_concurrent_fetches_never_duplicate() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let fetcher = CountingFetcher::new();
    let store = Arc::new(SpeciesDetailStore::new(pool.clone(), fetcher.clone()));

    let mut join_set = JoinSet::new();
    for i in 0..12 {
        let store = Arc::clone(&store);
        let name = if i % 2 == 0 { "Aloe vera" } else { "aloe  VERA" };
        join_set.spawn(async move { store.fetch_or_fill(name).await.unwrap() });
    }
    while let Some(result) = join_set.join_next().await {
        assert!(result.unwrap().is_some());
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM species_details")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(fetcher.requests(), vec!["Aloe vera".to_string()]);
}

#[tokio::test]
async fn test_stale_record_served_when_refetch_fails() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let start = Utc::now();

    let online = SpeciesDetailStore::new(pool.clone(), CountingFetcher::new());
    online
        .fetch_or_fill_at("Ficus lyrata", start, || true)
        .await
        .unwrap();

    let offline_fetcher = CountingFetcher::failing();
    let offline = SpeciesDetailStore::new(pool, offline_fetcher.clone());
    let stale = offline
        .fetch_or_fill_at("Ficus lyrata", start + Duration::days(30), || true)
        .await
        .unwrap()
        .expect("Stale record expected");

    assert_eq!(offline_fetcher.calls(), 1);
    assert_eq!(stale.last_updated.timestamp_micros(), start.timestamp_micros());
}

#[tokio::test]
async fn test_ttl_from_config() {
    let (_temp_dir, pool) = create_test_db().await.unwrap();
    let config = DetailsConfig {
        ttl_days: 1,
        ..DetailsConfig::default()
    };
    let fetcher = CountingFetcher::new();
    let store = SpeciesDetailStore::from_config(pool, fetcher.clone(), &config);
    let start = Utc::now();

    store.fetch_or_fill_at("Hoya", start, || true).await.unwrap();
    store
        .fetch_or_fill_at("Hoya", start + Duration::hours(25), || true)
        .await
        .unwrap();

    assert_eq!(store.ttl(), Duration::days(1));
    assert_eq!(fetcher.calls(), 2);
}
