//! Species detail database operations

use crate::details::SpeciesDetail;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Insert or replace the record for `detail.canonical_name`
pub async fn upsert_detail(pool: &SqlitePool, detail: &SpeciesDetail) -> Result<(), sqlx::Error> {
    let fun_facts = detail
        .fun_facts
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO species_details (
            canonical_name, common_name, summary, growth_habit, sunlight,
            water, soil, temperature, bloom_time, fun_facts, last_updated_us
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(canonical_name) DO UPDATE SET
            common_name = excluded.common_name,
            summary = excluded.summary,
            growth_habit = excluded.growth_habit,
            sunlight = excluded.sunlight,
            water = excluded.water,
            soil = excluded.soil,
            temperature = excluded.temperature,
            bloom_time = excluded.bloom_time,
            fun_facts = excluded.fun_facts,
            last_updated_us = excluded.last_updated_us
        "#,
    )
    .bind(&detail.canonical_name)
    .bind(&detail.common_name)
    .bind(&detail.summary)
    .bind(&detail.growth_habit)
    .bind(&detail.sunlight)
    .bind(&detail.water)
    .bind(&detail.soil)
    .bind(&detail.temperature)
    .bind(&detail.bloom_time)
    .bind(fun_facts)
    .bind(detail.last_updated.timestamp_micros())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load record by canonical name
pub async fn load_detail(
    pool: &SqlitePool,
    canonical_name: &str,
) -> Result<Option<SpeciesDetail>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT canonical_name, common_name, summary, growth_habit, sunlight,
               water, soil, temperature, bloom_time, fun_facts, last_updated_us
        FROM species_details
        WHERE canonical_name = ?
        "#,
    )
    .bind(canonical_name)
    .fetch_optional(pool)
    .await?;

    row.map(|row| detail_from_row(&row)).transpose()
}

/// Delete record; returns whether one existed
pub async fn delete_detail(pool: &SqlitePool, canonical_name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM species_details WHERE canonical_name = ?")
        .bind(canonical_name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn detail_from_row(row: &SqliteRow) -> Result<SpeciesDetail, sqlx::Error> {
    let fun_facts: Option<String> = row.try_get("fun_facts")?;
    let fun_facts = fun_facts
        .map(|json| serde_json::from_str::<Vec<String>>(&json))
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(SpeciesDetail {
        canonical_name: row.try_get("canonical_name")?,
        common_name: row.try_get("common_name")?,
        summary: row.try_get("summary")?,
        growth_habit: row.try_get("growth_habit")?,
        sunlight: row.try_get("sunlight")?,
        water: row.try_get("water")?,
        soil: row.try_get("soil")?,
        temperature: row.try_get("temperature")?,
        bloom_time: row.try_get("bloom_time")?,
        fun_facts,
        last_updated: micros_to_datetime(row.try_get("last_updated_us")?)?,
    })
}

/// Convert stored microseconds back to a timestamp
pub(crate) fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {}", micros).into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[tokio::test]
    async fn test_upsert_and_load_detail() {
        let pool = open_in_memory().await.unwrap();
        let now = Utc::now();

        let mut detail = SpeciesDetail::empty("Monstera deliciosa", now);
        detail.common_name = Some("Swiss cheese plant".to_string());
        detail.fun_facts = Some(vec!["Fenestrated leaves".to_string()]);
        upsert_detail(&pool, &detail).await.unwrap();

        detail.water = Some("Weekly".to_string());
        upsert_detail(&pool, &detail).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM species_details")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "Upsert must never duplicate a canonical name");

        let loaded = load_detail(&pool, "Monstera deliciosa")
            .await
            .unwrap()
            .expect("Detail not found");
        assert_eq!(loaded.water.as_deref(), Some("Weekly"));
        assert_eq!(loaded.fun_facts, detail.fun_facts);
        assert_eq!(loaded.last_updated.timestamp_micros(), now.timestamp_micros());
    }

    #[tokio::test]
    async fn test_delete_detail() {
        let pool = open_in_memory().await.unwrap();
        upsert_detail(&pool, &SpeciesDetail::empty("Aloe vera", Utc::now()))
            .await
            .unwrap();

        assert!(delete_detail(&pool, "Aloe vera").await.unwrap());
        assert!(!delete_detail(&pool, "Aloe vera").await.unwrap());
        assert!(load_detail(&pool, "Aloe vera").await.unwrap().is_none());
    }
}
