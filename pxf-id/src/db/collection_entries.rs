//! Collection entry database operations
//!
//! Writers take a connection so callers can group statements in one
//! transaction; readers take the pool.

use crate::collection::{CollectionEntry, ListOrder};
use crate::db::species_details::micros_to_datetime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT numeric_id, guid, created_at_us, canonical_name, original_image,
           artifact, artifact_failed, tags, notes
    FROM collection_entries
"#;

/// Numbering health of the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Density {
    pub count: i64,
    pub min_id: i64,
    pub max_id: i64,
    /// Running counter value
    pub counter: i64,
}

impl Density {
    /// Ids form `1..N` and the counter equals `N`
    ///
    /// Relies on the UNIQUE constraint on `numeric_id`.
    pub fn is_dense(&self) -> bool {
        if self.count == 0 {
            self.max_id == 0 && self.counter == 0
        } else {
            self.min_id == 1 && self.max_id == self.count && self.counter == self.count
        }
    }
}

/// Advance the running counter and return the new id
pub async fn next_numeric_id(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE collection_counter SET last_id = last_id + 1 WHERE id = 1 RETURNING last_id",
    )
    .fetch_one(conn)
    .await
}

/// Insert a fully-populated entry
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &CollectionEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO collection_entries (
            guid, numeric_id, created_at_us, canonical_name, original_image,
            artifact, artifact_failed, tags, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.guid.to_string())
    .bind(entry.numeric_id)
    .bind(entry.created_at.timestamp_micros())
    .bind(&entry.canonical_name)
    .bind(&entry.original_image)
    .bind(&entry.artifact)
    .bind(entry.artifact_generation_failed)
    .bind(tags_to_json(&entry.tags)?)
    .bind(&entry.notes)
    .execute(conn)
    .await?;

    Ok(())
}

/// Current numeric id of the entry with this guid
pub async fn numeric_id_for_guid(
    conn: &mut SqliteConnection,
    guid: Uuid,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT numeric_id FROM collection_entries WHERE guid = ?")
        .bind(guid.to_string())
        .fetch_optional(conn)
        .await
}

/// Replace tags and notes; returns affected rows
pub async fn update_tags_and_notes(
    conn: &mut SqliteConnection,
    guid: Uuid,
    tags: &BTreeSet<String>,
    notes: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE collection_entries SET tags = ?, notes = ? WHERE guid = ?")
        .bind(tags_to_json(tags)?)
        .bind(notes)
        .bind(guid.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Store artifact bytes on the entry with this guid; returns affected rows
pub async fn set_artifact_by_guid(
    conn: &mut SqliteConnection,
    guid: Uuid,
    artifact: &[u8],
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE collection_entries SET artifact = ?, artifact_failed = 0 WHERE guid = ?")
            .bind(artifact)
            .bind(guid.to_string())
            .execute(conn)
            .await?;
    Ok(result.rows_affected())
}

/// Flag artifact generation as failed on the entry with this guid
pub async fn set_artifact_failed_by_guid(
    conn: &mut SqliteConnection,
    guid: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE collection_entries SET artifact_failed = 1 WHERE guid = ?")
        .bind(guid.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Store artifact bytes and clear the failure flag; returns affected rows
pub async fn set_artifact(
    conn: &mut SqliteConnection,
    numeric_id: i64,
    artifact: &[u8],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE collection_entries SET artifact = ?, artifact_failed = 0 WHERE numeric_id = ?",
    )
    .bind(artifact)
    .bind(numeric_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Flag artifact generation as failed; returns affected rows
pub async fn set_artifact_failed(
    conn: &mut SqliteConnection,
    numeric_id: i64,
) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("UPDATE collection_entries SET artifact_failed = 1 WHERE numeric_id = ?")
            .bind(numeric_id)
            .execute(conn)
            .await?;
    Ok(result.rows_affected())
}

/// Delete one entry and close the gap it leaves
///
/// Every higher id moves down by one and the counter follows. Shifted ids
/// pass through negative values so the UNIQUE constraint never sees two
/// rows on the same id, whatever order SQLite updates rows in. Must run
/// inside a transaction. Returns `false` when no entry had the id.
pub async fn delete_and_renumber(
    conn: &mut SqliteConnection,
    numeric_id: i64,
) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM collection_entries WHERE numeric_id = ?")
        .bind(numeric_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Ok(false);
    }

    sqlx::query(
        "UPDATE collection_entries SET numeric_id = -(numeric_id - 1) WHERE numeric_id > ?",
    )
    .bind(numeric_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE collection_entries SET numeric_id = -numeric_id WHERE numeric_id < 0")
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE collection_counter SET last_id = last_id - 1 WHERE id = 1")
        .execute(&mut *conn)
        .await?;

    Ok(true)
}

/// Read the numbering health figures
pub async fn density(conn: &mut SqliteConnection) -> Result<Density, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS count,
               COALESCE(MIN(numeric_id), 0) AS min_id,
               COALESCE(MAX(numeric_id), 0) AS max_id,
               COALESCE((SELECT last_id FROM collection_counter WHERE id = 1), -1) AS counter
        FROM collection_entries
        "#,
    )
    .fetch_one(conn)
    .await?;

    Ok(Density {
        count: row.try_get("count")?,
        min_id: row.try_get("min_id")?,
        max_id: row.try_get("max_id")?,
        counter: row.try_get("counter")?,
    })
}

/// Load entry by numeric id
pub async fn load_entry(
    pool: &SqlitePool,
    numeric_id: i64,
) -> Result<Option<CollectionEntry>, sqlx::Error> {
    let sql = format!("{} WHERE numeric_id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql).bind(numeric_id).fetch_optional(pool).await?;
    row.map(|row| entry_from_row(&row)).transpose()
}

/// Load entry by guid
pub async fn load_entry_by_guid(
    pool: &SqlitePool,
    guid: Uuid,
) -> Result<Option<CollectionEntry>, sqlx::Error> {
    let sql = format!("{} WHERE guid = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(guid.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|row| entry_from_row(&row)).transpose()
}

/// List entries in the requested order
pub async fn list_entries(
    pool: &SqlitePool,
    order: &ListOrder,
) -> Result<Vec<CollectionEntry>, sqlx::Error> {
    let rows = match order {
        ListOrder::ById => {
            let sql = format!("{} ORDER BY numeric_id ASC", SELECT_COLUMNS);
            sqlx::query(&sql).fetch_all(pool).await?
        }
        ListOrder::NewestFirst => {
            let sql = format!(
                "{} ORDER BY created_at_us DESC, numeric_id DESC",
                SELECT_COLUMNS
            );
            sqlx::query(&sql).fetch_all(pool).await?
        }
        ListOrder::Alphabetical => {
            let sql = format!(
                "{} ORDER BY canonical_name COLLATE NOCASE ASC, numeric_id ASC",
                SELECT_COLUMNS
            );
            sqlx::query(&sql).fetch_all(pool).await?
        }
        ListOrder::WithTag(tag) => {
            let sql = format!(
                r#"{} WHERE EXISTS (
                    SELECT 1 FROM json_each(collection_entries.tags) WHERE json_each.value = ?
                )
                ORDER BY numeric_id ASC"#,
                SELECT_COLUMNS
            );
            sqlx::query(&sql).bind(tag.trim()).fetch_all(pool).await?
        }
    };

    rows.iter().map(entry_from_row).collect()
}

fn entry_from_row(row: &SqliteRow) -> Result<CollectionEntry, sqlx::Error> {
    let guid: String = row.try_get("guid")?;
    let tags: String = row.try_get("tags")?;

    Ok(CollectionEntry {
        numeric_id: row.try_get("numeric_id")?,
        guid: Uuid::parse_str(&guid).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_at: micros_to_datetime(row.try_get("created_at_us")?)?,
        canonical_name: row.try_get("canonical_name")?,
        original_image: row.try_get("original_image")?,
        artifact: row.try_get("artifact")?,
        tags: serde_json::from_str(&tags).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        notes: row.try_get("notes")?,
        artifact_generation_failed: row.try_get("artifact_failed")?,
    })
}

fn tags_to_json(tags: &BTreeSet<String>) -> Result<String, sqlx::Error> {
    serde_json::to_string(tags).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}
