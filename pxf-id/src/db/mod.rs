//! Database access for pxf-id
//!
//! SQLite persistence for species details and the user collection.

pub mod collection_entries;
pub mod species_details;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database
///
/// Limited to one connection: every SQLite in-memory connection is its own
/// database, and the connection must never be recycled.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create pxf-id tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS species_details (
            canonical_name TEXT PRIMARY KEY,
            common_name TEXT,
            summary TEXT,
            growth_habit TEXT,
            sunlight TEXT,
            water TEXT,
            soil TEXT,
            temperature TEXT,
            bloom_time TEXT,
            fun_facts TEXT,
            last_updated_us INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_entries (
            guid TEXT PRIMARY KEY,
            numeric_id INTEGER NOT NULL UNIQUE,
            created_at_us INTEGER NOT NULL,
            canonical_name TEXT NOT NULL,
            original_image BLOB NOT NULL,
            artifact BLOB,
            artifact_failed INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Running counter for numeric_id assignment, kept equal to the entry count
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_counter (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO collection_counter (id, last_id)
        SELECT 1, COUNT(*) FROM collection_entries
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (species_details, collection_entries, collection_counter)");

    Ok(())
}
