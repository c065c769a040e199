//! Database Test Utilities

use anyhow::Result;
use pxf_common::config::database_path;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary file-backed database with tables initialised
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = pxf_id::db::init_database_pool(&database_path(temp_dir.path())).await?;
    Ok((temp_dir, pool))
}
