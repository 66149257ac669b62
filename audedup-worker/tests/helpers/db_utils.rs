//! Database Test Utilities

use anyhow::Result;
use audedup_common::db::{init_database, tracks, unknown_files, NewTrack, TrackIdentity};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = init_database(&temp_dir.path().join("test_dedup.sqlite3")).await?;
    Ok((temp_dir, pool))
}

/// Insert a track record directly, bypassing the engine
pub async fn seed_track(pool: &SqlitePool, path: &str, fingerprint: i64, duplicate: bool) -> Result<i64> {
    let id = tracks::insert_track(
        pool,
        &NewTrack {
            path: path.to_string(),
            identity: TrackIdentity {
                acoustic_fingerprint: fingerprint,
                album: Some("Seeded".to_string()),
                album_id: None,
                disc_number: Some(1),
                track_number: Some(1),
            },
            duplicate,
        },
    )
    .await?;
    Ok(id)
}

pub async fn seed_unknown(pool: &SqlitePool, path: &str) -> Result<i64> {
    Ok(unknown_files::insert_unknown_file(pool, path).await?)
}
