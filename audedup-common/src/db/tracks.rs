//! Track persistence
//!
//! Track rows are written once and never updated. Path uniqueness spans
//! `tracks` and `unknown_files`: the insert is guarded by a NOT EXISTS check
//! on the other table inside the same statement, and the per-table UNIQUE
//! constraint catches the rest.

use crate::db::models::{NewTrack, Track, TrackIdentity};
use crate::{Error, Result};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::SqlitePool;

const TRACK_COLUMNS: &str = "id, path, acoustic_fingerprint, album, album_id, disc_number, \
                             track_number, duplicate, created_at";

/// Load a track by path
pub async fn find_track_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Track>> {
    let sql = format!("SELECT {} FROM tracks WHERE path = ?", TRACK_COLUMNS);
    let track = sqlx::query_as::<_, Track>(&sql)
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(track)
}

/// Find the canonical (non-duplicate) track holding an identity tuple
///
/// `IS` gives NULL-safe equality, so absent tags match absent tags.
pub async fn find_track_by_identity(
    pool: &SqlitePool,
    identity: &TrackIdentity,
) -> Result<Option<Track>> {
    let sql = format!(
        r#"
        SELECT {} FROM tracks
        WHERE acoustic_fingerprint = ?
          AND album IS ?
          AND album_id IS ?
          AND disc_number IS ?
          AND track_number IS ?
          AND duplicate = 0
        LIMIT 1
        "#,
        TRACK_COLUMNS
    );
    let track = sqlx::query_as::<_, Track>(&sql)
        .bind(identity.acoustic_fingerprint)
        .bind(&identity.album)
        .bind(&identity.album_id)
        .bind(identity.disc_number)
        .bind(identity.track_number)
        .fetch_optional(pool)
        .await?;
    Ok(track)
}

/// Insert a track record
///
/// # Errors
/// * `Error::AlreadyClassified` - the path already has a Track or UnknownFile
/// * `Error::IdentityConflict` - `duplicate == false` but a canonical track with
///   the same identity tuple was committed concurrently
pub async fn insert_track(pool: &SqlitePool, track: &NewTrack) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO tracks (path, acoustic_fingerprint, album, album_id,
                            disc_number, track_number, duplicate, created_at)
        SELECT ?, ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (SELECT 1 FROM unknown_files WHERE path = ?)
        "#,
    )
    .bind(&track.path)
    .bind(track.identity.acoustic_fingerprint)
    .bind(&track.identity.album)
    .bind(&track.identity.album_id)
    .bind(track.identity.disc_number)
    .bind(track.identity.track_number)
    .bind(track.duplicate)
    .bind(Utc::now())
    .bind(&track.path)
    .execute(pool)
    .await
    .map_err(|e| classify_insert_error(e, &track.path))?;

    if result.rows_affected() == 0 {
        return Err(Error::AlreadyClassified(track.path.clone()));
    }

    Ok(result.last_insert_rowid())
}

/// Map UNIQUE violations on `tracks` to the distinct store errors
fn classify_insert_error(err: sqlx::Error, path: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            // "UNIQUE constraint failed: tracks.path" vs. "... index 'idx_tracks_identity'"
            if db_err.message().contains("tracks.path") {
                return Error::AlreadyClassified(path.to_string());
            }
            return Error::IdentityConflict(path.to_string());
        }
    }
    Error::Database(err)
}

/// Stream paths of all non-duplicate tracks through a cursor
pub fn stream_non_duplicate_track_paths(pool: &SqlitePool) -> BoxStream<'_, Result<String>> {
    sqlx::query_scalar::<_, String>("SELECT path FROM tracks WHERE duplicate = 0")
        .fetch(pool)
        .map_err(Error::from)
        .boxed()
}

/// Count tracks, optionally filtered by duplicate flag
pub async fn count_tracks(pool: &SqlitePool, duplicate: Option<bool>) -> Result<i64> {
    let count: i64 = match duplicate {
        Some(flag) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE duplicate = ?")
                .bind(flag)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}
