//! Unknown file persistence

use crate::db::models::UnknownFile;
use crate::{Error, Result};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::SqlitePool;

/// Load an unknown-file record by path
pub async fn find_unknown_file_by_path(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<UnknownFile>> {
    let record = sqlx::query_as::<_, UnknownFile>(
        "SELECT id, path, created_at FROM unknown_files WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Record a path that could not be classified as audio
///
/// Fails with `Error::AlreadyClassified` if the path has any record already.
pub async fn insert_unknown_file(pool: &SqlitePool, path: &str) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO unknown_files (path, created_at)
        SELECT ?, ?
        WHERE NOT EXISTS (SELECT 1 FROM tracks WHERE path = ?)
        "#,
    )
    .bind(path)
    .bind(Utc::now())
    .bind(path)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::AlreadyClassified(path.to_string())
        }
        other => Error::Database(other),
    })?;

    if result.rows_affected() == 0 {
        return Err(Error::AlreadyClassified(path.to_string()));
    }

    Ok(result.last_insert_rowid())
}

/// Stream all unknown-file paths through a cursor
pub fn stream_unknown_file_paths(pool: &SqlitePool) -> BoxStream<'_, Result<String>> {
    sqlx::query_scalar::<_, String>("SELECT path FROM unknown_files")
        .fetch(pool)
        .map_err(Error::from)
        .boxed()
}

pub async fn count_unknown_files(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unknown_files")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
