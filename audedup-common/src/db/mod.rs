//! Record store: schema, models and queries
//!
//! One module per record kind. Cross-table checks that the engine and the
//! view reconciler need live here.

pub mod init;
pub mod jobs;
pub mod models;
pub mod retry;
pub mod tracks;
pub mod unknown_files;

pub use init::*;
pub use models::*;
pub use retry::retry_on_lock;

use crate::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// Maximum paths bound into one `IN (...)` validity query
pub const MAX_BATCH_PATHS: usize = 1000;

/// True if the path has a Track or an UnknownFile record
pub async fn is_classified(pool: &SqlitePool, path: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM tracks WHERE path = ?
        UNION ALL
        SELECT 1 FROM unknown_files WHERE path = ?
        LIMIT 1
        "#,
    )
    .bind(path)
    .bind(path)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}

/// Return the subset of `paths` that belongs in the canonical view
///
/// A path is valid when it is a non-duplicate Track or an UnknownFile.
/// Queries run in chunks of at most `MAX_BATCH_PATHS` paths.
pub async fn batch_check_valid_paths(
    pool: &SqlitePool,
    paths: &[String],
) -> Result<HashSet<String>> {
    let mut valid = HashSet::with_capacity(paths.len());

    for chunk in paths.chunks(MAX_BATCH_PATHS) {
        let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT path FROM tracks WHERE duplicate = 0 AND path IN ({0}) \
             UNION \
             SELECT path FROM unknown_files WHERE path IN ({0})",
            placeholders
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for path in chunk {
            query = query.bind(path);
        }
        for path in chunk {
            query = query.bind(path);
        }

        valid.extend(query.fetch_all(pool).await?);
    }

    Ok(valid)
}
