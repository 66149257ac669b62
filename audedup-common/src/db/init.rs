//! Database initialization
//!
//! Opens (creating if needed) the SQLite record store and applies the schema.
//! Schema creation is idempotent so every worker and connector process can
//! run it on startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // busy_timeout is per connection, so it is set on each one as it opens
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets readers (reconciler streams) run alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_jobs_table(pool).await?;
    create_tracks_table(pool).await?;
    create_unknown_files_table(pool).await?;

    info!("Database schema initialized (jobs, tracks, unknown_files)");
    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'PROCESSING', 'DONE', 'FAILED')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_path ON jobs(path)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tracks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            acoustic_fingerprint INTEGER NOT NULL,
            album TEXT,
            album_id TEXT,
            disc_number INTEGER,
            track_number INTEGER,
            duplicate INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Only canonical (non-duplicate) tracks must be unique per identity tuple.
    // NULLs are mapped to a blob so absent tags collide like equal ones do;
    // a blob never compares equal to a text or integer value.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_identity
        ON tracks(
            acoustic_fingerprint,
            IFNULL(album, X'00'),
            IFNULL(album_id, X'00'),
            IFNULL(disc_number, X'00'),
            IFNULL(track_number, X'00')
        )
        WHERE duplicate = 0
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_fingerprint ON tracks(acoustic_fingerprint)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_unknown_files_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unknown_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
