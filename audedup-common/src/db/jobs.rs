//! Job queue persistence
//!
//! The conditional status update is the only mutual-exclusion primitive
//! between worker processes: `UPDATE ... WHERE id = ? AND status = ?` runs as
//! one statement, so of N workers racing on the same row exactly one sees a
//! row affected.

use crate::db::models::{Job, JobOutcome, JobStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

/// Append a Pending job and return its id
pub async fn insert_job(pool: &SqlitePool, path: &str) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (path, status, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(path)
    .bind(JobStatus::Pending)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Oldest Pending job by creation time (id breaks ties)
pub async fn select_oldest_pending(pool: &SqlitePool) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(
        r#"
        SELECT id, path, status, created_at, updated_at
        FROM jobs
        WHERE status = ?
        ORDER BY created_at, id
        LIMIT 1
        "#,
    )
    .bind(JobStatus::Pending)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Load a job by id
pub async fn load_job(pool: &SqlitePool, job_id: i64) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(
        "SELECT id, path, status, created_at, updated_at FROM jobs WHERE id = ?",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Set `new` only if the job is currently in `expected`
///
/// Returns whether a row was affected.
pub async fn conditional_update_status(
    pool: &SqlitePool,
    job_id: i64,
    expected: JobStatus,
    new: JobStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(new)
    .bind(Utc::now())
    .bind(job_id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Refresh `updated_at` of a job still in Processing
///
/// Called periodically by the worker holding the claim so the lease measures
/// time since the worker was last alive. Returns `false` once the job is no
/// longer Processing (completed, or expired by another worker).
pub async fn touch_processing(pool: &SqlitePool, job_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE jobs SET updated_at = ? WHERE id = ? AND status = ?")
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Processing)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a Processing job to its terminal status
///
/// Repeating the same outcome is a no-op. Any other transition (a different
/// outcome after the job is already terminal, or completing a job that was
/// never claimed) is rejected with `Error::InvalidTransition`.
pub async fn complete_job(pool: &SqlitePool, job_id: i64, outcome: JobOutcome) -> Result<()> {
    let target: JobStatus = outcome.into();

    if conditional_update_status(pool, job_id, JobStatus::Processing, target).await? {
        return Ok(());
    }

    let job = load_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

    if job.status == target {
        tracing::debug!(job_id, status = %target, "Job already completed with same outcome");
        return Ok(());
    }

    tracing::error!(
        job_id,
        current = %job.status,
        requested = %target,
        "Rejected job completion: illegal status transition"
    );
    Err(Error::InvalidTransition {
        job_id,
        from: job.status.to_string(),
        to: target.to_string(),
    })
}

/// Expire Processing jobs not refreshed within `lease`
///
/// Each expired job is moved Processing → Failed and a fresh Pending job is
/// enqueued for the same path, so statuses stay monotonic and the stuck job
/// remains in the audit trail. Returns `(expired_id, replacement_id)` pairs.
pub async fn expire_stale_processing(
    pool: &SqlitePool,
    lease: Duration,
) -> Result<Vec<(i64, i64)>> {
    let lease = chrono::Duration::from_std(lease)
        .map_err(|e| Error::InvalidInput(format!("Job lease out of range: {}", e)))?;
    let cutoff: DateTime<Utc> = Utc::now() - lease;

    let stale: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT id, path FROM jobs
        WHERE status = ? AND updated_at < ?
        ORDER BY created_at, id
        "#,
    )
    .bind(JobStatus::Processing)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut replaced = Vec::new();
    for (job_id, path) in stale {
        let mut tx = pool.begin().await?;

        let now = Utc::now();
        let expired = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, updated_at = ?
            WHERE id = ? AND status = ? AND updated_at < ?
            "#,
        )
        .bind(JobStatus::Failed)
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Processing)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        if expired.rows_affected() == 0 {
            // Completed or expired by another worker in the meantime
            tx.rollback().await?;
            continue;
        }

        let requeued = sqlx::query(
            "INSERT INTO jobs (path, status, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&path)
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        replaced.push((job_id, requeued.last_insert_rowid()));
    }

    Ok(replaced)
}

/// Count jobs in a given status
pub async fn count_jobs_by_status(pool: &SqlitePool, status: JobStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
