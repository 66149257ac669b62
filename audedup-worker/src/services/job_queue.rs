//! Durable job queue and its consumer loop
//!
//! Jobs live in the shared SQLite store so any number of worker processes
//! can consume the same queue. A claim is a conditional update
//! (`Pending → Processing` only if still Pending); a worker that loses the
//! update simply selects again.

use crate::services::dedup_engine::DedupEngine;
use audedup_common::db::{jobs, retry_on_lock, Job, JobOutcome, JobStatus};
use audedup_common::Result;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handle to the job table
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: 5000,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    /// Append a Pending job. Identical paths are not collapsed.
    pub async fn enqueue(&self, path: &str) -> Result<i64> {
        let job_id = retry_on_lock("enqueue", self.max_lock_wait_ms, || {
            jobs::insert_job(&self.pool, path)
        })
        .await?;
        tracing::info!(job_id, path, "Enqueued job");
        Ok(job_id)
    }

    /// Claim the oldest Pending job, or `None` if there is none
    ///
    /// Losing the conditional update to another worker is retried until a
    /// claim succeeds or the queue is empty.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        loop {
            let Some(job) = jobs::select_oldest_pending(&self.pool).await? else {
                return Ok(None);
            };

            let claimed = retry_on_lock("claim_job", self.max_lock_wait_ms, || {
                jobs::conditional_update_status(&self.pool, job.id, JobStatus::Pending, JobStatus::Processing)
            })
            .await?;

            if claimed {
                tracing::debug!(job_id = job.id, path = %job.path, "Claimed job");
                return Ok(Some(Job {
                    status: JobStatus::Processing,
                    ..job
                }));
            }

            tracing::debug!(job_id = job.id, "Job claimed by another worker, reselecting");
        }
    }

    /// Record the terminal outcome of a claimed job
    pub async fn complete(&self, job_id: i64, outcome: JobOutcome) -> Result<()> {
        retry_on_lock("complete_job", self.max_lock_wait_ms, || {
            jobs::complete_job(&self.pool, job_id, outcome)
        })
        .await
    }

    /// Keep a claimed job's lease alive; `false` once it is no longer ours
    pub async fn heartbeat(&self, job_id: i64) -> Result<bool> {
        retry_on_lock("job_heartbeat", self.max_lock_wait_ms, || {
            jobs::touch_processing(&self.pool, job_id)
        })
        .await
    }

    /// Fail and re-enqueue Processing jobs not refreshed within `lease`
    pub async fn expire_stale(&self, lease: Duration) -> Result<usize> {
        let replaced = retry_on_lock("expire_stale", self.max_lock_wait_ms, || {
            jobs::expire_stale_processing(&self.pool, lease)
        })
        .await?;

        for (expired, replacement) in &replaced {
            tracing::error!(
                job_id = expired,
                replacement_job_id = replacement,
                lease_secs = lease.as_secs(),
                "Job stuck in Processing past its lease, marked Failed and re-enqueued"
            );
        }
        Ok(replaced.len())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Consumer loop settings
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Sleep between polls when no job is pending
    pub poll_interval: Duration,
    /// Expire stuck Processing jobs after this long (disabled when `None`)
    pub job_lease: Option<Duration>,
}

impl WorkerOptions {
    /// How often a running job refreshes its lease: three times per lease
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.job_lease
            .map(|lease| (lease / 3).max(Duration::from_millis(10)))
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_lease: None,
        }
    }
}

/// Claim and process jobs until `shutdown` is cancelled
///
/// A claimed job always runs to completion; cancellation is only observed
/// between jobs and during the idle sleep.
pub async fn run_worker(
    queue: JobQueue,
    engine: DedupEngine,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    tracing::info!(
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        job_lease_secs = options.job_lease.map(|l| l.as_secs()),
        "Queue worker started"
    );

    while !shutdown.is_cancelled() {
        if let Some(lease) = options.job_lease {
            if let Err(e) = queue.expire_stale(lease).await {
                tracing::warn!(error = %e, "Failed to expire stale jobs");
            }
        }

        let job = match queue.claim_next().await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim job, will retry");
                None
            }
        };

        match job {
            Some(job) => process_job(&queue, &engine, &job, options.heartbeat_interval()).await,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
            }
        }
    }

    tracing::info!("Queue worker stopped");
    Ok(())
}

async fn process_job(queue: &JobQueue, engine: &DedupEngine, job: &Job, heartbeat: Option<Duration>) {
    tracing::info!(job_id = job.id, path = %job.path, "Processing job");

    let scan = engine.process_path(Path::new(&job.path));
    let result = match heartbeat {
        None => scan.await,
        Some(every) => {
            tokio::pin!(scan);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the claim itself is fresh
            ticker.tick().await;
            loop {
                tokio::select! {
                    result = &mut scan => break result,
                    _ = ticker.tick() => match queue.heartbeat(job.id).await {
                        Ok(true) => tracing::trace!(job_id = job.id, "Lease refreshed"),
                        Ok(false) => tracing::warn!(job_id = job.id, "Job no longer Processing, lease lost"),
                        Err(e) => tracing::warn!(job_id = job.id, error = %e, "Failed to refresh lease"),
                    },
                }
            }
        }
    };

    let outcome = match result {
        Ok(report) => {
            tracing::info!(
                job_id = job.id,
                classified = report.events.len(),
                skipped = report.skipped,
                failed = report.failed.len(),
                "Job done"
            );
            JobOutcome::Done
        }
        Err(e) => {
            tracing::warn!(job_id = job.id, path = %job.path, error = %e, "Job failed");
            JobOutcome::Failed
        }
    };

    // A rejected completion means the job was expired and re-enqueued meanwhile
    if let Err(e) = queue.complete(job.id, outcome).await {
        tracing::error!(job_id = job.id, error = %e, "Failed to record job outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audedup_common::db::init_database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, JobQueue) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("db.sqlite3")).await.unwrap();
        (dir, JobQueue::new(pool))
    }

    #[tokio::test]
    async fn test_claim_in_creation_order() {
        let (_dir, queue) = setup().await;
        let first = queue.enqueue("/a").await.unwrap();
        let second = queue.enqueue("/b").await.unwrap();

        let job = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Processing);

        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, second);
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_paths_not_collapsed() {
        let (_dir, queue) = setup().await;
        let a = queue.enqueue("/same").await.unwrap();
        let b = queue.enqueue("/same").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_complete_and_repeat() {
        let (_dir, queue) = setup().await;
        let id = queue.enqueue("/a").await.unwrap();
        queue.claim_next().await.unwrap();

        queue.complete(id, JobOutcome::Done).await.unwrap();
        queue.complete(id, JobOutcome::Done).await.unwrap();
        assert!(queue.complete(id, JobOutcome::Failed).await.is_err());
    }

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(WorkerOptions::default().heartbeat_interval(), None);
        let options = WorkerOptions {
            job_lease: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        assert_eq!(options.heartbeat_interval(), Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_claim_alive() {
        let (_dir, queue) = setup().await;
        queue.enqueue("/long").await.unwrap();
        let job = queue.claim_next().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(queue.heartbeat(job.id).await.unwrap());
        assert_eq!(queue.expire_stale(Duration::from_millis(500)).await.unwrap(), 0);

        queue.complete(job.id, JobOutcome::Done).await.unwrap();
        assert!(!queue.heartbeat(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_stale_requeues() {
        let (_dir, queue) = setup().await;
        queue.enqueue("/stuck").await.unwrap();
        let stuck = queue.claim_next().await.unwrap().unwrap();

        assert_eq!(queue.expire_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.expire_stale(Duration::from_millis(1)).await.unwrap(), 1);

        let old = jobs::load_job(queue.pool(), stuck.id).await.unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Failed);

        let retry = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(retry.path, "/stuck");
        assert_ne!(retry.id, stuck.id);
    }
}
