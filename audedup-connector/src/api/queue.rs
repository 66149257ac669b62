//! Queue submission endpoints
//!
//! Both endpoints only append a Pending job; classification happens in the
//! workers. Re-submitting a path is harmless since the engine skips paths
//! that are already classified.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use audedup_common::db::{jobs, retry_on_lock};

/// POST /api/v1/queue request
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// File or directory to scan, as seen by the workers
    pub path: String,
}

/// tgmount webhook body; fields other than `fname` are ignored
#[derive(Debug, Deserialize)]
pub struct TgmountWebhook {
    /// File name relative to the configured base directory
    pub fname: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub queue_id: i64,
}

/// POST /api/v1/queue
pub async fn enqueue_path(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    if request.path.trim().is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".to_string()));
    }

    let queue_id = enqueue(&state, &request.path).await?;
    tracing::info!(queue_id, path = %request.path, "Queued scan request");

    Ok((StatusCode::CREATED, Json(EnqueueResponse { queue_id })))
}

/// POST /api/v1/tgmount_add_to_dedup_queue
///
/// Queues `basedir/fname`.
pub async fn tgmount_add_to_dedup_queue(
    State(state): State<AppState>,
    Json(webhook): Json<TgmountWebhook>,
) -> ApiResult<Json<EnqueueResponse>> {
    let path = tgmount_path(&state.basedir, &webhook.fname)?;
    let queue_id = enqueue(&state, &path).await?;
    tracing::info!(queue_id, path = %path, "Queued tgmount file");

    Ok(Json(EnqueueResponse { queue_id }))
}

/// Append a Pending job, riding out lock contention from the workers
pub(crate) async fn enqueue(state: &AppState, path: &str) -> ApiResult<i64> {
    let queue_id = retry_on_lock("insert_job", state.max_lock_wait_ms, || {
        jobs::insert_job(&state.db, path)
    })
    .await?;
    Ok(queue_id)
}

/// `basedir/fname` for a tgmount file name
pub(crate) fn tgmount_path(basedir: &Path, fname: &str) -> ApiResult<String> {
    validate_fname(fname)?;
    basedir
        .join(fname)
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("fname is not valid UTF-8".to_string()))
}

/// Reject names that would escape the base directory
fn validate_fname(fname: &str) -> ApiResult<()> {
    if fname.trim().is_empty() {
        return Err(ApiError::BadRequest("fname must not be empty".to_string()));
    }

    let path = Path::new(fname);
    if path.is_absolute() {
        return Err(ApiError::BadRequest("fname must be relative".to_string()));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ApiError::BadRequest("fname must not contain '..'".to_string()));
    }
    Ok(())
}

/// Build queue routes
pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/queue", post(enqueue_path))
        .route("/api/v1/tgmount_add_to_dedup_queue", post(tgmount_add_to_dedup_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_fname() {
        assert!(validate_fname("Artist/Album/01.flac").is_ok());
        assert!(validate_fname("./01.flac").is_ok());
        assert!(validate_fname("").is_err());
        assert!(validate_fname("   ").is_err());
        assert!(validate_fname("/etc/passwd").is_err());
        assert!(validate_fname("a/../../b.flac").is_err());
    }

    #[test]
    fn test_tgmount_path_joins_basedir() {
        assert_eq!(
            tgmount_path(Path::new("/mnt/tg"), "12 song.flac").unwrap(),
            "/mnt/tg/12 song.flac"
        );
        assert!(tgmount_path(Path::new("/mnt/tg"), "../x").is_err());
    }
}
