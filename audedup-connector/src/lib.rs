//! audedup-connector library - inbound HTTP boundary
//!
//! Turns scan requests and tgmount webhooks into queued jobs in the shared
//! record store.

use axum::Router;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod backfill;
pub mod error;

pub use error::{ApiError, ApiResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Prepended to `fname` of tgmount webhooks
    pub basedir: PathBuf,
    /// Upper bound on retrying a locked insert
    pub max_lock_wait_ms: u64,
}

impl AppState {
    pub fn new(db: SqlitePool, basedir: PathBuf) -> Self {
        Self {
            db,
            basedir,
            max_lock_wait_ms: 5000,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::queue_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
